//! Delivery of tracker events onto the consumer's thread.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{error, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Куда трекер отправляет обработчики событий
pub trait Dispatcher: Send + Sync {
    /// Выполнить и дождаться завершения
    fn invoke(&self, job: Job);

    /// Поставить в очередь и вернуться сразу; порядок FIFO сохраняется
    fn invoke_async(&self, job: Job);
}

fn run_guarded(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Паника в обработчике события подавлена");
    }
}

/// Выполняет всё на вызывающем потоке
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn invoke(&self, job: Job) {
        run_guarded(job);
    }

    fn invoke_async(&self, job: Job) {
        run_guarded(job);
    }
}

/// Один поток-потребитель с очередью, аналог UI-потока
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<Job>,
    consumer: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelDispatcher {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                run_guarded(job);
            }
        })?;
        Ok(Self {
            sender,
            consumer: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Дождаться, пока поток обработает всё, что уже в очереди
    pub fn flush(&self) {
        self.invoke(Box::new(|| {}));
    }

    /// Закрыть очередь и дождаться потока-потребителя
    pub fn shutdown(self) {
        let Self { sender, thread, .. } = self;
        drop(sender);
        if let Some(thread) = thread.into_inner() {
            if thread.join().is_err() {
                error!("Поток диспетчера завершился паникой");
            }
        }
    }
}

impl Dispatcher for ChannelDispatcher {
    fn invoke(&self, job: Job) {
        // Ожидание самого себя привело бы к взаимоблокировке
        if std::thread::current().id() == self.consumer {
            run_guarded(job);
            return;
        }
        let (done_tx, done_rx) = std_mpsc::channel::<()>();
        let wrapped: Job = Box::new(move || {
            job();
            let _ = done_tx.send(());
        });
        if self.sender.send(wrapped).is_err() {
            warn!("Диспетчер остановлен, задание отброшено");
            return;
        }
        let _ = done_rx.recv();
    }

    fn invoke_async(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!("Диспетчер остановлен, задание отброшено");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_channel_dispatcher_keeps_fifo_order() {
        let dispatcher = ChannelDispatcher::spawn("test-dispatcher").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            dispatcher.invoke_async(Box::new(move || seen.lock().push(i)));
        }
        dispatcher.flush();
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
        dispatcher.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_consumer() {
        let dispatcher = ChannelDispatcher::spawn("test-dispatcher").unwrap();
        dispatcher.invoke_async(Box::new(|| panic!("boom")));
        let seen = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&seen);
        dispatcher.invoke(Box::new(move || *flag.lock() = true));
        assert!(*seen.lock());
        dispatcher.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queued_jobs() {
        let dispatcher = ChannelDispatcher::spawn("test-dispatcher").unwrap();
        let seen = Arc::new(Mutex::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&seen);
            dispatcher.invoke_async(Box::new(move || *counter.lock() += 1));
        }
        dispatcher.shutdown();
        assert_eq!(*seen.lock(), 20);
    }

    #[test]
    fn test_inline_dispatcher_runs_immediately() {
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        InlineDispatcher.invoke_async(Box::new(move || *counter.lock() += 1));
        assert_eq!(*seen.lock(), 1);
    }
}
