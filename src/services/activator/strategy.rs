use crate::events::WindowHandle;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use super::super::platform::WindowSystem;
use super::guards::{ForegroundLockGuard, InputAttachGuard};

/// Всё, что стратегии нужно знать о цели
pub struct ActivationTarget<'a> {
    pub windows: &'a dyn WindowSystem,
    pub handle: WindowHandle,
    pub process_id: Option<u32>,
    pub target_thread: Option<u32>,
    pub caller_thread: u32,
    /// `None` означает «без ограничения по времени»
    pub deadline: Option<Instant>,
}

impl ActivationTarget<'_> {
    pub fn is_foreground(&self) -> bool {
        self.windows.foreground_window() == Some(self.handle)
    }

    /// Остаток бюджета активации; `None`, если бюджет не ограничен
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_passed(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Restore, set foreground, bring to top, проверка
    fn simple_sequence(&self) -> bool {
        if self.windows.is_minimized(self.handle) {
            self.windows.restore(self.handle);
        }
        self.windows.set_foreground(self.handle);
        self.windows.bring_to_top(self.handle);
        self.is_foreground()
    }
}

/// Одна ступень эскалации активации
#[async_trait]
pub trait ActivationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `true`, если окно стало активным
    async fn attempt(&self, target: &ActivationTarget<'_>) -> bool;
}

pub struct SimpleStrategy;

#[async_trait]
impl ActivationStrategy for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn attempt(&self, target: &ActivationTarget<'_>) -> bool {
        target.simple_sequence()
    }
}

pub struct ThreadAttachStrategy;

#[async_trait]
impl ActivationStrategy for ThreadAttachStrategy {
    fn name(&self) -> &'static str {
        "thread-attach"
    }

    async fn attempt(&self, target: &ActivationTarget<'_>) -> bool {
        let Some(target_thread) = target.target_thread.filter(|t| *t != target.caller_thread) else {
            debug!("Поток окна совпадает с вызывающим или неизвестен, присоединение не нужно");
            return target.simple_sequence();
        };

        // Присоединение и отсоединение без await между ними: привязано к текущему потоку
        let _attached = InputAttachGuard::attach(target.windows, target.caller_thread, target_thread);
        target.simple_sequence()
    }
}

/// Агрессивная стратегия: обнуление lock timeout, разрешение процессу, switch-to и серия попыток
pub struct AggressiveStrategy {
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for AggressiveStrategy {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_delay: Duration::from_millis(15),
        }
    }
}

#[async_trait]
impl ActivationStrategy for AggressiveStrategy {
    fn name(&self) -> &'static str {
        "aggressive"
    }

    async fn attempt(&self, target: &ActivationTarget<'_>) -> bool {
        let _unlocked = ForegroundLockGuard::unlock(target.windows);
        if let Some(pid) = target.process_id {
            target.windows.allow_set_foreground(pid);
        }
        if target.windows.is_minimized(target.handle) {
            target.windows.restore(target.handle);
        }
        target.windows.switch_to_window(target.handle);
        if target.is_foreground() {
            return true;
        }

        for retry in 0..self.retries {
            if target.deadline_passed() {
                debug!("Бюджет активации исчерпан после {} попыток", retry);
                break;
            }
            if !target.windows.is_window(target.handle) {
                return false;
            }
            if target.windows.set_foreground(target.handle) && target.is_foreground() {
                debug!("Агрессивная активация удалась с попытки {}", retry + 1);
                return true;
            }
            let pause = target
                .remaining()
                .map_or(self.retry_delay, |left| left.min(self.retry_delay));
            sleep(pause).await;
        }
        target.is_foreground()
    }
}

/// Стратегии в порядке эскалации
pub fn default_strategies() -> Vec<Box<dyn ActivationStrategy>> {
    vec![
        Box::new(SimpleStrategy),
        Box::new(ThreadAttachStrategy),
        Box::new(AggressiveStrategy::default()),
    ]
}
