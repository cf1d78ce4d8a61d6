//! Push-based watchers feeding the tracker.
//!
//! Native callbacks never touch tracker state directly: they filter, then
//! enqueue a `TrackerDelta`. Every callback body runs under `catch_unwind`.

mod lifecycle;
mod title_change;

pub use self::lifecycle::LifecycleWatcher;
pub use self::title_change::TitleChangeWatcher;

use crate::events::SharedRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, trace, warn};

use super::platform::NativeSubscription;
use super::registry::DiscoveryRegistry;
use super::title_cache::TitleCache;
use super::tracker::TrackerDelta;

/// Карта отслеживаемых процессов, общая для трекера и наблюдателей
pub type ProcessMap = Arc<Mutex<HashMap<u32, SharedRecord>>>;

/// Выполнить тело нативного колбэка, подавив панику
pub(crate) fn guarded(label: &str, body: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(body)).is_err() {
        error!("Паника в колбэке {} подавлена", label);
    }
}

pub(crate) fn push_delta(sender: &UnboundedSender<TrackerDelta>, delta: TrackerDelta) {
    if let Err(e) = sender.send(delta) {
        trace!("Трекер остановлен, дельта отброшена: {}", e.0);
    }
}

/// Нативная подписка, которая освобождается ровно один раз
#[derive(Default)]
pub(crate) struct SubscriptionSlot {
    inner: Mutex<Option<Box<dyn NativeSubscription>>>,
}

impl SubscriptionSlot {
    pub fn is_active(&self) -> bool {
        self.inner.lock().is_some()
    }

    pub fn set(&self, subscription: Box<dyn NativeSubscription>) {
        let previous = self.inner.lock().replace(subscription);
        if let Some(previous) = previous {
            previous.release();
        }
    }

    /// `true`, если подписка была и теперь освобождена
    pub fn release(&self) -> bool {
        // Освобождаем вне блокировки: release может ждать завершения нативного потока
        let taken = self.inner.lock().take();
        match taken {
            Some(subscription) => {
                subscription.release();
                true
            }
            None => false,
        }
    }
}

/// Состояние наблюдателей для диагностики
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub lifecycle: bool,
    pub title_change: bool,
}

impl WatcherStatus {
    pub fn polling_only(&self) -> bool {
        !self.lifecycle && !self.title_change
    }
}

/// Оба наблюдателя с общим жизненным циклом.
///
/// `Drop` вызывает `stop`, так что нативные ресурсы не переживают владельца.
pub struct EventWatchers {
    lifecycle: LifecycleWatcher,
    title_change: TitleChangeWatcher,
}

impl EventWatchers {
    pub fn new(
        lifecycle: LifecycleWatcher,
        title_change: TitleChangeWatcher,
    ) -> Self {
        Self { lifecycle, title_change }
    }

    /// Запустить оба наблюдателя. Ошибки не фатальны: трекер продолжит опрос.
    pub fn start(&self) -> WatcherStatus {
        if let Err(e) = self.lifecycle.start() {
            warn!("Наблюдатель процессов не запущен, остаётся только опрос: {}", e);
        }
        if let Err(e) = self.title_change.start() {
            warn!("Наблюдатель заголовков не запущен, остаётся только опрос: {}", e);
        }
        self.status()
    }

    pub fn stop(&self) {
        self.lifecycle.stop();
        self.title_change.stop();
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            lifecycle: self.lifecycle.is_running(),
            title_change: self.title_change.is_running(),
        }
    }
}

impl Drop for EventWatchers {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Общие зависимости наблюдателей
#[derive(Clone)]
pub struct WatchContext {
    pub registry: Arc<DiscoveryRegistry>,
    pub tracked: ProcessMap,
    pub title_cache: Arc<TitleCache>,
    pub deltas: UnboundedSender<TrackerDelta>,
}
