use crate::debug_if_enabled;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::super::platform::{LifecycleBackend, LifecycleCallback, LifecycleNotice};
use super::super::tracker::TrackerDelta;
use super::{guarded, push_delta, SubscriptionSlot, WatchContext};

/// Наблюдатель создания и завершения процессов.
///
/// Обогащение нового процесса (окна, путь) выполняет трекер в фоне,
/// здесь только фильтр по имени.
pub struct LifecycleWatcher {
    backend: Arc<dyn LifecycleBackend>,
    context: WatchContext,
    subscription: SubscriptionSlot,
}

impl LifecycleWatcher {
    pub fn new(backend: Arc<dyn LifecycleBackend>, context: WatchContext) -> Self {
        Self {
            backend,
            context,
            subscription: SubscriptionSlot::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            debug!("Наблюдатель процессов уже запущен");
            return Ok(());
        }

        let context = self.context.clone();
        let callback: LifecycleCallback = Arc::new(move |notice| {
            guarded("lifecycle", || Self::on_notice(&context, notice));
        });
        let subscription = self.backend.subscribe(callback)?;
        self.subscription.set(subscription);
        info!("Наблюдатель процессов запущен");
        Ok(())
    }

    pub fn stop(&self) {
        if self.subscription.release() {
            info!("Наблюдатель процессов остановлен");
        }
    }

    fn on_notice(context: &WatchContext, notice: LifecycleNotice) {
        match notice {
            LifecycleNotice::Started { pid, name } => {
                let interesting =
                    context.registry.is_forced(pid) || context.registry.composed_patterns().matches(&name);
                if interesting {
                    debug_if_enabled!("Запущен интересный процесс {} (pid {})", name, pid);
                    push_delta(&context.deltas, TrackerDelta::Spawned { pid, name });
                }
            }
            LifecycleNotice::Exited { pid } => {
                push_delta(&context.deltas, TrackerDelta::Exited { pid });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform::VirtualDesktop;
    use crate::services::registry::{DiscoveryFilter, DiscoveryRegistry};
    use crate::services::title_cache::TitleCache;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn context() -> (WatchContext, mpsc::UnboundedReceiver<TrackerDelta>) {
        let (deltas, receiver) = mpsc::unbounded_channel();
        let registry = Arc::new(DiscoveryRegistry::new());
        registry.register_watch(DiscoveryFilter::include(["pol*"]));
        let context = WatchContext {
            registry,
            tracked: Arc::new(Mutex::new(HashMap::new())),
            title_cache: Arc::new(TitleCache::new()),
            deltas,
        };
        (context, receiver)
    }

    #[test]
    fn test_only_interesting_spawns_are_forwarded() {
        let desktop = Arc::new(VirtualDesktop::new());
        let (context, mut receiver) = context();
        let watcher = LifecycleWatcher::new(desktop.clone(), context);
        watcher.start().unwrap();

        desktop.spawn_process("notepad.exe");
        let pid = desktop.spawn_process("polproxy.exe");
        desktop.kill_process(pid);

        assert!(matches!(receiver.try_recv(), Ok(TrackerDelta::Spawned { name, .. }) if name == "polproxy.exe"));
        assert!(matches!(receiver.try_recv(), Ok(TrackerDelta::Exited { pid: p }) if p == pid));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_start_is_idempotent_and_stop_releases_once() {
        let desktop = Arc::new(VirtualDesktop::new());
        let (context, _receiver) = context();
        let watcher = LifecycleWatcher::new(desktop.clone(), context);

        watcher.stop();
        watcher.start().unwrap();
        watcher.start().unwrap();
        assert_eq!(desktop.active_subscriptions(), 1);

        watcher.stop();
        watcher.stop();
        assert_eq!(desktop.active_subscriptions(), 0);
        assert!(!watcher.is_running());
    }
}
