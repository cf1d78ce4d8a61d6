use crate::error::Result;
use crate::events::WindowHandle;
use crate::trace_if_enabled;
use std::sync::Arc;
use tracing::{debug, info};

use super::super::platform::{TitleCallback, TitleHookBackend, WindowSystem};
use super::super::tracker::TrackerDelta;
use super::{guarded, push_delta, SubscriptionSlot, WatchContext};

/// Наблюдатель смены заголовков окон отслеживаемых процессов
pub struct TitleChangeWatcher {
    backend: Arc<dyn TitleHookBackend>,
    windows: Arc<dyn WindowSystem>,
    context: WatchContext,
    subscription: SubscriptionSlot,
}

impl TitleChangeWatcher {
    pub fn new(
        backend: Arc<dyn TitleHookBackend>,
        windows: Arc<dyn WindowSystem>,
        context: WatchContext,
    ) -> Self {
        Self {
            backend,
            windows,
            context,
            subscription: SubscriptionSlot::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            debug!("Наблюдатель заголовков уже запущен");
            return Ok(());
        }

        let context = self.context.clone();
        let windows = Arc::clone(&self.windows);
        let callback: TitleCallback = Arc::new(move |handle| {
            guarded("title", || Self::on_name_change(&context, windows.as_ref(), handle));
        });
        let subscription = self.backend.install(callback)?;
        self.subscription.set(subscription);
        info!("Наблюдатель заголовков запущен");
        Ok(())
    }

    /// Снять хук и очистить кэш заголовков. Безопасно вызывать повторно.
    pub fn stop(&self) {
        if self.subscription.release() {
            info!("Наблюдатель заголовков остановлен");
        }
        self.context.title_cache.clear();
    }

    fn on_name_change(context: &WatchContext, windows: &dyn WindowSystem, handle: WindowHandle) {
        let Some(pid) = windows.window_process_id(handle) else {
            return;
        };
        let tracked = context.tracked.lock().contains_key(&pid);
        if !tracked && !context.registry.is_forced(pid) {
            return;
        }

        let title = match windows.window_title(handle) {
            Ok(title) => title,
            Err(e) => {
                trace_if_enabled!("Заголовок окна {} недоступен: {}", handle, e);
                return;
            }
        };

        if context.title_cache.update(handle, &title) {
            push_delta(&context.deltas, TrackerDelta::TitleChanged { pid, handle, title });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProcessRecord;
    use crate::services::platform::VirtualDesktop;
    use crate::services::registry::DiscoveryRegistry;
    use crate::services::title_cache::TitleCache;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    #[test]
    fn test_title_push_deduplicated_and_filtered() {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(100, "game.exe");
        desktop.add_process(200, "other.exe");
        let game = desktop.add_window(100, "FINAL FANTASY XI");
        let other = desktop.add_window(200, "Other");

        let (deltas, mut receiver) = mpsc::unbounded_channel();
        let tracked = Arc::new(Mutex::new(HashMap::new()));
        tracked.lock().insert(100, ProcessRecord::new(100, "game.exe").into_shared());
        let cache = Arc::new(TitleCache::new());
        let context = WatchContext {
            registry: Arc::new(DiscoveryRegistry::new()),
            tracked,
            title_cache: cache.clone(),
            deltas,
        };
        let watcher = TitleChangeWatcher::new(desktop.clone(), desktop.clone(), context);
        watcher.start().unwrap();

        desktop.set_title(game, "Zone: Bastok");
        desktop.renotify_title(game);
        desktop.set_title(other, "Ignored");

        match receiver.try_recv() {
            Ok(TrackerDelta::TitleChanged { pid, handle, title }) => {
                assert_eq!(pid, 100);
                assert_eq!(handle, game);
                assert_eq!(title, "Zone: Bastok");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(receiver.try_recv().is_err());

        watcher.stop();
        assert!(cache.is_empty());
        assert_eq!(desktop.active_subscriptions(), 0);
    }

    #[test]
    fn test_panic_in_callback_is_swallowed() {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(100, "game.exe");
        let broken = desktop.add_window(100, "Broken");
        let game = desktop.add_window(100, "FINAL FANTASY XI");
        desktop.panic_on_title(broken);

        let (deltas, mut receiver) = mpsc::unbounded_channel();
        let tracked = Arc::new(Mutex::new(HashMap::new()));
        tracked.lock().insert(100, ProcessRecord::new(100, "game.exe").into_shared());
        let context = WatchContext {
            registry: Arc::new(DiscoveryRegistry::new()),
            tracked,
            title_cache: Arc::new(TitleCache::new()),
            deltas,
        };
        let watcher = TitleChangeWatcher::new(desktop.clone(), desktop.clone(), context);
        watcher.start().unwrap();

        // Паника не выходит из колбэка, хук продолжает работать
        desktop.set_title(broken, "Still broken");
        assert!(watcher.is_running());
        desktop.set_title(game, "Zone: Windurst");

        assert!(matches!(
            receiver.try_recv(),
            Ok(TrackerDelta::TitleChanged { handle, .. }) if handle == game
        ));
        assert!(receiver.try_recv().is_err());
        watcher.stop();
    }
}
