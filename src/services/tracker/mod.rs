//! ProcessTracker: the authoritative map of tracked processes.
//!
//! One tokio task owns the reconcile loop. It selects over cancellation,
//! the delta channel fed by native watchers, refresh requests and the poll
//! interval. Ticks and deltas are serialized by an async gate; the map itself
//! sits behind a short-lived `parking_lot::Mutex`. Events are collected under
//! the lock and handed to the `Dispatcher` after it is released.

mod delta;
mod reconcile;

pub use self::delta::TrackerDelta;
pub use self::reconcile::reconcile;

use crate::debug_if_enabled;
use crate::error::{MonitorError, Result};
use crate::events::{ProcessRecord, SharedRecord, TrackerEvent};
use crate::monitor_error;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::dispatcher::Dispatcher;
use super::platform::Platform;
use super::registry::{DiscoveryFilter, DiscoveryRegistry, WatchId};
use super::snapshot::ProcessSnapshotProvider;
use super::title_cache::TitleCache;
use super::watchers::{
    EventWatchers, LifecycleWatcher, ProcessMap, TitleChangeWatcher, WatchContext, WatcherStatus,
};

/// Нижняя граница интервала опроса
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Настройки трекера
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    /// Бюджет на перечисление окон внутри одного снимка
    pub enumeration_timeout: Duration,
    /// Бюджет на весь тик опроса
    pub tick_timeout: Duration,
    /// Запись без подтверждений дольше этого считается мёртвой
    pub stale_after: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            enumeration_timeout: Duration::from_secs(2),
            tick_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Идентификатор подписчика на события
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&TrackerEvent) + Send + Sync>;

struct TrackerInner {
    snapshots: ProcessSnapshotProvider,
    registry: Arc<DiscoveryRegistry>,
    tracked: ProcessMap,
    title_cache: Arc<TitleCache>,
    dispatcher: Arc<dyn Dispatcher>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    // Сериализует тики и обработку дельт
    gate: tokio::sync::Mutex<()>,
    refresh: Notify,
    pending: DashMap<u32, JoinHandle<()>>,
    settings: TrackerSettings,
}

/// Запущенный цикл мониторинга
struct MonitorRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    watchers: EventWatchers,
    poll_interval: Duration,
}

pub struct ProcessTracker {
    inner: Arc<TrackerInner>,
    platform: Platform,
    run: Mutex<Option<MonitorRun>>,
}

impl ProcessTracker {
    pub fn new(platform: Platform, dispatcher: Arc<dyn Dispatcher>, settings: TrackerSettings) -> Self {
        let snapshots = ProcessSnapshotProvider::new(
            platform.processes.clone(),
            platform.windows.clone(),
            settings.enumeration_timeout,
        );
        Self {
            inner: Arc::new(TrackerInner {
                snapshots,
                registry: Arc::new(DiscoveryRegistry::new()),
                tracked: Arc::new(Mutex::new(HashMap::new())),
                title_cache: Arc::new(TitleCache::new()),
                dispatcher,
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                gate: tokio::sync::Mutex::new(()),
                refresh: Notify::new(),
                pending: DashMap::new(),
                settings,
            }),
            platform,
            run: Mutex::new(None),
        }
    }

    /// Запустить опрос и push-наблюдателей. Повторный вызов ничего не делает.
    ///
    /// Требует активного tokio runtime.
    pub fn start_monitoring(&self, poll_interval: Duration) -> Result<WatcherStatus> {
        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let mut run = self.run.lock();
        if let Some(existing) = run.as_ref() {
            debug!("Мониторинг уже запущен");
            return Ok(existing.watchers.status());
        }

        let poll_interval = if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Интервал опроса {:?} меньше минимального, используется {:?}",
                poll_interval, MIN_POLL_INTERVAL
            );
            MIN_POLL_INTERVAL
        } else {
            poll_interval
        };

        let (deltas_tx, deltas_rx) = mpsc::unbounded_channel();
        let context = WatchContext {
            registry: Arc::clone(&self.inner.registry),
            tracked: Arc::clone(&self.inner.tracked),
            title_cache: Arc::clone(&self.inner.title_cache),
            deltas: deltas_tx.clone(),
        };
        let watchers = EventWatchers::new(
            LifecycleWatcher::new(self.platform.lifecycle.clone(), context.clone()),
            TitleChangeWatcher::new(self.platform.title_hook.clone(), self.platform.windows.clone(), context),
        );
        let status = watchers.start();
        if status.polling_only() {
            warn!("Push-уведомления недоступны, трекер работает только опросом");
        }

        let cancel = CancellationToken::new();
        let task = runtime.spawn(Arc::clone(&self.inner).run_loop(
            cancel.clone(),
            deltas_tx,
            deltas_rx,
            poll_interval,
            status.title_change,
        ));

        info!(
            "Мониторинг запущен: интервал {:?}, процессы {}, заголовки {}",
            poll_interval,
            if status.lifecycle { "push" } else { "опрос" },
            if status.title_change { "push" } else { "опрос" }
        );
        *run = Some(MonitorRun {
            cancel,
            task,
            watchers,
            poll_interval,
        });
        Ok(status)
    }

    /// Остановить всё. Безопасно вызывать многократно и без запуска.
    pub fn stop_monitoring(&self) {
        let run = self.run.lock().take();
        if let Some(run) = run {
            run.cancel.cancel();
            // Прерывает и тик, который сейчас выполняется
            run.task.abort();
            run.watchers.stop();
            info!("Мониторинг остановлен");
        }

        let pending: Vec<u32> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        for pid in pending {
            if let Some((_, task)) = self.inner.pending.remove(&pid) {
                task.abort();
            }
        }
        self.inner.title_cache.clear();
    }

    pub fn is_monitoring(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Фактический интервал опроса, если мониторинг запущен
    pub fn poll_interval(&self) -> Option<Duration> {
        self.run.lock().as_ref().map(|run| run.poll_interval)
    }

    pub fn watcher_status(&self) -> WatcherStatus {
        self.run
            .lock()
            .as_ref()
            .map(|run| run.watchers.status())
            .unwrap_or_default()
    }

    /// Внеочередной тик без смены интервала
    pub fn request_immediate_refresh(&self) {
        if self.is_monitoring() {
            self.inner.refresh.notify_one();
        } else {
            debug!("Запрос обновления проигнорирован: мониторинг не запущен");
        }
    }

    /// Выполнить один тик опроса прямо сейчас
    pub async fn poll_once(&self) -> Result<()> {
        let title_watch = self.watcher_status().title_change;
        self.inner.poll_once(title_watch).await
    }

    pub fn register_discovery_watch(&self, filter: DiscoveryFilter) -> WatchId {
        let id = self.inner.registry.register_watch(filter);
        self.request_immediate_refresh();
        id
    }

    pub fn unregister_discovery_watch(&self, id: WatchId) -> bool {
        let removed = self.inner.registry.unregister_watch(id);
        if removed {
            self.request_immediate_refresh();
        }
        removed
    }

    pub fn track_pid(&self, pid: u32) {
        self.inner.registry.track_pid(pid);
        self.request_immediate_refresh();
    }

    pub fn untrack_pid(&self, pid: u32) {
        self.inner.registry.untrack_pid(pid);
        self.request_immediate_refresh();
    }

    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.inner.registry
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TrackerEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Все отслеживаемые записи, по возрастанию pid
    pub fn processes(&self) -> Vec<SharedRecord> {
        let tracked = self.inner.tracked.lock();
        let mut pids: Vec<&u32> = tracked.keys().collect();
        pids.sort_unstable();
        pids.into_iter().filter_map(|pid| tracked.get(pid).cloned()).collect()
    }

    /// Записи, подтверждённые не позже порога устаревания
    pub fn live_processes(&self) -> Vec<SharedRecord> {
        let now = Instant::now();
        let threshold = self.inner.settings.stale_after;
        self.processes()
            .into_iter()
            .filter(|record| !record.read().is_stale(now, threshold))
            .collect()
    }

    pub fn get(&self, pid: u32) -> Option<SharedRecord> {
        self.inner.tracked.lock().get(&pid).cloned()
    }

    pub fn title_cache_len(&self) -> usize {
        self.inner.title_cache.len()
    }

    pub fn pending_enrichments(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Drop for ProcessTracker {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

impl TrackerInner {
    async fn run_loop(
        self: Arc<Self>,
        cancel: CancellationToken,
        deltas_tx: mpsc::UnboundedSender<TrackerDelta>,
        mut deltas: mpsc::UnboundedReceiver<TrackerDelta>,
        poll_interval: Duration,
        title_watch: bool,
    ) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Цикл трекера завершён");
                    break;
                }
                Some(delta) = deltas.recv() => {
                    self.handle_delta(delta, &deltas_tx).await;
                }
                _ = self.refresh.notified() => {
                    debug!("Внеочередной тик опроса");
                    self.tick(title_watch).await;
                }
                _ = ticker.tick() => {
                    self.tick(title_watch).await;
                }
            }
        }
    }

    async fn tick(&self, title_watch: bool) {
        if let Err(e) = self.poll_once(title_watch).await {
            error!("Тик опроса не удался: {}", e);
        }
    }

    async fn poll_once(&self, title_watch: bool) -> Result<()> {
        let _gate = self.gate.lock().await;
        let started = Instant::now();

        let patterns = self.registry.composed_patterns();
        let forced = self.registry.forced_pids();
        let snapshots = self.snapshots.clone();

        let job = tokio::task::spawn_blocking(move || -> Result<Vec<ProcessRecord>> {
            let mut records = if patterns.active {
                snapshots.snapshot_matching(|name| patterns.matches(name))?
            } else {
                Vec::new()
            };
            let missing: Vec<u32> = forced
                .into_iter()
                .filter(|pid| !records.iter().any(|record| record.process_id == *pid))
                .collect();
            if !missing.is_empty() {
                records.extend(snapshots.snapshot(Some(&missing))?);
            }
            Ok(records)
        });

        let fresh = timeout(self.settings.tick_timeout, job)
            .await
            .map_err(|_| monitor_error!(internal, "снимок не уложился в {:?}", self.settings.tick_timeout))?
            .map_err(|e| monitor_error!(internal, "задача снимка прервана: {}", e))??;

        let events = {
            let mut tracked = self.tracked.lock();
            reconcile(&mut tracked, fresh)
        };

        let mut live = HashSet::new();
        for record in self.tracked.lock().values() {
            for window in &record.read().windows {
                live.insert(window.handle);
                if title_watch {
                    self.title_cache.seed(window.handle, &window.title);
                }
            }
        }
        // Окна, закрытые при живом процессе, и заголовки, не принятые трекером
        self.title_cache.retain(|handle| live.contains(handle));

        trace!("Тик опроса: {} событий за {:?}", events.len(), started.elapsed());
        self.emit(events);
        Ok(())
    }

    async fn handle_delta(&self, delta: TrackerDelta, deltas_tx: &mpsc::UnboundedSender<TrackerDelta>) {
        let _gate = self.gate.lock().await;
        debug_if_enabled!("Дельта трекера: {}", delta);

        let events = match delta {
            TrackerDelta::Spawned { pid, name } => {
                if self.tracked.lock().contains_key(&pid) || self.pending.contains_key(&pid) {
                    trace!("pid {} уже отслеживается", pid);
                } else {
                    let task = self.spawn_enrichment(pid, name, deltas_tx.clone());
                    self.pending.insert(pid, task);
                }
                Vec::new()
            }
            TrackerDelta::Enriched { pid, record } => {
                // Без ожидающей задачи обогащение отменено: процесс уже завершился
                if self.pending.remove(&pid).is_none() {
                    trace!("Обогащение pid {} отменено, результат отброшен", pid);
                    return;
                }
                match record {
                    Some(record) => {
                        let mut tracked = self.tracked.lock();
                        if tracked.contains_key(&pid) {
                            Vec::new()
                        } else {
                            let shared = record.into_shared();
                            tracked.insert(pid, shared.clone());
                            vec![TrackerEvent::Detected(shared)]
                        }
                    }
                    None => {
                        trace!("Процесс {} исчез до обогащения", pid);
                        Vec::new()
                    }
                }
            }
            TrackerDelta::Exited { pid } => {
                // Обогащение ещё не закончилось: процесс так и не появится
                if let Some((_, task)) = self.pending.remove(&pid) {
                    task.abort();
                }
                let removed = self.tracked.lock().remove(&pid);
                let events: Vec<TrackerEvent> = removed.into_iter().map(TrackerEvent::Terminated).collect();
                self.forget_titles(&events);
                events
            }
            TrackerDelta::TitleChanged { pid, handle, title } => {
                let record = self.tracked.lock().get(&pid).cloned();
                match record {
                    Some(record) => {
                        {
                            let mut record = record.write();
                            record.apply_title(handle, &title);
                            record.touch(Instant::now());
                        }
                        vec![TrackerEvent::WindowTitleChanged {
                            process_id: pid,
                            handle,
                            title,
                        }]
                    }
                    None => Vec::new(),
                }
            }
        };

        self.emit(events);
    }

    fn spawn_enrichment(
        &self,
        pid: u32,
        name: String,
        deltas: mpsc::UnboundedSender<TrackerDelta>,
    ) -> JoinHandle<()> {
        let snapshots = self.snapshots.clone();
        tokio::spawn(async move {
            let fetched = tokio::task::spawn_blocking(move || snapshots.snapshot(Some(&[pid]))).await;
            let record = match fetched {
                Ok(Ok(mut records)) => records.pop(),
                Ok(Err(e)) => {
                    // Таблица процессов недоступна: хватит и имени из уведомления
                    warn!("Не удалось обогатить процесс {}: {}", pid, e);
                    Some(ProcessRecord::new(pid, name))
                }
                Err(e) => {
                    debug!("Задача обогащения pid {} прервана: {}", pid, e);
                    return;
                }
            };
            if deltas.send(TrackerDelta::Enriched { pid, record }).is_err() {
                trace!("Трекер остановлен до завершения обогащения pid {}", pid);
            }
        })
    }

    fn forget_titles(&self, events: &[TrackerEvent]) {
        for event in events {
            if let TrackerEvent::Terminated(record) = event {
                for window in &record.read().windows {
                    self.title_cache.forget(window.handle);
                }
            }
        }
    }

    fn emit(&self, events: Vec<TrackerEvent>) {
        if events.is_empty() {
            return;
        }
        for event in &events {
            debug_if_enabled!("Событие трекера: {}", event);
        }

        let listeners: Vec<Listener> = self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        if listeners.is_empty() {
            return;
        }
        self.dispatcher.invoke_async(Box::new(move || {
            for event in &events {
                for listener in &listeners {
                    if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                        error!("Паника в подписчике на {:?} подавлена", event.kind());
                    }
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TrackerEventKind, WindowHandle};
    use crate::services::dispatcher::InlineDispatcher;
    use crate::services::platform::VirtualDesktop;

    type Seen = Arc<Mutex<Vec<(TrackerEventKind, u32)>>>;

    fn setup(settings: TrackerSettings) -> (Arc<VirtualDesktop>, ProcessTracker, Seen) {
        let desktop = Arc::new(VirtualDesktop::new());
        let tracker = ProcessTracker::new(
            Platform::from_virtual(desktop.clone()),
            Arc::new(InlineDispatcher),
            settings,
        );
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(move |event| sink.lock().push((event.kind(), event.process_id())));
        (desktop, tracker, seen)
    }

    fn count(seen: &Seen, kind: TrackerEventKind) -> usize {
        seen.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_detect_then_terminate() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");
        desktop.add_process(200, "notepad.exe");

        tracker.poll_once().await.unwrap();
        assert_eq!(*seen.lock(), vec![(TrackerEventKind::Detected, 100)]);
        assert!(tracker.get(100).is_some());

        desktop.remove_process_silently(100);
        tracker.poll_once().await.unwrap();
        assert_eq!(seen.lock()[1], (TrackerEventKind::Terminated, 100));
        assert!(tracker.processes().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_tick_emits_nothing() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");
        let handle = desktop.add_window(100, "FINAL FANTASY XI");

        tracker.poll_once().await.unwrap();
        tracker.poll_once().await.unwrap();
        assert_eq!(seen.lock().len(), 1);

        desktop.set_hung(handle, true);
        tracker.poll_once().await.unwrap();
        assert_eq!(count(&seen, TrackerEventKind::Updated), 1);
        assert!(!tracker.get(100).unwrap().read().is_responding);
    }

    #[tokio::test]
    async fn test_forced_pid_survives_until_untracked() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        desktop.add_process(300, "notepad.exe");
        tracker.track_pid(300);

        tracker.poll_once().await.unwrap();
        tracker.poll_once().await.unwrap();
        assert!(tracker.get(300).is_some());
        assert_eq!(count(&seen, TrackerEventKind::Detected), 1);

        tracker.untrack_pid(300);
        tracker.poll_once().await.unwrap();
        assert!(tracker.get(300).is_none());
        assert_eq!(count(&seen, TrackerEventKind::Terminated), 1);
    }

    #[tokio::test]
    async fn test_title_push_fires_once() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");
        let handle = desktop.add_window(100, "FINAL FANTASY XI");

        let status = tracker.start_monitoring(Duration::from_secs(60)).unwrap();
        assert!(status.title_change);
        assert!(wait_until(|| tracker.get(100).is_some()).await);

        desktop.set_title(handle, "Zone: Bastok");
        assert!(wait_until(|| count(&seen, TrackerEventKind::WindowTitleChanged) == 1).await);
        assert_eq!(tracker.get(100).unwrap().read().main_window_title, "Zone: Bastok");

        desktop.renotify_title(handle);
        desktop.set_title(handle, "Zone: Bastok");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&seen, TrackerEventKind::WindowTitleChanged), 1);
        assert_eq!(count(&seen, TrackerEventKind::Updated), 0);

        tracker.stop_monitoring();
    }

    #[tokio::test]
    async fn test_lifecycle_push_detects_and_terminates() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["pol*"]));
        tracker.start_monitoring(Duration::from_secs(60)).unwrap();

        let pid = desktop.spawn_process("polproxy.exe");
        assert!(wait_until(|| tracker.get(pid).is_some()).await);
        assert!(wait_until(|| tracker.pending_enrichments() == 0).await);

        desktop.kill_process(pid);
        assert!(wait_until(|| tracker.get(pid).is_none()).await);
        assert_eq!(*seen.lock(), vec![(TrackerEventKind::Detected, pid), (TrackerEventKind::Terminated, pid)]);

        tracker.stop_monitoring();
    }

    #[tokio::test]
    async fn test_double_stop_is_harmless() {
        let (desktop, tracker, _seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");
        desktop.add_window(100, "Game");

        tracker.start_monitoring(Duration::from_secs(60)).unwrap();
        assert!(wait_until(|| tracker.title_cache_len() > 0).await);
        assert_eq!(desktop.active_subscriptions(), 2);

        tracker.stop_monitoring();
        tracker.stop_monitoring();
        assert!(!tracker.is_monitoring());
        assert_eq!(tracker.title_cache_len(), 0);
        assert_eq!(desktop.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_failed_hooks_degrade_to_polling() {
        let (desktop, tracker, _seen) = setup(TrackerSettings::default());
        desktop.fail_hooks(true);
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");

        let status = tracker.start_monitoring(Duration::from_secs(60)).unwrap();
        assert!(status.polling_only());
        assert!(wait_until(|| tracker.get(100).is_some()).await);
        tracker.stop_monitoring();
    }

    #[tokio::test]
    async fn test_interval_is_clamped_and_refresh_is_immediate() {
        let (desktop, tracker, _seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));

        tracker.start_monitoring(Duration::from_millis(10)).unwrap();
        assert_eq!(tracker.poll_interval(), Some(MIN_POLL_INTERVAL));
        tracker.stop_monitoring();

        tracker.start_monitoring(Duration::from_secs(3600)).unwrap();
        // Первый тик интервала срабатывает сразу; ждём его и добавляем процесс после
        tokio::time::sleep(Duration::from_millis(50)).await;
        desktop.add_process(100, "game.exe");
        tracker.request_immediate_refresh();
        assert!(wait_until(|| tracker.get(100).is_some()).await);
        tracker.stop_monitoring();
    }

    #[tokio::test]
    async fn test_stale_records_excluded_from_live_view() {
        let settings = TrackerSettings {
            stale_after: Duration::from_millis(20),
            ..TrackerSettings::default()
        };
        let (desktop, tracker, _seen) = setup(settings);
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");

        tracker.poll_once().await.unwrap();
        assert_eq!(tracker.live_processes().len(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(tracker.live_processes().is_empty());
        assert_eq!(tracker.processes().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_title_push_ignored() {
        let (_desktop, tracker, seen) = setup(TrackerSettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        tracker
            .inner
            .handle_delta(
                TrackerDelta::TitleChanged {
                    pid: 999,
                    handle: WindowHandle(0x10),
                    title: "Zone: Jeuno".to_string(),
                },
                &tx,
            )
            .await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        tracker.subscribe(|_| panic!("сбой подписчика"));
        let after = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&after);
        tracker.subscribe(move |_| *counter.lock() += 1);
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));

        desktop.add_process(100, "game.exe");
        tracker.poll_once().await.unwrap();
        desktop.remove_process_silently(100);
        tracker.poll_once().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![(TrackerEventKind::Detected, 100), (TrackerEventKind::Terminated, 100)]
        );
        assert_eq!(*after.lock(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_after_exit_is_discarded() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        desktop.add_process(4242, "pol.exe");

        // Обогащение завершилось, но Exited пришёл раньше его результата
        tracker
            .inner
            .handle_delta(TrackerDelta::Spawned { pid: 4242, name: "pol.exe".into() }, &tx)
            .await;
        let enriched = rx.recv().await.unwrap();
        assert!(matches!(enriched, TrackerDelta::Enriched { pid: 4242, record: Some(_) }));

        tracker.inner.handle_delta(TrackerDelta::Exited { pid: 4242 }, &tx).await;
        tracker.inner.handle_delta(enriched, &tx).await;
        assert!(tracker.get(4242).is_none());
        assert_eq!(tracker.pending_enrichments(), 0);

        // Неожиданный результат без запущенного обогащения тоже отбрасывается
        tracker
            .inner
            .handle_delta(
                TrackerDelta::Enriched {
                    pid: 7,
                    record: Some(ProcessRecord::new(7, "pol.exe")),
                },
                &tx,
            )
            .await;
        assert!(tracker.get(7).is_none());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_detects_spawned_process() {
        let (desktop, tracker, seen) = setup(TrackerSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        desktop.add_process(4242, "pol.exe");

        tracker
            .inner
            .handle_delta(TrackerDelta::Spawned { pid: 4242, name: "pol.exe".into() }, &tx)
            .await;
        let enriched = rx.recv().await.unwrap();
        tracker.inner.handle_delta(enriched, &tx).await;

        assert!(tracker.get(4242).is_some());
        assert_eq!(*seen.lock(), vec![(TrackerEventKind::Detected, 4242)]);
    }

    #[tokio::test]
    async fn test_closed_window_leaves_title_cache() {
        let (desktop, tracker, _seen) = setup(TrackerSettings::default());
        tracker.register_discovery_watch(DiscoveryFilter::include(["game.exe"]));
        desktop.add_process(100, "game.exe");
        desktop.add_window(100, "FINAL FANTASY XI");
        let config = desktop.add_window(100, "Config");

        tracker.start_monitoring(Duration::from_secs(60)).unwrap();
        assert!(wait_until(|| tracker.title_cache_len() == 2).await);

        desktop.destroy_window(config);
        tracker.request_immediate_refresh();
        assert!(wait_until(|| tracker.title_cache_len() == 1).await);
        assert!(tracker.get(100).is_some());
        tracker.stop_monitoring();
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let desktop = Arc::new(VirtualDesktop::new());
        let tracker = ProcessTracker::new(
            Platform::from_virtual(desktop),
            Arc::new(InlineDispatcher),
            TrackerSettings::default(),
        );
        assert!(matches!(
            tracker.start_monitoring(Duration::from_secs(1)),
            Err(MonitorError::NoRuntime)
        ));
    }
}
