//! In-memory desktop used by dry-run mode and by tests.
//!
//! Implements every platform trait and lets the caller script process
//! lifecycle, window titles and foreground behaviour.

use crate::error::{MonitorError, Result};
use crate::events::WindowHandle;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::interval;
use tracing::info;

use super::r#trait::{
    LifecycleBackend, LifecycleCallback, LifecycleNotice, NativeSubscription, QueryError,
    ProcessAccess, ProcessTable, TitleCallback, TitleHookBackend, WindowSystem,
};

/// Поток «вызывающего» кода в виртуальной среде
pub const CALLER_THREAD: u32 = 1;

/// Как виртуальная ОС реагирует на попытки вывести окно на передний план
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundPolicy {
    /// Любой set_foreground срабатывает
    Allow,
    /// Срабатывает только при присоединённом вводе потоков
    RequireAttach,
    /// Срабатывает только при нулевом lock timeout и разрешении AllowSetForeground
    RequireUnlock,
    /// Защита от кражи фокуса блокирует всё
    DenyAll,
}

#[derive(Debug, Clone)]
pub struct VirtualProcess {
    pub pid: u32,
    pub name: String,
    pub path: String,
    pub start_time: SystemTime,
    pub access: ProcessAccess,
    pub name_denied: bool,
}

#[derive(Debug, Clone)]
pub struct VirtualWindow {
    pub handle: WindowHandle,
    pub pid: u32,
    pub thread_id: u32,
    pub title: String,
    pub class: String,
    pub visible: bool,
    pub minimized: bool,
    pub hung: bool,
    pub fullscreen: bool,
    pub destroy_on_activate: bool,
    /// Чтение заголовка паникует (сбой внутри нативного колбэка)
    pub panic_on_title: bool,
}

struct DesktopState {
    processes: BTreeMap<u32, VirtualProcess>,
    // z-порядок: первый элемент сверху
    windows: Vec<VirtualWindow>,
    foreground: Option<WindowHandle>,
    policy: ForegroundPolicy,
    lock_timeout: u32,
    allowed_pid: Option<u32>,
    attached: HashSet<(u32, u32)>,
    next_pid: u32,
    next_handle: isize,
    // Задержка на каждый запрос владельца окна (медленная оконная система)
    query_delay: Duration,
}

type Slot<T> = Arc<Mutex<Option<T>>>;

pub struct VirtualDesktop {
    state: Mutex<DesktopState>,
    lifecycle: Slot<LifecycleCallback>,
    title_hook: Slot<TitleCallback>,
    active_subscriptions: Arc<AtomicUsize>,
    hooks_fail: AtomicBool,
}

impl Default for VirtualDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDesktop {
    pub const DEFAULT_LOCK_TIMEOUT_MS: u32 = 200_000;

    pub fn new() -> Self {
        Self {
            state: Mutex::new(DesktopState {
                processes: BTreeMap::new(),
                windows: Vec::new(),
                foreground: None,
                policy: ForegroundPolicy::Allow,
                lock_timeout: Self::DEFAULT_LOCK_TIMEOUT_MS,
                allowed_pid: None,
                attached: HashSet::new(),
                next_pid: 1000,
                next_handle: 0x10000,
                query_delay: Duration::ZERO,
            }),
            lifecycle: Arc::new(Mutex::new(None)),
            title_hook: Arc::new(Mutex::new(None)),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
            hooks_fail: AtomicBool::new(false),
        }
    }

    /// Рабочий стол с парой процессов игрового клиента для dry-run режима
    pub fn with_demo_processes() -> Self {
        let desktop = Self::new();
        let pol = desktop.insert_process(4100, "pol.exe");
        desktop.add_window(pol, "PlayOnline Viewer");
        let ffxi = desktop.insert_process(4200, "ffxi-boot.exe");
        let main = desktop.add_window(ffxi, "FINAL FANTASY XI");
        desktop.focus(main);
        let helper = desktop.insert_process(4300, "windower.exe");
        desktop.add_window(helper, "Windower");
        desktop
    }

    /// Эмуляция активности: смена заголовков и перезапуск вспомогательного процесса
    pub async fn run_demo(self: Arc<Self>) {
        info!("Dry-run режим - VirtualDesktop работает в режиме эмуляции");

        let zones = ["Zone: Bastok", "Zone: San d'Oria", "Zone: Windurst", "Zone: Jeuno"];
        let mut zone_index = 0;
        let mut helper: Option<u32> = None;
        let mut ticker = interval(Duration::from_secs(10));

        loop {
            ticker.tick().await;

            let main = self
                .windows_of(4200)
                .into_iter()
                .next();
            if let Some(handle) = main {
                info!("Dry-run: эмулируем смену заголовка на: {}", zones[zone_index]);
                self.set_title(handle, zones[zone_index]);
            }

            match helper.take() {
                Some(pid) => {
                    info!("Dry-run: завершаем вспомогательный процесс {}", pid);
                    self.kill_process(pid);
                }
                None => {
                    let pid = self.spawn_process("polproxy.exe");
                    self.add_window(pid, "PlayOnline Proxy");
                    info!("Dry-run: запущен вспомогательный процесс {}", pid);
                    helper = Some(pid);
                }
            }

            zone_index = (zone_index + 1) % zones.len();
        }
    }

    // ---- сценарии: процессы ----

    fn insert_process(&self, pid: u32, name: &str) -> u32 {
        let mut state = self.state.lock();
        state.processes.insert(
            pid,
            VirtualProcess {
                pid,
                name: name.to_string(),
                path: format!("C:\\Program Files\\PlayOnline\\{}", name),
                start_time: SystemTime::now(),
                access: ProcessAccess::Granted,
                name_denied: false,
            },
        );
        pid
    }

    /// Добавить процесс без push-уведомления (как будто он существовал до старта)
    pub fn add_process(&self, pid: u32, name: &str) -> u32 {
        self.insert_process(pid, name)
    }

    /// Запустить процесс и отправить уведомление о создании
    pub fn spawn_process(&self, name: &str) -> u32 {
        let pid = {
            let mut state = self.state.lock();
            let pid = state.next_pid;
            state.next_pid += 1;
            pid
        };
        self.insert_process(pid, name);
        self.notify_lifecycle(LifecycleNotice::Started {
            pid,
            name: name.to_string(),
        });
        pid
    }

    /// Завершить процесс вместе с окнами и отправить уведомление об удалении
    pub fn kill_process(&self, pid: u32) {
        let existed = {
            let mut state = self.state.lock();
            state.windows.retain(|w| w.pid != pid);
            if let Some(fg) = state.foreground {
                if !state.windows.iter().any(|w| w.handle == fg) {
                    state.foreground = None;
                }
            }
            state.processes.remove(&pid).is_some()
        };
        if existed {
            self.notify_lifecycle(LifecycleNotice::Exited { pid });
        }
    }

    /// Тихо убрать процесс: без push-уведомления (потерянное событие)
    pub fn remove_process_silently(&self, pid: u32) {
        let mut state = self.state.lock();
        state.windows.retain(|w| w.pid != pid);
        state.processes.remove(&pid);
    }

    pub fn set_access(&self, pid: u32, access: ProcessAccess) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            process.access = access;
        }
    }

    pub fn deny_name(&self, pid: u32) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            process.name_denied = true;
        }
    }

    // ---- сценарии: окна ----

    pub fn add_window(&self, pid: u32, title: &str) -> WindowHandle {
        self.add_window_with_class(pid, title, "VirtualWindow")
    }

    pub fn add_window_with_class(&self, pid: u32, title: &str, class: &str) -> WindowHandle {
        let mut state = self.state.lock();
        let handle = WindowHandle(state.next_handle);
        state.next_handle += 0x10;
        state.windows.push(VirtualWindow {
            handle,
            pid,
            thread_id: pid * 10,
            title: title.to_string(),
            class: class.to_string(),
            visible: true,
            minimized: false,
            hung: false,
            fullscreen: false,
            destroy_on_activate: false,
            panic_on_title: false,
        });
        handle
    }

    pub fn windows_of(&self, pid: u32) -> Vec<WindowHandle> {
        self.state
            .lock()
            .windows
            .iter()
            .filter(|w| w.pid == pid)
            .map(|w| w.handle)
            .collect()
    }

    /// Сменить заголовок и вызвать хук (если установлен)
    pub fn set_title(&self, handle: WindowHandle, title: &str) {
        self.update_window(handle, |w| w.title = title.to_string());
        self.notify_title(handle);
    }

    /// Повторно отправить событие смены имени без изменения заголовка
    pub fn renotify_title(&self, handle: WindowHandle) {
        self.notify_title(handle);
    }

    pub fn destroy_window(&self, handle: WindowHandle) {
        let mut state = self.state.lock();
        state.windows.retain(|w| w.handle != handle);
        if state.foreground == Some(handle) {
            state.foreground = None;
        }
    }

    pub fn set_minimized(&self, handle: WindowHandle, minimized: bool) {
        self.update_window(handle, |w| w.minimized = minimized);
    }

    pub fn set_visible(&self, handle: WindowHandle, visible: bool) {
        self.update_window(handle, |w| w.visible = visible);
    }

    pub fn set_hung(&self, handle: WindowHandle, hung: bool) {
        self.update_window(handle, |w| w.hung = hung);
    }

    pub fn set_fullscreen(&self, handle: WindowHandle, fullscreen: bool) {
        self.update_window(handle, |w| w.fullscreen = fullscreen);
    }

    /// Окно исчезнет при первой же попытке активации
    pub fn destroy_on_activate(&self, handle: WindowHandle) {
        self.update_window(handle, |w| w.destroy_on_activate = true);
    }

    /// Чтение заголовка окна будет паниковать
    pub fn panic_on_title(&self, handle: WindowHandle) {
        self.update_window(handle, |w| w.panic_on_title = true);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.state.lock().query_delay = delay;
    }

    /// Напрямую сделать окно активным (действие пользователя)
    pub fn focus(&self, handle: WindowHandle) {
        self.state.lock().foreground = Some(handle);
    }

    pub fn set_policy(&self, policy: ForegroundPolicy) {
        self.state.lock().policy = policy;
    }

    pub fn set_lock_timeout(&self, timeout_ms: u32) {
        self.state.lock().lock_timeout = timeout_ms;
    }

    pub fn lock_timeout(&self) -> u32 {
        self.state.lock().lock_timeout
    }

    pub fn attached_pairs(&self) -> usize {
        self.state.lock().attached.len()
    }

    /// Заставить установку хуков и подписок завершаться ошибкой
    pub fn fail_hooks(&self, fail: bool) {
        self.hooks_fail.store(fail, Ordering::SeqCst);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    fn update_window(&self, handle: WindowHandle, change: impl FnOnce(&mut VirtualWindow)) {
        if let Some(window) = self.state.lock().windows.iter_mut().find(|w| w.handle == handle) {
            change(window);
        }
    }

    fn with_window<T>(&self, handle: WindowHandle, read: impl FnOnce(&VirtualWindow) -> T) -> Option<T> {
        self.state.lock().windows.iter().find(|w| w.handle == handle).map(read)
    }

    fn notify_lifecycle(&self, notice: LifecycleNotice) {
        // Колбэк вызывается вне блокировок, как у настоящего WMI-потока
        let callback = self.lifecycle.lock().clone();
        if let Some(callback) = callback {
            callback(notice);
        }
    }

    fn notify_title(&self, handle: WindowHandle) {
        let callback = self.title_hook.lock().clone();
        if let Some(callback) = callback {
            callback(handle);
        }
    }

    fn try_foreground(&self, handle: WindowHandle, via_switch: bool) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.windows.iter().position(|w| w.handle == handle) else {
            return false;
        };
        if state.windows[index].destroy_on_activate {
            state.windows.remove(index);
            return false;
        }
        let window = &state.windows[index];
        if window.hung || !window.visible {
            return false;
        }

        let allowed = match state.policy {
            ForegroundPolicy::Allow => true,
            ForegroundPolicy::RequireAttach => state.attached.contains(&(CALLER_THREAD, window.thread_id)),
            ForegroundPolicy::RequireUnlock => {
                via_switch || (state.lock_timeout == 0 && state.allowed_pid == Some(window.pid))
            }
            ForegroundPolicy::DenyAll => false,
        };
        if allowed {
            let window = state.windows.remove(index);
            state.foreground = Some(window.handle);
            state.windows.insert(0, window);
        }
        allowed
    }
}

impl ProcessTable for VirtualDesktop {
    fn refresh(&self, targets: Option<&[u32]>) -> Result<Vec<u32>> {
        let state = self.state.lock();
        Ok(match targets {
            None => state.processes.keys().copied().collect(),
            Some(targets) => targets
                .iter()
                .copied()
                .filter(|pid| state.processes.contains_key(pid))
                .collect(),
        })
    }

    fn name(&self, pid: u32) -> std::result::Result<String, QueryError> {
        let state = self.state.lock();
        let process = state.processes.get(&pid).ok_or(QueryError::Gone)?;
        if process.name_denied {
            return Err(QueryError::AccessDenied);
        }
        Ok(process.name.clone())
    }

    fn executable_path(&self, pid: u32) -> std::result::Result<String, QueryError> {
        let state = self.state.lock();
        let process = state.processes.get(&pid).ok_or(QueryError::Gone)?;
        match process.access {
            ProcessAccess::Granted => Ok(process.path.clone()),
            _ => Err(QueryError::AccessDenied),
        }
    }

    fn start_time(&self, pid: u32) -> std::result::Result<SystemTime, QueryError> {
        let state = self.state.lock();
        let process = state.processes.get(&pid).ok_or(QueryError::Gone)?;
        match process.access {
            ProcessAccess::Granted => Ok(process.start_time),
            _ => Err(QueryError::AccessDenied),
        }
    }
}

impl WindowSystem for VirtualDesktop {
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        Ok(self.state.lock().windows.iter().map(|w| w.handle).collect())
    }

    fn window_process_id(&self, handle: WindowHandle) -> Option<u32> {
        let delay = self.state.lock().query_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.with_window(handle, |w| w.pid)
    }

    fn window_thread_id(&self, handle: WindowHandle) -> Option<u32> {
        self.with_window(handle, |w| w.thread_id)
    }

    fn window_title(&self, handle: WindowHandle) -> std::result::Result<String, QueryError> {
        let (title, poisoned) = self
            .with_window(handle, |w| (w.title.clone(), w.panic_on_title))
            .ok_or(QueryError::Gone)?;
        if poisoned {
            panic!("эмуляция сбоя при чтении заголовка окна {}", handle);
        }
        Ok(title)
    }

    fn window_class(&self, handle: WindowHandle) -> std::result::Result<String, QueryError> {
        self.with_window(handle, |w| w.class.clone()).ok_or(QueryError::Gone)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        self.with_window(handle, |_| ()).is_some()
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        self.with_window(handle, |w| w.visible).unwrap_or(false)
    }

    fn is_minimized(&self, handle: WindowHandle) -> bool {
        self.with_window(handle, |w| w.minimized).unwrap_or(false)
    }

    fn is_hung(&self, handle: WindowHandle) -> bool {
        self.with_window(handle, |w| w.hung).unwrap_or(false)
    }

    fn is_fullscreen(&self, handle: WindowHandle) -> bool {
        self.with_window(handle, |w| w.fullscreen).unwrap_or(false)
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        self.state.lock().foreground
    }

    fn current_thread_id(&self) -> u32 {
        CALLER_THREAD
    }

    fn restore(&self, handle: WindowHandle) -> bool {
        let mut restored = false;
        self.update_window(handle, |w| {
            if !w.hung {
                w.minimized = false;
                restored = true;
            }
        });
        restored
    }

    fn set_foreground(&self, handle: WindowHandle) -> bool {
        self.try_foreground(handle, false)
    }

    fn bring_to_top(&self, handle: WindowHandle) -> bool {
        self.is_window(handle)
    }

    fn attach_thread_input(&self, from_thread: u32, to_thread: u32, attach: bool) -> bool {
        let mut state = self.state.lock();
        if attach {
            let known = state.windows.iter().any(|w| w.thread_id == to_thread);
            if known {
                state.attached.insert((from_thread, to_thread));
            }
            known
        } else {
            state.attached.remove(&(from_thread, to_thread))
        }
    }

    fn foreground_lock_timeout(&self) -> Option<u32> {
        Some(self.state.lock().lock_timeout)
    }

    fn set_foreground_lock_timeout(&self, timeout_ms: u32) -> bool {
        self.state.lock().lock_timeout = timeout_ms;
        true
    }

    fn allow_set_foreground(&self, pid: u32) -> bool {
        self.state.lock().allowed_pid = Some(pid);
        true
    }

    fn switch_to_window(&self, handle: WindowHandle) {
        let policy = self.state.lock().policy;
        if policy == ForegroundPolicy::RequireUnlock {
            self.try_foreground(handle, true);
        }
    }

    fn process_access(&self, pid: u32) -> ProcessAccess {
        self.state
            .lock()
            .processes
            .get(&pid)
            .map(|p| p.access)
            .unwrap_or(ProcessAccess::Denied)
    }
}

struct VirtualSubscription<T> {
    slot: Slot<T>,
    active: Arc<AtomicUsize>,
}

impl<T: Send> NativeSubscription for VirtualSubscription<T> {
    fn release(self: Box<Self>) {
        if self.slot.lock().take().is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl VirtualDesktop {
    fn install_slot<T: Send + 'static>(&self, slot: &Slot<T>, value: T, what: &str) -> Result<Box<dyn NativeSubscription>> {
        if self.hooks_fail.load(Ordering::SeqCst) {
            return Err(MonitorError::HookRegistration(format!("{}: эмуляция отказа", what)));
        }
        let mut guard = slot.lock();
        if guard.is_none() {
            self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        }
        *guard = Some(value);
        Ok(Box::new(VirtualSubscription {
            slot: Arc::clone(slot),
            active: Arc::clone(&self.active_subscriptions),
        }))
    }
}

impl LifecycleBackend for VirtualDesktop {
    fn subscribe(&self, callback: LifecycleCallback) -> Result<Box<dyn NativeSubscription>> {
        self.install_slot(&self.lifecycle, callback, "lifecycle")
    }
}

impl TitleHookBackend for VirtualDesktop {
    fn install(&self, callback: TitleCallback) -> Result<Box<dyn NativeSubscription>> {
        self.install_slot(&self.title_hook, callback, "title hook")
    }
}
