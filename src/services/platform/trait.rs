use crate::error::Result;
use crate::events::WindowHandle;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Ошибка отдельного обращения к ОС (одно окно или один процесс)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("доступ запрещён")]
    AccessDenied,

    #[error("процесс или окно больше не существует")]
    Gone,

    #[error("{0}")]
    Failed(String),
}

/// Что вызывающий процесс может узнать о чужом процессе
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAccess {
    Granted,
    /// Процесс не открывается (другая сессия, защищённый процесс)
    Denied,
    /// Целевой процесс повышен, а мы нет
    ElevatedTarget,
}

/// Таблица процессов ОС. Каждый аксессор может отказать независимо от остальных.
pub trait ProcessTable: Send + Sync {
    /// Обновить таблицу и вернуть живые pid (все или только из `targets`).
    /// Ошибка означает недоступность API целиком.
    fn refresh(&self, targets: Option<&[u32]>) -> Result<Vec<u32>>;

    fn name(&self, pid: u32) -> std::result::Result<String, QueryError>;

    fn executable_path(&self, pid: u32) -> std::result::Result<String, QueryError>;

    fn start_time(&self, pid: u32) -> std::result::Result<SystemTime, QueryError>;
}

/// Оконная система: запросы к окнам и управление передним планом
pub trait WindowSystem: Send + Sync {
    /// Все окна верхнего уровня в z-порядке
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>>;

    fn window_process_id(&self, handle: WindowHandle) -> Option<u32>;

    /// Поток, обрабатывающий ввод окна. `None`, если понятия нет (X11).
    fn window_thread_id(&self, handle: WindowHandle) -> Option<u32>;

    fn window_title(&self, handle: WindowHandle) -> std::result::Result<String, QueryError>;

    fn window_class(&self, handle: WindowHandle) -> std::result::Result<String, QueryError>;

    fn is_window(&self, handle: WindowHandle) -> bool;

    fn is_visible(&self, handle: WindowHandle) -> bool;

    fn is_minimized(&self, handle: WindowHandle) -> bool;

    fn is_hung(&self, handle: WindowHandle) -> bool;

    /// Развёрнуто на весь монитор или имеет полноэкранный класс
    fn is_fullscreen(&self, handle: WindowHandle) -> bool;

    fn foreground_window(&self) -> Option<WindowHandle>;

    fn current_thread_id(&self) -> u32;

    fn restore(&self, handle: WindowHandle) -> bool;

    fn set_foreground(&self, handle: WindowHandle) -> bool;

    fn bring_to_top(&self, handle: WindowHandle) -> bool;

    fn attach_thread_input(&self, from_thread: u32, to_thread: u32, attach: bool) -> bool;

    /// Текущий foreground-lock timeout в мс; `None`, если ОС его не поддерживает
    fn foreground_lock_timeout(&self) -> Option<u32>;

    fn set_foreground_lock_timeout(&self, timeout_ms: u32) -> bool;

    fn allow_set_foreground(&self, pid: u32) -> bool;

    /// Запрос «переключиться на окно», отличный от обычного set_foreground
    fn switch_to_window(&self, handle: WindowHandle);

    fn process_access(&self, pid: u32) -> ProcessAccess;
}

/// Push-уведомление о жизненном цикле процесса
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleNotice {
    Started { pid: u32, name: String },
    Exited { pid: u32 },
}

pub type LifecycleCallback = Arc<dyn Fn(LifecycleNotice) + Send + Sync>;
pub type TitleCallback = Arc<dyn Fn(WindowHandle) + Send + Sync>;

/// Нативная подписка (хук, WMI-запрос). Освобождается ровно один раз.
pub trait NativeSubscription: Send {
    fn release(self: Box<Self>);
}

/// Источник уведомлений о создании и завершении процессов
pub trait LifecycleBackend: Send + Sync {
    fn subscribe(&self, callback: LifecycleCallback) -> Result<Box<dyn NativeSubscription>>;
}

/// Глобальный хук смены имени (заголовка) окна
pub trait TitleHookBackend: Send + Sync {
    fn install(&self, callback: TitleCallback) -> Result<Box<dyn NativeSubscription>>;
}
