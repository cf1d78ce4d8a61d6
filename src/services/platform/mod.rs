//! Platform layer: every OS call the engine makes goes through these traits.
//!
//! `create_platform` picks the backend set: Win32 + WMI on Windows,
//! wmctrl/xdotool + polling elsewhere, or the in-memory `VirtualDesktop`
//! in dry-run mode.

mod r#trait;
mod sysinfo_table;
mod unsupported;
pub mod virtual_desktop;

#[cfg(windows)]
mod win32;
#[cfg(unix)]
mod x11;

pub use self::r#trait::{
    LifecycleBackend, LifecycleCallback, LifecycleNotice, NativeSubscription, QueryError,
    ProcessAccess, ProcessTable, TitleCallback, TitleHookBackend, WindowSystem,
};
pub use self::sysinfo_table::SysinfoProcessTable;
pub use self::unsupported::NoPushBackend;
pub use self::virtual_desktop::{ForegroundPolicy, VirtualDesktop, CALLER_THREAD};

#[cfg(windows)]
pub use self::win32::{is_current_process_elevated, Win32WindowSystem, WinEventTitleHook, WmiLifecycleWatcher};
#[cfg(unix)]
pub use self::x11::X11WindowSystem;

use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Набор бэкендов, с которым работает движок
#[derive(Clone)]
pub struct Platform {
    pub windows: Arc<dyn WindowSystem>,
    pub processes: Arc<dyn ProcessTable>,
    pub lifecycle: Arc<dyn LifecycleBackend>,
    pub title_hook: Arc<dyn TitleHookBackend>,
    /// Виртуальный рабочий стол, если платформа эмулируется
    pub virtual_desktop: Option<Arc<VirtualDesktop>>,
}

impl Platform {
    /// Все четыре роли исполняет один виртуальный рабочий стол
    pub fn from_virtual(desktop: Arc<VirtualDesktop>) -> Self {
        Self {
            windows: desktop.clone(),
            processes: desktop.clone(),
            lifecycle: desktop.clone(),
            title_hook: desktop.clone(),
            virtual_desktop: Some(desktop),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_desktop.is_some()
    }
}

/// Factory function to create the platform backends based on the dry_run flag
pub fn create_platform(dry_run: bool) -> Result<Platform> {
    if dry_run {
        info!("Dry-run режим: используется виртуальный рабочий стол");
        return Ok(Platform::from_virtual(Arc::new(VirtualDesktop::with_demo_processes())));
    }
    create_native_platform()
}

#[cfg(windows)]
fn create_native_platform() -> Result<Platform> {
    if !is_current_process_elevated() {
        info!("Процесс запущен без повышенных прав: активация окон администратора может не работать");
    }
    Ok(Platform {
        windows: Arc::new(Win32WindowSystem::new()),
        processes: Arc::new(SysinfoProcessTable::new()),
        lifecycle: Arc::new(WmiLifecycleWatcher::new()),
        title_hook: Arc::new(WinEventTitleHook::new()),
        virtual_desktop: None,
    })
}

#[cfg(unix)]
fn create_native_platform() -> Result<Platform> {
    let windows = X11WindowSystem::new();
    if let Err(e) = windows.test() {
        tracing::warn!("wmctrl недоступен, список окон будет пустым: {}", e);
    }
    let no_push = Arc::new(NoPushBackend::new("X11"));
    Ok(Platform {
        windows: Arc::new(windows),
        processes: Arc::new(SysinfoProcessTable::new()),
        lifecycle: no_push.clone(),
        title_hook: no_push,
        virtual_desktop: None,
    })
}

#[cfg(not(any(windows, unix)))]
fn create_native_platform() -> Result<Platform> {
    crate::error::MonitorError::unavailable("неподдерживаемая платформа; используйте --dry-run")
}
