//! Win32 backends: window system, WinEvent title hook, WMI lifecycle notifications.

mod hooks;
mod window_system;
mod wmi;

pub use self::hooks::WinEventTitleHook;
pub use self::window_system::Win32WindowSystem;
pub use self::wmi::WmiLifecycleWatcher;

use ::windows::Win32::Foundation::{CloseHandle, HANDLE};
use ::windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use ::windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
use std::ffi::c_void;

/// HANDLE, закрываемый ровно один раз при выходе из области видимости
pub(crate) struct OwnedHandle(pub HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

pub(crate) fn token_is_elevated(process: HANDLE) -> Option<bool> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(process, TOKEN_QUERY, &mut token).ok()?;
        let token = OwnedHandle(token);

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        GetTokenInformation(
            token.0,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
        .ok()?;
        Some(elevation.TokenIsElevated != 0)
    }
}

/// Запущен ли текущий процесс с повышенными правами
pub fn is_current_process_elevated() -> bool {
    // Псевдо-дескриптор текущего процесса закрывать не нужно
    token_is_elevated(unsafe { GetCurrentProcess() }).unwrap_or(false)
}
