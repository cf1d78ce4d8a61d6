use crate::error::{MonitorError, Result};
use crate::events::WindowHandle;
use std::ffi::c_void;
use windows::Win32::Foundation::{BOOL, E_ACCESSDENIED, FALSE, HWND, LPARAM, RECT, TRUE};
use windows::Win32::Graphics::Gdi::{GetMonitorInfoW, MonitorFromWindow, MONITORINFO, MONITOR_DEFAULTTONEAREST};
use windows::Win32::System::Threading::{
    AttachThreadInput, GetCurrentThreadId, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    AllowSetForegroundWindow, BringWindowToTop, EnumWindows, GetClassNameW, GetForegroundWindow,
    GetWindowRect, GetWindowThreadProcessId, InternalGetWindowText, IsHungAppWindow, IsIconic,
    IsWindow, IsWindowVisible, IsZoomed, SetForegroundWindow, ShowWindow, SwitchToThisWindow,
    SystemParametersInfoW, SPIF_SENDCHANGE, SPI_GETFOREGROUNDLOCKTIMEOUT, SPI_SETFOREGROUNDLOCKTIMEOUT,
    SW_RESTORE, SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS,
};

use super::super::r#trait::{QueryError, ProcessAccess, WindowSystem};
use super::{is_current_process_elevated, token_is_elevated, OwnedHandle};

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.value() as *mut c_void)
}

unsafe extern "system" fn collect_windows(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = &mut *(lparam.0 as *mut Vec<WindowHandle>);
    handles.push(WindowHandle(hwnd.0 as isize));
    TRUE
}

/// Оконная система Win32
#[derive(Default)]
pub struct Win32WindowSystem;

impl Win32WindowSystem {
    pub fn new() -> Self {
        Self
    }

    fn read_utf16(read: impl FnOnce(&mut [u16]) -> i32) -> Option<String> {
        let mut buf = [0u16; 512];
        let len = read(&mut buf);
        if len <= 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buf[..len as usize]))
    }

    fn covers_monitor(handle: HWND) -> bool {
        unsafe {
            let mut rect = RECT::default();
            if GetWindowRect(handle, &mut rect).is_err() {
                return false;
            }
            let monitor = MonitorFromWindow(handle, MONITOR_DEFAULTTONEAREST);
            let mut info = MONITORINFO {
                cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                ..Default::default()
            };
            if !GetMonitorInfoW(monitor, &mut info).as_bool() {
                return false;
            }
            let screen = info.rcMonitor;
            rect.left <= screen.left && rect.top <= screen.top && rect.right >= screen.right && rect.bottom >= screen.bottom
        }
    }
}

impl WindowSystem for Win32WindowSystem {
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        let mut handles: Vec<WindowHandle> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_windows),
                LPARAM(&mut handles as *mut Vec<WindowHandle> as isize),
            )
        }
        .map_err(|e| MonitorError::ServiceUnavailable(format!("EnumWindows: {}", e)))?;
        Ok(handles)
    }

    fn window_process_id(&self, handle: WindowHandle) -> Option<u32> {
        let mut pid = 0u32;
        let thread = unsafe { GetWindowThreadProcessId(hwnd(handle), Some(&mut pid)) };
        (thread != 0 && pid != 0).then_some(pid)
    }

    fn window_thread_id(&self, handle: WindowHandle) -> Option<u32> {
        let thread = unsafe { GetWindowThreadProcessId(hwnd(handle), None) };
        (thread != 0).then_some(thread)
    }

    fn window_title(&self, handle: WindowHandle) -> std::result::Result<String, QueryError> {
        if !self.is_window(handle) {
            return Err(QueryError::Gone);
        }
        // InternalGetWindowText не шлёт WM_GETTEXT и не зависает на повисших окнах
        Ok(Self::read_utf16(|buf| unsafe { InternalGetWindowText(hwnd(handle), buf) }).unwrap_or_default())
    }

    fn window_class(&self, handle: WindowHandle) -> std::result::Result<String, QueryError> {
        Self::read_utf16(|buf| unsafe { GetClassNameW(hwnd(handle), buf) }).ok_or(QueryError::Gone)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        !handle.is_null() && unsafe { IsWindow(hwnd(handle)) }.as_bool()
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindowVisible(hwnd(handle)) }.as_bool()
    }

    fn is_minimized(&self, handle: WindowHandle) -> bool {
        unsafe { IsIconic(hwnd(handle)) }.as_bool()
    }

    fn is_hung(&self, handle: WindowHandle) -> bool {
        unsafe { IsHungAppWindow(hwnd(handle)) }.as_bool()
    }

    fn is_fullscreen(&self, handle: WindowHandle) -> bool {
        let target = hwnd(handle);
        unsafe { IsZoomed(target) }.as_bool() || Self::covers_monitor(target)
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        let foreground = unsafe { GetForegroundWindow() };
        let handle = WindowHandle(foreground.0 as isize);
        (!handle.is_null()).then_some(handle)
    }

    fn current_thread_id(&self) -> u32 {
        unsafe { GetCurrentThreadId() }
    }

    fn restore(&self, handle: WindowHandle) -> bool {
        if !self.is_minimized(handle) {
            return true;
        }
        unsafe {
            let _ = ShowWindow(hwnd(handle), SW_RESTORE);
        }
        !self.is_minimized(handle)
    }

    fn set_foreground(&self, handle: WindowHandle) -> bool {
        unsafe { SetForegroundWindow(hwnd(handle)) }.as_bool()
    }

    fn bring_to_top(&self, handle: WindowHandle) -> bool {
        unsafe { BringWindowToTop(hwnd(handle)) }.is_ok()
    }

    fn attach_thread_input(&self, from_thread: u32, to_thread: u32, attach: bool) -> bool {
        unsafe { AttachThreadInput(from_thread, to_thread, BOOL::from(attach)) }.as_bool()
    }

    fn foreground_lock_timeout(&self) -> Option<u32> {
        let mut value = 0u32;
        unsafe {
            SystemParametersInfoW(
                SPI_GETFOREGROUNDLOCKTIMEOUT,
                0,
                Some(&mut value as *mut u32 as *mut c_void),
                SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS(0),
            )
        }
        .ok()
        .map(|_| value)
    }

    fn set_foreground_lock_timeout(&self, timeout_ms: u32) -> bool {
        // Для SPI_SETFOREGROUNDLOCKTIMEOUT значение передаётся прямо в pvParam
        unsafe {
            SystemParametersInfoW(
                SPI_SETFOREGROUNDLOCKTIMEOUT,
                0,
                Some(timeout_ms as usize as *mut c_void),
                SPIF_SENDCHANGE,
            )
        }
        .is_ok()
    }

    fn allow_set_foreground(&self, pid: u32) -> bool {
        unsafe { AllowSetForegroundWindow(pid) }.is_ok()
    }

    fn switch_to_window(&self, handle: WindowHandle) {
        unsafe { SwitchToThisWindow(hwnd(handle), TRUE) };
    }

    fn process_access(&self, pid: u32) -> ProcessAccess {
        let process = match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) } {
            Ok(handle) => OwnedHandle(handle),
            Err(e) if e.code() == E_ACCESSDENIED && !is_current_process_elevated() => {
                return ProcessAccess::ElevatedTarget;
            }
            Err(_) => return ProcessAccess::Denied,
        };

        match token_is_elevated(process.0) {
            Some(true) if !is_current_process_elevated() => ProcessAccess::ElevatedTarget,
            Some(_) => ProcessAccess::Granted,
            None => ProcessAccess::Denied,
        }
    }
}
