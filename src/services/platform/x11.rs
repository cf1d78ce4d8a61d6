use crate::error::{MonitorError, Result};
use crate::events::WindowHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::process::Command;
use tracing::debug;

use super::r#trait::{QueryError, ProcessAccess, WindowSystem};

#[derive(Debug, Clone)]
struct WmctrlEntry {
    pid: u32,
    class: String,
    title: String,
}

/// Оконная система X11 поверх утилит wmctrl и xdotool.
///
/// Потоков ввода и foreground-lock в X11 нет: соответствующие методы
/// честно сообщают о неподдержке, и активатор пропускает эти стратегии.
pub struct X11WindowSystem {
    cache: RwLock<HashMap<WindowHandle, WmctrlEntry>>,
}

impl Default for X11WindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl X11WindowSystem {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn test(&self) -> Result<()> {
        let output = Command::new("wmctrl").args(["-m"]).output()?;
        if output.status.success() {
            Ok(())
        } else {
            MonitorError::unavailable("wmctrl failed")
        }
    }

    fn hex(handle: WindowHandle) -> String {
        format!("0x{:08x}", handle.value())
    }

    fn run_ok(program: &str, args: &[&str]) -> bool {
        match Command::new(program).args(args).output() {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("{} не найден или не работает: {}", program, e);
                false
            }
        }
    }

    /// Разбор строки `wmctrl -lpx`: id desktop pid class host title...
    fn parse_line(line: &str) -> Option<(WindowHandle, WmctrlEntry)> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return None;
        }
        let handle = WindowHandle::parse(parts[0])?;
        let pid = parts[2].parse::<u32>().ok()?;
        let title = parts.get(5..).map(|rest| rest.join(" ")).unwrap_or_default();
        Some((
            handle,
            WmctrlEntry {
                pid,
                class: parts[3].to_string(),
                title,
            },
        ))
    }

    fn cached<T>(&self, handle: WindowHandle, read: impl FnOnce(&WmctrlEntry) -> T) -> Option<T> {
        self.cache.read().get(&handle).map(read)
    }
}

impl WindowSystem for X11WindowSystem {
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        let output = Command::new("wmctrl")
            .args(["-lpx"])
            .output()
            .map_err(|e| MonitorError::ServiceUnavailable(format!("wmctrl не найден: {}", e)))?;

        if !output.status.success() {
            return MonitorError::unavailable("wmctrl вернул ошибку");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries: Vec<(WindowHandle, WmctrlEntry)> = stdout.lines().filter_map(Self::parse_line).collect();
        let handles = entries.iter().map(|(handle, _)| *handle).collect();
        *self.cache.write() = entries.into_iter().collect();
        Ok(handles)
    }

    fn window_process_id(&self, handle: WindowHandle) -> Option<u32> {
        self.cached(handle, |entry| entry.pid).filter(|pid| *pid != 0)
    }

    fn window_thread_id(&self, _handle: WindowHandle) -> Option<u32> {
        None
    }

    fn window_title(&self, handle: WindowHandle) -> std::result::Result<String, QueryError> {
        let output = Command::new("xdotool")
            .args(["getwindowname", &handle.value().to_string()])
            .output()
            .map_err(|e| QueryError::Failed(format!("xdotool не найден: {}", e)))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            // Окно могло исчезнуть; последний известный заголовок лучше, чем ничего
            self.cached(handle, |entry| entry.title.clone()).ok_or(QueryError::Gone)
        }
    }

    fn window_class(&self, handle: WindowHandle) -> std::result::Result<String, QueryError> {
        self.cached(handle, |entry| entry.class.clone()).ok_or(QueryError::Gone)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        Self::run_ok("xdotool", &["getwindowname", &handle.value().to_string()])
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        // wmctrl перечисляет только управляемые клиентские окна
        self.cached(handle, |_| true).unwrap_or(false)
    }

    fn is_minimized(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn is_hung(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn is_fullscreen(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        let output = Command::new("xdotool").args(["getactivewindow"]).output().ok()?;
        if !output.status.success() {
            return None;
        }
        WindowHandle::parse(&String::from_utf8_lossy(&output.stdout))
    }

    fn current_thread_id(&self) -> u32 {
        0
    }

    fn restore(&self, handle: WindowHandle) -> bool {
        Self::run_ok("wmctrl", &["-i", "-r", &Self::hex(handle), "-b", "remove,hidden"])
    }

    fn set_foreground(&self, handle: WindowHandle) -> bool {
        Self::run_ok("wmctrl", &["-i", "-a", &Self::hex(handle)])
    }

    fn bring_to_top(&self, handle: WindowHandle) -> bool {
        Self::run_ok("xdotool", &["windowraise", &handle.value().to_string()])
    }

    fn attach_thread_input(&self, _from_thread: u32, _to_thread: u32, _attach: bool) -> bool {
        false
    }

    fn foreground_lock_timeout(&self) -> Option<u32> {
        None
    }

    fn set_foreground_lock_timeout(&self, _timeout_ms: u32) -> bool {
        false
    }

    fn allow_set_foreground(&self, _pid: u32) -> bool {
        true
    }

    fn switch_to_window(&self, handle: WindowHandle) {
        Self::run_ok("xdotool", &["windowactivate", &handle.value().to_string()]);
    }

    fn process_access(&self, pid: u32) -> ProcessAccess {
        match std::fs::read_link(format!("/proc/{}/exe", pid)) {
            Ok(_) => ProcessAccess::Granted,
            Err(e) => {
                debug!("Нет доступа к /proc/{}/exe: {}", pid, e);
                ProcessAccess::Denied
            }
        }
    }
}
