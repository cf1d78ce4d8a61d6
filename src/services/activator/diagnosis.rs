use crate::events::WindowHandle;
use serde::Serialize;
use std::fmt;

use super::super::platform::{ProcessAccess, WindowSystem};

/// Почему окно не удалось вывести на передний план
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureReason {
    InvalidHandle,
    WindowDestroyed,
    WindowHung,
    Timeout,
    FullScreenBlocking,
    ElevationMismatch,
    AccessDenied,
    FocusStealingPrevention,
    Unknown,
}

impl FailureReason {
    /// Короткая подсказка пользователю. Разные семейства отказов требуют разных действий.
    pub fn guidance(&self) -> &'static str {
        match self {
            FailureReason::InvalidHandle | FailureReason::WindowDestroyed => {
                "Окно закрыто. Обновите список процессов."
            }
            FailureReason::WindowHung => "Приложение не отвечает. Подождите или перезапустите его.",
            FailureReason::Timeout => "Активация не успела завершиться. Повторите попытку.",
            FailureReason::FullScreenBlocking => {
                "Другое приложение занимает весь экран. Выйдите из полноэкранного режима (Alt+Tab)."
            }
            FailureReason::ElevationMismatch | FailureReason::AccessDenied => {
                "Окно принадлежит процессу с повышенными правами. Запустите программу от имени администратора."
            }
            FailureReason::FocusStealingPrevention => {
                "Система заблокировала смену фокуса. Щёлкните по окну или по значку на панели задач."
            }
            FailureReason::Unknown => "Не удалось активировать окно по неизвестной причине.",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Что известно после исчерпания попыток
pub struct DiagnosisInput {
    pub handle: WindowHandle,
    pub target_pid: Option<u32>,
    pub timed_out: bool,
    pub ever_foreground: bool,
}

/// Классификация отказа в порядке приоритета причин
pub fn diagnose(windows: &dyn WindowSystem, input: &DiagnosisInput) -> FailureReason {
    let handle = input.handle;
    if !windows.is_window(handle) {
        return FailureReason::WindowDestroyed;
    }
    if windows.is_hung(handle) {
        return FailureReason::WindowHung;
    }
    if input.timed_out {
        return FailureReason::Timeout;
    }
    if let Some(foreground) = windows.foreground_window() {
        if foreground != handle && windows.is_fullscreen(foreground) {
            return FailureReason::FullScreenBlocking;
        }
    }
    if let Some(pid) = input.target_pid {
        match windows.process_access(pid) {
            ProcessAccess::ElevatedTarget => return FailureReason::ElevationMismatch,
            ProcessAccess::Denied => return FailureReason::AccessDenied,
            ProcessAccess::Granted => {}
        }
    }
    if windows.is_visible(handle) && !windows.is_minimized(handle) && !input.ever_foreground {
        return FailureReason::FocusStealingPrevention;
    }
    FailureReason::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform::VirtualDesktop;

    fn input(handle: WindowHandle, pid: u32) -> DiagnosisInput {
        DiagnosisInput {
            handle,
            target_pid: Some(pid),
            timed_out: false,
            ever_foreground: false,
        }
    }

    #[test]
    fn test_precedence() {
        let desktop = VirtualDesktop::new();
        desktop.add_process(10, "game.exe");
        let handle = desktop.add_window(10, "Game");

        assert_eq!(diagnose(&desktop, &input(handle, 10)), FailureReason::FocusStealingPrevention);

        desktop.set_access(10, ProcessAccess::ElevatedTarget);
        assert_eq!(diagnose(&desktop, &input(handle, 10)), FailureReason::ElevationMismatch);

        desktop.add_process(20, "video.exe");
        let player = desktop.add_window(20, "Player");
        desktop.set_fullscreen(player, true);
        desktop.focus(player);
        assert_eq!(diagnose(&desktop, &input(handle, 10)), FailureReason::FullScreenBlocking);

        let timed_out = DiagnosisInput {
            timed_out: true,
            ..input(handle, 10)
        };
        assert_eq!(diagnose(&desktop, &timed_out), FailureReason::Timeout);

        desktop.set_hung(handle, true);
        assert_eq!(diagnose(&desktop, &timed_out), FailureReason::WindowHung);

        desktop.destroy_window(handle);
        assert_eq!(diagnose(&desktop, &timed_out), FailureReason::WindowDestroyed);
    }

    #[test]
    fn test_minimized_window_is_unknown() {
        let desktop = VirtualDesktop::new();
        desktop.add_process(10, "game.exe");
        let handle = desktop.add_window(10, "Game");
        desktop.set_minimized(handle, true);
        assert_eq!(diagnose(&desktop, &input(handle, 10)), FailureReason::Unknown);
    }

    #[test]
    fn test_guidance_differs_per_family() {
        assert_ne!(
            FailureReason::ElevationMismatch.guidance(),
            FailureReason::FullScreenBlocking.guidance()
        );
        assert_ne!(FailureReason::WindowHung.guidance(), FailureReason::Unknown.guidance());
    }
}
