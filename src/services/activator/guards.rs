use tracing::{debug, warn};

use super::super::platform::WindowSystem;

/// Присоединённый ввод двух потоков. `Drop` всегда отсоединяет,
/// даже если присоединение не удалось на полпути.
pub struct InputAttachGuard<'a> {
    windows: &'a dyn WindowSystem,
    from_thread: u32,
    to_thread: u32,
    attached: bool,
}

impl<'a> InputAttachGuard<'a> {
    pub fn attach(windows: &'a dyn WindowSystem, from_thread: u32, to_thread: u32) -> Self {
        let attached = windows.attach_thread_input(from_thread, to_thread, true);
        if !attached {
            debug!("AttachThreadInput {} -> {} не удался", from_thread, to_thread);
        }
        Self {
            windows,
            from_thread,
            to_thread,
            attached,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl Drop for InputAttachGuard<'_> {
    fn drop(&mut self) {
        let detached = self.windows.attach_thread_input(self.from_thread, self.to_thread, false);
        if self.attached && !detached {
            warn!("Не удалось отсоединить ввод потоков {} -> {}", self.from_thread, self.to_thread);
        }
    }
}

/// Обнулённый foreground-lock timeout. `Drop` возвращает исходное значение.
pub struct ForegroundLockGuard<'a> {
    windows: &'a dyn WindowSystem,
    original: u32,
}

impl<'a> ForegroundLockGuard<'a> {
    /// `None`, если ОС не поддерживает lock timeout или его не удалось изменить
    pub fn unlock(windows: &'a dyn WindowSystem) -> Option<Self> {
        let original = windows.foreground_lock_timeout()?;
        if !windows.set_foreground_lock_timeout(0) {
            debug!("Не удалось обнулить foreground-lock timeout");
            return None;
        }
        Some(Self { windows, original })
    }
}

impl Drop for ForegroundLockGuard<'_> {
    fn drop(&mut self) {
        if !self.windows.set_foreground_lock_timeout(self.original) {
            warn!("Не удалось восстановить foreground-lock timeout {} мс", self.original);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform::{VirtualDesktop, CALLER_THREAD};

    #[test]
    fn test_lock_timeout_restored_on_drop() {
        let desktop = VirtualDesktop::new();
        {
            let _guard = ForegroundLockGuard::unlock(&desktop).unwrap();
            assert_eq!(desktop.lock_timeout(), 0);
        }
        assert_eq!(desktop.lock_timeout(), VirtualDesktop::DEFAULT_LOCK_TIMEOUT_MS);
    }

    #[test]
    fn test_attach_guard_detaches() {
        let desktop = VirtualDesktop::new();
        desktop.add_process(10, "game.exe");
        let handle = desktop.add_window(10, "Game");
        let thread = desktop.window_thread_id(handle).unwrap();
        {
            let guard = InputAttachGuard::attach(&desktop, CALLER_THREAD, thread);
            assert!(guard.is_attached());
            assert_eq!(desktop.attached_pairs(), 1);
        }
        assert_eq!(desktop.attached_pairs(), 0);

        // Неизвестный поток: присоединение не удалось, Drop всё равно безопасен
        let guard = InputAttachGuard::attach(&desktop, CALLER_THREAD, 999_999);
        assert!(!guard.is_attached());
        drop(guard);
        assert_eq!(desktop.attached_pairs(), 0);
    }
}
