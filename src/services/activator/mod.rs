//! WindowActivator: escalating foreground activation with failure diagnosis.

mod diagnosis;
mod guards;
mod strategy;

pub use self::diagnosis::{diagnose, DiagnosisInput, FailureReason};
pub use self::guards::{ForegroundLockGuard, InputAttachGuard};
pub use self::strategy::{
    default_strategies, ActivationStrategy, ActivationTarget, AggressiveStrategy, SimpleStrategy,
    ThreadAttachStrategy,
};

use crate::events::WindowHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::platform::WindowSystem;

/// Параметры эскалации
#[derive(Debug, Clone)]
pub struct ActivatorSettings {
    pub max_attempts: u32,
    /// Базовая пауза; перед попыткой N+1 ждём `backoff * N`
    pub backoff: Duration,
}

impl Default for ActivatorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub name: &'static str,
    pub success: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationDiagnostics {
    pub handle: WindowHandle,
    pub target_pid: Option<u32>,
    pub target_thread: Option<u32>,
    pub caller_thread: u32,
    pub foreground_before: Option<WindowHandle>,
    pub foreground_after: Option<WindowHandle>,
    pub was_minimized: bool,
    pub was_visible: bool,
    pub strategies: Vec<StrategyReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationResult {
    pub success: bool,
    pub duration: Duration,
    pub attempts: u32,
    pub failure_reason: Option<FailureReason>,
    pub diagnostics: ActivationDiagnostics,
}

impl ActivationResult {
    pub fn guidance(&self) -> Option<&'static str> {
        self.failure_reason.map(|reason| reason.guidance())
    }
}

pub struct WindowActivator {
    windows: Arc<dyn WindowSystem>,
    strategies: Vec<Box<dyn ActivationStrategy>>,
    settings: ActivatorSettings,
}

impl WindowActivator {
    pub fn new(windows: Arc<dyn WindowSystem>, settings: ActivatorSettings) -> Self {
        Self::with_strategies(windows, default_strategies(), settings)
    }

    pub fn with_strategies(
        windows: Arc<dyn WindowSystem>,
        strategies: Vec<Box<dyn ActivationStrategy>>,
        settings: ActivatorSettings,
    ) -> Self {
        Self {
            windows,
            strategies,
            settings,
        }
    }

    /// Вывести окно на передний план за не более чем `timeout`
    pub async fn activate(&self, handle: WindowHandle, timeout: Duration) -> ActivationResult {
        let started = Instant::now();
        // Слишком большой таймаут не переполняет Instant, а снимает ограничение
        let deadline = started.checked_add(timeout);
        let windows = self.windows.as_ref();

        let mut diagnostics = ActivationDiagnostics {
            handle,
            caller_thread: windows.current_thread_id(),
            foreground_before: windows.foreground_window(),
            ..ActivationDiagnostics::default()
        };

        if handle.is_null() || !windows.is_window(handle) {
            return Self::finish(windows, started, 0, Some(FailureReason::InvalidHandle), diagnostics);
        }

        diagnostics.target_pid = windows.window_process_id(handle);
        diagnostics.target_thread = windows.window_thread_id(handle);
        diagnostics.was_minimized = windows.is_minimized(handle);
        diagnostics.was_visible = windows.is_visible(handle);

        if windows.is_hung(handle) {
            return Self::finish(windows, started, 0, Some(FailureReason::WindowHung), diagnostics);
        }

        if diagnostics.foreground_before == Some(handle) && diagnostics.was_visible && !diagnostics.was_minimized {
            debug!("Окно {} уже активно", handle);
            return Self::finish(windows, started, 0, None, diagnostics);
        }

        let target = ActivationTarget {
            windows,
            handle,
            process_id: diagnostics.target_pid,
            target_thread: diagnostics.target_thread,
            caller_thread: diagnostics.caller_thread,
            deadline,
        };

        let mut attempts = 0;
        let mut timed_out = false;
        let mut ever_foreground = false;

        while attempts < self.settings.max_attempts && !self.strategies.is_empty() {
            let index = (attempts as usize).min(self.strategies.len() - 1);
            let strategy = &self.strategies[index];
            attempts += 1;

            let attempt_started = Instant::now();
            let success = strategy.attempt(&target).await && target.is_foreground();
            diagnostics.strategies.push(StrategyReport {
                name: strategy.name(),
                success,
                elapsed: attempt_started.elapsed(),
            });

            if success {
                info!("Окно {} активировано стратегией {} (попытка {})", handle, strategy.name(), attempts);
                return Self::finish(windows, started, attempts, None, diagnostics);
            }
            ever_foreground |= target.is_foreground();
            debug!("Стратегия {} не смогла активировать окно {}", strategy.name(), handle);

            if !windows.is_window(handle) {
                debug!("Окно {} уничтожено во время активации", handle);
                break;
            }
            if attempts >= self.settings.max_attempts {
                break;
            }

            let pause = self.settings.backoff.saturating_mul(attempts);
            if let Some(remaining) = target.remaining() {
                if remaining.is_zero() || pause >= remaining {
                    timed_out = true;
                    break;
                }
            }
            sleep(pause).await;
        }

        let reason = diagnose(
            windows,
            &DiagnosisInput {
                handle,
                target_pid: diagnostics.target_pid,
                timed_out,
                ever_foreground,
            },
        );
        warn!("Не удалось активировать окно {}: {} ({})", handle, reason, reason.guidance());
        Self::finish(windows, started, attempts, Some(reason), diagnostics)
    }

    fn finish(
        windows: &dyn WindowSystem,
        started: Instant,
        attempts: u32,
        failure_reason: Option<FailureReason>,
        mut diagnostics: ActivationDiagnostics,
    ) -> ActivationResult {
        diagnostics.foreground_after = windows.foreground_window();
        ActivationResult {
            success: failure_reason.is_none(),
            duration: started.elapsed(),
            attempts,
            failure_reason,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform::{ForegroundPolicy, ProcessAccess, VirtualDesktop};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn setup(policy: ForegroundPolicy) -> (Arc<VirtualDesktop>, WindowActivator, WindowHandle) {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(10, "pol.exe");
        let handle = desktop.add_window(10, "PlayOnline Viewer");
        desktop.add_process(20, "explorer.exe");
        let other = desktop.add_window(20, "Explorer");
        desktop.focus(other);
        desktop.set_policy(policy);
        let activator = WindowActivator::new(desktop.clone(), ActivatorSettings::default());
        (desktop, activator, handle)
    }

    #[tokio::test]
    async fn test_fast_path() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::DenyAll);
        desktop.focus(handle);
        let result = activator.activate(handle, TIMEOUT).await;
        assert!(result.success);
        assert_eq!(result.attempts, 0);
        assert!(result.duration < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_simple_strategy_restores_minimized() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::Allow);
        desktop.set_minimized(handle, true);
        let result = activator.activate(handle, TIMEOUT).await;
        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert!(result.diagnostics.was_minimized);
        assert!(!desktop.is_minimized(handle));
        assert_eq!(result.diagnostics.foreground_after, Some(handle));
    }

    #[tokio::test]
    async fn test_thread_attach_wins_and_detaches() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::RequireAttach);
        let result = activator.activate(handle, TIMEOUT).await;
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.diagnostics.strategies[1].name, "thread-attach");
        assert_eq!(desktop.attached_pairs(), 0);
    }

    #[tokio::test]
    async fn test_aggressive_wins_and_restores_lock_timeout() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::RequireUnlock);
        let result = activator.activate(handle, TIMEOUT).await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(desktop.lock_timeout(), VirtualDesktop::DEFAULT_LOCK_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn test_focus_stealing_prevention() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::DenyAll);
        let result = activator.activate(handle, TIMEOUT).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.failure_reason, Some(FailureReason::FocusStealingPrevention));
        assert_eq!(desktop.lock_timeout(), VirtualDesktop::DEFAULT_LOCK_TIMEOUT_MS);
        assert_eq!(desktop.attached_pairs(), 0);
    }

    #[tokio::test]
    async fn test_destroyed_mid_call() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::Allow);
        desktop.destroy_on_activate(handle);
        let result = activator.activate(handle, TIMEOUT).await;
        assert_eq!(result.failure_reason, Some(FailureReason::WindowDestroyed));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::Allow);
        let result = activator.activate(WindowHandle(0xdead), TIMEOUT).await;
        assert_eq!(result.failure_reason, Some(FailureReason::InvalidHandle));
        let result = activator.activate(WindowHandle::NULL, TIMEOUT).await;
        assert_eq!(result.failure_reason, Some(FailureReason::InvalidHandle));

        desktop.set_hung(handle, true);
        let result = activator.activate(handle, TIMEOUT).await;
        assert_eq!(result.failure_reason, Some(FailureReason::WindowHung));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_fullscreen_and_elevation() {
        let (desktop, activator, handle) = setup(ForegroundPolicy::DenyAll);
        desktop.set_access(10, ProcessAccess::ElevatedTarget);
        let result = activator.activate(handle, TIMEOUT).await;
        assert_eq!(result.failure_reason, Some(FailureReason::ElevationMismatch));

        let other = desktop.foreground_window().unwrap();
        desktop.set_fullscreen(other, true);
        let result = activator.activate(handle, TIMEOUT).await;
        assert_eq!(result.failure_reason, Some(FailureReason::FullScreenBlocking));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let (_desktop, activator, handle) = setup(ForegroundPolicy::DenyAll);
        let result = activator.activate(handle, Duration::MAX).await;
        assert_eq!(result.failure_reason, Some(FailureReason::FocusStealingPrevention));
        assert_eq!(result.attempts, 3);

        let (_desktop, activator, handle) = setup(ForegroundPolicy::Allow);
        assert!(activator.activate(handle, Duration::MAX).await.success);
    }

    #[tokio::test]
    async fn test_aggressive_retries_respect_deadline() {
        let (desktop, _activator, handle) = setup(ForegroundPolicy::DenyAll);
        let slow = AggressiveStrategy {
            retries: 50,
            retry_delay: Duration::from_millis(100),
        };
        let activator = WindowActivator::with_strategies(
            desktop.clone(),
            vec![Box::new(slow)],
            ActivatorSettings::default(),
        );

        let result = activator.activate(handle, Duration::from_millis(30)).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.failure_reason, Some(FailureReason::Timeout));
        assert!(result.duration < Duration::from_secs(1));
        assert_eq!(desktop.lock_timeout(), VirtualDesktop::DEFAULT_LOCK_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn test_timeout_cuts_attempts_short() {
        let (_desktop, activator, handle) = setup(ForegroundPolicy::DenyAll);
        let result = activator.activate(handle, Duration::ZERO).await;
        assert_eq!(result.failure_reason, Some(FailureReason::Timeout));
        assert_eq!(result.attempts, 1);
    }
}
