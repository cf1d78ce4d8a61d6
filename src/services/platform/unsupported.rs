use crate::error::{MonitorError, Result};

use super::r#trait::{
    LifecycleBackend, LifecycleCallback, NativeSubscription, TitleCallback, TitleHookBackend,
};

/// Заглушка для платформ без нативных push-уведомлений.
///
/// Подписка всегда отклоняется, трекер переходит в режим только опроса.
pub struct NoPushBackend {
    platform: &'static str,
}

impl NoPushBackend {
    pub fn new(platform: &'static str) -> Self {
        Self { platform }
    }
}

impl LifecycleBackend for NoPushBackend {
    fn subscribe(&self, _callback: LifecycleCallback) -> Result<Box<dyn NativeSubscription>> {
        Err(MonitorError::ServiceUnavailable(format!(
            "уведомления о процессах не поддерживаются на {}",
            self.platform
        )))
    }
}

impl TitleHookBackend for NoPushBackend {
    fn install(&self, _callback: TitleCallback) -> Result<Box<dyn NativeSubscription>> {
        Err(MonitorError::ServiceUnavailable(format!(
            "хук заголовков окон не поддерживается на {}",
            self.platform
        )))
    }
}
