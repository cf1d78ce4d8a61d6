use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Таблица процессов недоступна: {0}")]
    ProcessTable(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Не удалось зарегистрировать хук: {0}")]
    HookRegistration(String),

    #[error("Недостаточно прав доступа: {0}")]
    Permission(String),

    #[error("Нет активного tokio runtime")]
    NoRuntime,

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn unavailable<T>(msg: impl Into<String>) -> Result<T> {
        Err(MonitorError::ServiceUnavailable(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! monitor_error {
    (process_table, $($arg:tt)*) => {
        $crate::error::MonitorError::ProcessTable(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::MonitorError::ServiceUnavailable(format!($($arg)*))
    };
    (hook, $($arg:tt)*) => {
        $crate::error::MonitorError::HookRegistration(format!($($arg)*))
    };
    (permission, $($arg:tt)*) => {
        $crate::error::MonitorError::Permission(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::MonitorError::Internal(format!($($arg)*))
    };
}
