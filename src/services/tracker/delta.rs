use crate::events::{ProcessRecord, WindowHandle};
use std::fmt;

/// Сообщения в актор трекера от нативных потоков и фоновых задач.
///
/// Нативные колбэки только кладут дельту в очередь; вся работа с картой
/// процессов выполняется задачей трекера под общим шлюзом.
#[derive(Debug, Clone)]
pub enum TrackerDelta {
    /// Push-уведомление о новом интересном процессе
    Spawned { pid: u32, name: String },
    /// Процесс завершился
    Exited { pid: u32 },
    /// Заголовок окна отслеживаемого процесса изменился
    TitleChanged { pid: u32, handle: WindowHandle, title: String },
    /// Фоновое обогащение завершено. `None`, если процесс успел исчезнуть.
    Enriched { pid: u32, record: Option<ProcessRecord> },
}

impl TrackerDelta {
    pub fn pid(&self) -> u32 {
        match self {
            TrackerDelta::Spawned { pid, .. }
            | TrackerDelta::Exited { pid }
            | TrackerDelta::TitleChanged { pid, .. }
            | TrackerDelta::Enriched { pid, .. } => *pid,
        }
    }
}

impl fmt::Display for TrackerDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerDelta::Spawned { pid, name } => write!(f, "spawned {} (pid {})", name, pid),
            TrackerDelta::Exited { pid } => write!(f, "exited pid {}", pid),
            TrackerDelta::TitleChanged { pid, handle, title } => {
                write!(f, "title pid {} {} \"{}\"", pid, handle, title)
            }
            TrackerDelta::Enriched { pid, record } => {
                write!(f, "enriched pid {} ({})", pid, if record.is_some() { "alive" } else { "gone" })
            }
        }
    }
}
