pub mod process;
pub mod window;

pub use process::{ProcessRecord, ProcessSummary, SharedRecord, WindowList};
pub use window::{WindowHandle, WindowRecord};

use std::fmt;

/// События трекера для внешних потребителей (UI)
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Detected(SharedRecord),
    Updated(SharedRecord),
    Terminated(SharedRecord),
    WindowTitleChanged {
        process_id: u32,
        handle: WindowHandle,
        title: String,
    },
}

impl TrackerEvent {
    pub fn process_id(&self) -> u32 {
        match self {
            TrackerEvent::Detected(record)
            | TrackerEvent::Updated(record)
            | TrackerEvent::Terminated(record) => record.read().process_id,
            TrackerEvent::WindowTitleChanged { process_id, .. } => *process_id,
        }
    }

    pub fn kind(&self) -> TrackerEventKind {
        match self {
            TrackerEvent::Detected(_) => TrackerEventKind::Detected,
            TrackerEvent::Updated(_) => TrackerEventKind::Updated,
            TrackerEvent::Terminated(_) => TrackerEventKind::Terminated,
            TrackerEvent::WindowTitleChanged { .. } => TrackerEventKind::WindowTitleChanged,
        }
    }
}

impl fmt::Display for TrackerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerEvent::Detected(record) => write!(f, "Detected: {}", record.read()),
            TrackerEvent::Updated(record) => write!(f, "Updated: {}", record.read()),
            TrackerEvent::Terminated(record) => write!(f, "Terminated: {}", record.read()),
            TrackerEvent::WindowTitleChanged { process_id, handle, title } => {
                write!(f, "WindowTitleChanged: pid {} {} \"{}\"", process_id, handle, title)
            }
        }
    }
}

/// Тип события трекера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerEventKind {
    Detected,
    Updated,
    Terminated,
    WindowTitleChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let record = ProcessRecord::new(100, "game.exe").into_shared();
        let event = TrackerEvent::Detected(record);
        assert_eq!(event.process_id(), 100);
        assert_eq!(event.kind(), TrackerEventKind::Detected);

        let title = TrackerEvent::WindowTitleChanged {
            process_id: 7,
            handle: WindowHandle(3),
            title: "Zone: Bastok".into(),
        };
        assert_eq!(title.process_id(), 7);
        assert!(title.to_string().contains("Zone: Bastok"));
    }
}
