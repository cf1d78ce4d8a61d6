use parking_lot::RwLock;
use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::window::{WindowHandle, WindowRecord};

/// Окна процесса. У игрового клиента обычно одно-два окна.
pub type WindowList = SmallVec<[WindowRecord; 4]>;

/// Запись отслеживаемого процесса.
///
/// После вставки в карту трекера запись обновляется на месте, поэтому
/// держатели `SharedRecord` видят свежие заголовки и состояние окон.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub process_id: u32,
    pub name: String,
    /// Пустой, если путь недоступен (чужой или защищённый процесс)
    pub executable_path: String,
    pub main_window_handle: WindowHandle,
    pub main_window_title: String,
    pub is_responding: bool,
    pub start_time: Option<SystemTime>,
    pub last_seen: Instant,
    pub windows: WindowList,
}

pub type SharedRecord = Arc<RwLock<ProcessRecord>>;

impl ProcessRecord {
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    pub fn new(process_id: u32, name: impl Into<String>) -> Self {
        Self {
            process_id,
            name: name.into(),
            executable_path: String::new(),
            main_window_handle: WindowHandle::NULL,
            main_window_title: String::new(),
            is_responding: true,
            start_time: None,
            last_seen: Instant::now(),
            windows: WindowList::new(),
        }
    }

    pub fn with_windows(mut self, windows: impl IntoIterator<Item = WindowRecord>) -> Self {
        self.windows = windows.into_iter().collect();
        if let Some(main) = self.windows.iter().find(|w| w.is_main_window) {
            self.main_window_handle = main.handle;
            self.main_window_title = main.title.clone();
        }
        self
    }

    pub fn has_main_window(&self) -> bool {
        !self.main_window_handle.is_null()
    }

    /// Запись считается мёртвой, если её давно не подтверждал ни опрос, ни push-событие
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > threshold
    }

    /// Отметить запись как увиденную. `last_seen` никогда не уменьшается.
    pub fn touch(&mut self, seen_at: Instant) {
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }

    /// Слить свежий снимок в существующую запись.
    ///
    /// Возвращает `true`, если изменилось что-то наблюдаемое (не считая `last_seen`).
    pub fn merge_from(&mut self, fresh: &ProcessRecord) -> bool {
        self.touch(fresh.last_seen);

        let mut changed = false;
        if self.is_responding != fresh.is_responding {
            self.is_responding = fresh.is_responding;
            changed = true;
        }
        if self.main_window_handle != fresh.main_window_handle {
            self.main_window_handle = fresh.main_window_handle;
            changed = true;
        }
        if self.main_window_title != fresh.main_window_title {
            self.main_window_title.clone_from(&fresh.main_window_title);
            changed = true;
        }
        if self.windows != fresh.windows {
            self.windows.clone_from(&fresh.windows);
            changed = true;
        }
        if self.executable_path.is_empty() && !fresh.executable_path.is_empty() {
            self.executable_path.clone_from(&fresh.executable_path);
            changed = true;
        }
        changed
    }

    /// Применить дешёвое обновление заголовка от хука. Возвращает `true`, если окно найдено.
    pub fn apply_title(&mut self, handle: WindowHandle, title: &str) -> bool {
        let mut found = false;
        for window in self.windows.iter_mut().filter(|w| w.handle == handle) {
            window.title = title.to_string();
            found = true;
        }
        if self.main_window_handle == handle {
            self.main_window_title = title.to_string();
            found = true;
        }
        found
    }

    pub fn into_shared(self) -> SharedRecord {
        Arc::new(RwLock::new(self))
    }
}

/// Сериализуемый вид записи для вывода (CLI, JSON)
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub process_id: u32,
    pub name: String,
    pub executable_path: String,
    pub main_window_handle: WindowHandle,
    pub main_window_title: String,
    pub is_responding: bool,
    /// Секунды с начала эпохи Unix
    pub start_time: Option<u64>,
    pub windows: Vec<WindowRecord>,
}

impl From<&ProcessRecord> for ProcessSummary {
    fn from(record: &ProcessRecord) -> Self {
        Self {
            process_id: record.process_id,
            name: record.name.clone(),
            executable_path: record.executable_path.clone(),
            main_window_handle: record.main_window_handle,
            main_window_title: record.main_window_title.clone(),
            is_responding: record.is_responding,
            start_time: record
                .start_time
                .and_then(|started| started.duration_since(UNIX_EPOCH).ok())
                .map(|since| since.as_secs()),
            windows: record.windows.to_vec(),
        }
    }
}

impl fmt::Display for ProcessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.main_window_title.is_empty() {
            write!(f, "{} (pid {})", self.name, self.process_id)
        } else {
            write!(f, "{} (pid {}) \"{}\"", self.name, self.process_id, self.main_window_title)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_title(title: &str) -> ProcessRecord {
        ProcessRecord::new(100, "pol.exe")
            .with_windows([WindowRecord::new(WindowHandle(1), 100, title).as_main()])
    }

    #[test]
    fn test_merge_reports_only_observable_changes() {
        let mut current = record_with_title("PlayOnline Viewer");
        let same = record_with_title("PlayOnline Viewer");
        assert!(!current.merge_from(&same));

        let renamed = record_with_title("FINAL FANTASY XI");
        assert!(current.merge_from(&renamed));
        assert_eq!(current.main_window_title, "FINAL FANTASY XI");
        assert_eq!(current.windows[0].title, "FINAL FANTASY XI");
    }

    #[test]
    fn test_last_seen_is_monotonic() {
        let mut record = ProcessRecord::new(1, "game.exe");
        let later = record.last_seen + Duration::from_secs(5);
        record.touch(later);
        record.touch(later - Duration::from_secs(3));
        assert_eq!(record.last_seen, later);
    }

    #[test]
    fn test_staleness() {
        let record = ProcessRecord::new(1, "game.exe");
        let now = record.last_seen + Duration::from_secs(10);
        assert!(record.is_stale(now, Duration::from_secs(5)));
        assert!(!record.is_stale(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_apply_title_updates_main_window() {
        let mut record = record_with_title("Old");
        assert!(record.apply_title(WindowHandle(1), "Zone: Bastok"));
        assert_eq!(record.main_window_title, "Zone: Bastok");
        assert!(!record.apply_title(WindowHandle(99), "ignored"));
    }
}
