use crate::events::{WindowHandle, WindowRecord};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::platform::WindowSystem;

// Служебные окна, которые никогда не бывают «главным окном» приложения
static NOISE_TITLES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["Default IME", "MSCTFIME UI", "Program Manager"].into_iter().collect());

static NOISE_CLASSES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "Shell_TrayWnd",
        "tooltips_class32",
        "Progman",
        "WorkerW",
        "IME",
        "MSCTFIME UI",
    ]
    .into_iter()
    .collect()
});

/// Одноразовый обход окон верхнего уровня с отбором по pid
#[derive(Clone)]
pub struct WindowEnumerator {
    windows: Arc<dyn WindowSystem>,
}

impl WindowEnumerator {
    pub fn new(windows: Arc<dyn WindowSystem>) -> Self {
        Self { windows }
    }

    pub fn is_acceptable(title: &str, class: &str) -> bool {
        let title = title.trim();
        !title.is_empty() && !NOISE_TITLES.contains(title) && !NOISE_CLASSES.contains(class)
    }

    /// Окна процесса `pid`. Первое принятое окно помечается главным.
    ///
    /// По истечении `timeout` возвращает то, что успело собраться.
    pub fn enumerate_windows(&self, pid: u32, timeout: Duration) -> Vec<WindowRecord> {
        let mut found = self.enumerate_for(&[pid], timeout);
        found.remove(&pid).unwrap_or_default()
    }

    /// Один проход по списку окон сразу для многих процессов
    pub fn enumerate_for(&self, pids: &[u32], timeout: Duration) -> HashMap<u32, Vec<WindowRecord>> {
        let mut result: HashMap<u32, Vec<WindowRecord>> = HashMap::new();
        if pids.is_empty() {
            return result;
        }
        let wanted: HashSet<u32> = pids.iter().copied().collect();
        // Переполнение означает «без ограничения»
        let deadline = Instant::now().checked_add(timeout);

        let handles = match self.windows.top_level_windows() {
            Ok(handles) => handles,
            Err(e) => {
                debug!("Не удалось получить список окон: {}", e);
                return result;
            }
        };

        for handle in handles {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(
                    "Перечисление окон прервано по таймауту {:?}, собрано для {} процессов",
                    timeout,
                    result.len()
                );
                break;
            }

            let Some(record) = self.inspect(handle, &wanted) else {
                continue;
            };
            let entry = result.entry(record.process_id).or_default();
            let record = if entry.is_empty() { record.as_main() } else { record };
            entry.push(record);
        }
        result
    }

    fn inspect(&self, handle: WindowHandle, wanted: &HashSet<u32>) -> Option<WindowRecord> {
        let pid = self.windows.window_process_id(handle)?;
        if !wanted.contains(&pid) || !self.windows.is_visible(handle) {
            return None;
        }
        // Окно могло исчезнуть между перечислением и запросом
        let title = match self.windows.window_title(handle) {
            Ok(title) => title,
            Err(e) => {
                trace!("Окно {} пропущено: {}", handle, e);
                return None;
            }
        };
        let class = self.windows.window_class(handle).unwrap_or_default();
        if !Self::is_acceptable(&title, &class) {
            return None;
        }
        let mut record = WindowRecord::new(handle, pid, title);
        record.is_visible = true;
        Some(record)
    }
}
