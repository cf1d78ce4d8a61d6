use crate::error::Result;
use crate::events::{ProcessRecord, WindowRecord};
use std::time::Duration;

use super::name_matcher;
use super::registry::DiscoveryFilter;
use super::snapshot::ProcessSnapshotProvider;

/// Разовые запросы поверх тех же примитивов, что использует трекер
#[derive(Clone)]
pub struct ProcessQuery {
    snapshots: ProcessSnapshotProvider,
    timeout: Duration,
}

impl ProcessQuery {
    pub fn new(snapshots: ProcessSnapshotProvider, timeout: Duration) -> Self {
        Self { snapshots, timeout }
    }

    /// Процессы, чьё имя подходит под паттерн с одной `*`
    pub fn find_by_pattern(&self, pattern: &str) -> Result<Vec<ProcessRecord>> {
        let mut records = self
            .snapshots
            .snapshot_matching(|name| name_matcher::matches(name, [pattern], std::iter::empty::<&str>()))?;
        records.sort_by_key(|record| record.process_id);
        Ok(records)
    }

    /// Процессы, прошедшие фильтр наблюдения
    pub fn find_matching(&self, filter: &DiscoveryFilter) -> Result<Vec<ProcessRecord>> {
        let mut records = self.snapshots.snapshot_matching(|name| filter.matches(name))?;
        records.sort_by_key(|record| record.process_id);
        Ok(records)
    }

    /// Точное совпадение имени без учёта регистра
    pub fn find_by_name(&self, name: &str) -> Result<Vec<ProcessRecord>> {
        let wanted = name_matcher::normalize(name);
        if wanted.is_empty() || wanted.contains('*') {
            return Ok(Vec::new());
        }
        self.find_by_pattern(&wanted)
    }

    pub fn windows_of(&self, pid: u32) -> Vec<WindowRecord> {
        self.snapshots.enumerator().enumerate_windows(pid, self.timeout)
    }

    pub fn main_window(&self, pid: u32) -> Option<WindowRecord> {
        self.windows_of(pid).into_iter().find(|window| window.is_main_window)
    }

    pub fn is_running(&self, pid: u32) -> Result<bool> {
        Ok(!self.snapshots.snapshot(Some(&[pid]))?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform::VirtualDesktop;
    use std::sync::Arc;

    fn query(desktop: &Arc<VirtualDesktop>) -> ProcessQuery {
        let snapshots = ProcessSnapshotProvider::new(desktop.clone(), desktop.clone(), Duration::from_secs(1));
        ProcessQuery::new(snapshots, Duration::from_secs(1))
    }

    #[test]
    fn test_find_and_inspect() {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(100, "pol.exe");
        desktop.add_process(200, "polproxy.exe");
        desktop.add_process(300, "notepad.exe");
        let main = desktop.add_window(100, "PlayOnline Viewer");

        let query = query(&desktop);
        let found: Vec<u32> = query.find_by_pattern("pol*").unwrap().iter().map(|r| r.process_id).collect();
        assert_eq!(found, vec![100, 200]);
        assert_eq!(query.find_by_name("POL.EXE").unwrap().len(), 1);
        assert!(query.find_by_name("pol*").unwrap().is_empty());

        assert_eq!(query.main_window(100).map(|w| w.handle), Some(main));
        assert!(query.main_window(300).is_none());
        assert!(query.is_running(300).unwrap());
        assert!(!query.is_running(999).unwrap());
    }
}
