use crate::error::{MonitorError, Result};
use crate::events::{ProcessRecord, WindowRecord};
use crate::monitor_error;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::platform::{QueryError, ProcessTable, WindowSystem};
use super::window_enumerator::WindowEnumerator;

/// Построение `ProcessRecord` из таблицы процессов и списка окон.
///
/// Каждый аксессор может отказать сам по себе: запрет доступа даёт
/// значения по умолчанию, а исчезнувший процесс просто пропускается.
#[derive(Clone)]
pub struct ProcessSnapshotProvider {
    processes: Arc<dyn ProcessTable>,
    windows: Arc<dyn WindowSystem>,
    enumerator: WindowEnumerator,
    enumeration_timeout: Duration,
}

impl ProcessSnapshotProvider {
    pub fn new(
        processes: Arc<dyn ProcessTable>,
        windows: Arc<dyn WindowSystem>,
        enumeration_timeout: Duration,
    ) -> Self {
        Self {
            processes,
            enumerator: WindowEnumerator::new(windows.clone()),
            windows,
            enumeration_timeout,
        }
    }

    pub fn enumerator(&self) -> &WindowEnumerator {
        &self.enumerator
    }

    /// Снимок всех процессов (`None`) или только перечисленных pid
    pub fn snapshot(&self, target_ids: Option<&[u32]>) -> Result<Vec<ProcessRecord>> {
        self.collect(target_ids, |_| true)
    }

    /// Снимок процессов, чьё имя прошло фильтр. Окна и путь читаются только для них.
    pub fn snapshot_matching(&self, filter: impl Fn(&str) -> bool) -> Result<Vec<ProcessRecord>> {
        self.collect(None, filter)
    }

    fn collect(&self, target_ids: Option<&[u32]>, filter: impl Fn(&str) -> bool) -> Result<Vec<ProcessRecord>> {
        let pids = self.processes.refresh(target_ids).map_err(|e| match e {
            MonitorError::ProcessTable(_) => e,
            other => monitor_error!(process_table, "{}", other),
        })?;

        let mut candidates: Vec<(u32, String)> = Vec::new();
        for pid in pids {
            if pid == 0 {
                continue;
            }
            let name = match self.processes.name(pid) {
                Ok(name) => name,
                Err(QueryError::Gone) => {
                    trace!("Процесс {} завершился во время снимка", pid);
                    continue;
                }
                Err(e) => {
                    debug!("Имя процесса {} недоступно: {}", pid, e);
                    ProcessRecord::UNKNOWN_NAME.to_string()
                }
            };
            if filter(&name) {
                candidates.push((pid, name));
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let pids: Vec<u32> = candidates.iter().map(|(pid, _)| *pid).collect();
        let mut windows = self.enumerator.enumerate_for(&pids, self.enumeration_timeout);

        let seen_at = Instant::now();
        let mut records = Vec::with_capacity(candidates.len());
        for (pid, name) in candidates {
            match self.build(pid, name, windows.remove(&pid).unwrap_or_default(), seen_at) {
                Some(record) => records.push(record),
                None => trace!("Процесс {} завершился во время снимка", pid),
            }
        }
        Ok(records)
    }

    fn build(&self, pid: u32, name: String, windows: Vec<WindowRecord>, seen_at: Instant) -> Option<ProcessRecord> {
        let mut record = ProcessRecord::new(pid, name).with_windows(windows);
        record.last_seen = seen_at;

        match self.processes.executable_path(pid) {
            Ok(path) => record.executable_path = path,
            Err(QueryError::Gone) => return None,
            Err(e) => debug!("Путь процесса {} недоступен: {}", pid, e),
        }
        match self.processes.start_time(pid) {
            Ok(started) => record.start_time = Some(started),
            Err(QueryError::Gone) => return None,
            Err(e) => debug!("Время запуска процесса {} недоступно: {}", pid, e),
        }

        if record.has_main_window() {
            record.is_responding = !self.windows.is_hung(record.main_window_handle);
        }
        Some(record)
    }
}

/// Группировка записей по pid
pub fn index_by_pid(records: Vec<ProcessRecord>) -> HashMap<u32, ProcessRecord> {
    records.into_iter().map(|record| (record.process_id, record)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::platform::{ProcessAccess, VirtualDesktop};

    fn provider(desktop: &Arc<VirtualDesktop>) -> ProcessSnapshotProvider {
        ProcessSnapshotProvider::new(desktop.clone(), desktop.clone(), Duration::from_secs(1))
    }

    #[test]
    fn test_snapshot_builds_full_record() {
        let desktop = Arc::new(VirtualDesktop::new());
        let pid = desktop.add_process(100, "game.exe");
        let handle = desktop.add_window(pid, "FINAL FANTASY XI");

        let records = provider(&desktop).snapshot(None).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name, "game.exe");
        assert_eq!(record.main_window_handle, handle);
        assert_eq!(record.main_window_title, "FINAL FANTASY XI");
        assert!(record.is_responding);
        assert!(record.start_time.is_some());
        assert!(!record.executable_path.is_empty());
    }

    #[test]
    fn test_access_denied_degrades_to_defaults() {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(100, "secure.exe");
        desktop.set_access(100, ProcessAccess::Denied);
        desktop.deny_name(100);

        let records = provider(&desktop).snapshot(Some(&[100])).unwrap();
        assert_eq!(records[0].name, ProcessRecord::UNKNOWN_NAME);
        assert!(records[0].executable_path.is_empty());
        assert!(records[0].start_time.is_none());
        assert!(records[0].is_responding);
    }

    #[test]
    fn test_hung_main_window_is_not_responding() {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(100, "game.exe");
        let handle = desktop.add_window(100, "Game");
        desktop.set_hung(handle, true);

        let records = provider(&desktop).snapshot(None).unwrap();
        assert!(!records[0].is_responding);
    }

    #[test]
    fn test_filter_and_missing_targets() {
        let desktop = Arc::new(VirtualDesktop::new());
        desktop.add_process(100, "pol.exe");
        desktop.add_process(200, "notepad.exe");

        let provider = provider(&desktop);
        let matching = provider.snapshot_matching(|name| name.starts_with("pol")).unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].process_id, 100);

        let targeted = provider.snapshot(Some(&[200, 999])).unwrap();
        assert_eq!(targeted.len(), 1);
        assert_eq!(targeted[0].process_id, 200);
    }
}
