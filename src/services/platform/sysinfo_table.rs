use crate::error::Result;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use super::r#trait::{QueryError, ProcessTable};

/// Таблица процессов на базе sysinfo.
///
/// Один разделяемый `System`, чтобы не пересоздавать его на каждый тик.
pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet)
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn refresh(&self, targets: Option<&[u32]>) -> Result<Vec<u32>> {
        let mut system = self.system.lock();
        match targets {
            None => {
                system.refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());
                Ok(system.processes().keys().map(|pid| pid.as_u32()).collect())
            }
            Some(targets) => {
                let pids: Vec<Pid> = targets.iter().map(|pid| Pid::from_u32(*pid)).collect();
                system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, Self::refresh_kind());
                Ok(pids
                    .iter()
                    .filter(|pid| system.process(**pid).is_some())
                    .map(|pid| pid.as_u32())
                    .collect())
            }
        }
    }

    fn name(&self, pid: u32) -> std::result::Result<String, QueryError> {
        let system = self.system.lock();
        let process = system.process(Pid::from_u32(pid)).ok_or(QueryError::Gone)?;
        let name = process.name().to_string_lossy().to_string();
        if name.is_empty() {
            return Err(QueryError::AccessDenied);
        }
        Ok(name)
    }

    fn executable_path(&self, pid: u32) -> std::result::Result<String, QueryError> {
        let system = self.system.lock();
        let process = system.process(Pid::from_u32(pid)).ok_or(QueryError::Gone)?;
        // sysinfo не различает «нет доступа» и «нет файла»: для системных процессов exe пустой
        process
            .exe()
            .map(|path| path.to_string_lossy().to_string())
            .ok_or(QueryError::AccessDenied)
    }

    fn start_time(&self, pid: u32) -> std::result::Result<SystemTime, QueryError> {
        let system = self.system.lock();
        let process = system.process(Pid::from_u32(pid)).ok_or(QueryError::Gone)?;
        match process.start_time() {
            0 => Err(QueryError::AccessDenied),
            secs => Ok(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }
}
