use crate::events::{ProcessRecord, SharedRecord, TrackerEvent};
use crate::services::snapshot::index_by_pid;
use std::collections::HashMap;

/// Свести карту отслеживаемых процессов со свежим снимком.
///
/// Новые pid вставляются (`Detected`), общие сливаются на месте и дают
/// `Updated` только при наблюдаемом изменении, пропавшие удаляются
/// (`Terminated`). События возвращаются, а не отправляются: вызывающий
/// публикует их после снятия блокировки.
pub fn reconcile(tracked: &mut HashMap<u32, SharedRecord>, fresh: Vec<ProcessRecord>) -> Vec<TrackerEvent> {
    let mut fresh = index_by_pid(fresh);
    let mut events = Vec::new();

    let mut gone: Vec<u32> = tracked.keys().filter(|pid| !fresh.contains_key(pid)).copied().collect();
    gone.sort_unstable();
    for pid in gone {
        if let Some(record) = tracked.remove(&pid) {
            events.push(TrackerEvent::Terminated(record));
        }
    }

    let mut pids: Vec<u32> = fresh.keys().copied().collect();
    pids.sort_unstable();
    for pid in pids {
        let Some(snapshot) = fresh.remove(&pid) else {
            continue;
        };
        match tracked.get(&pid) {
            Some(existing) => {
                if existing.write().merge_from(&snapshot) {
                    events.push(TrackerEvent::Updated(existing.clone()));
                }
            }
            None => {
                let record = snapshot.into_shared();
                tracked.insert(pid, record.clone());
                events.push(TrackerEvent::Detected(record));
            }
        }
    }
    events
}
