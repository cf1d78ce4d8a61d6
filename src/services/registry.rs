use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::name_matcher;

/// Идентификатор зарегистрированного наблюдения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Фильтр имён процессов. Пустой include означает «всё, что не исключено».
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    pub include_names: BTreeSet<String>,
    pub exclude_names: BTreeSet<String>,
}

impl DiscoveryFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include_names: Self::normalize_set(include),
            exclude_names: Self::normalize_set(exclude),
        }
    }

    pub fn include<I>(include: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::new(include, std::iter::empty::<&str>())
    }

    fn normalize_set<T>(items: T) -> BTreeSet<String>
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        items
            .into_iter()
            .map(|item| name_matcher::normalize(item.as_ref()))
            .filter(|item| !item.is_empty())
            .collect()
    }

    pub fn matches(&self, name: &str) -> bool {
        name_matcher::matches(name, &self.include_names, &self.exclude_names)
    }
}

/// Объединение всех активных наблюдений
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposedPatterns {
    pub includes: BTreeSet<String>,
    pub excludes: BTreeSet<String>,
    /// Есть хотя бы одно наблюдение. Без наблюдений по имени не находится ничего.
    pub active: bool,
}

impl ComposedPatterns {
    pub fn matches(&self, name: &str) -> bool {
        self.active && name_matcher::matches(name, &self.includes, &self.excludes)
    }
}

#[derive(Default)]
struct RegistryState {
    watches: BTreeMap<WatchId, DiscoveryFilter>,
    forced: HashSet<u32>,
}

/// Реестр наблюдений и принудительно отслеживаемых pid
pub struct DiscoveryRegistry {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl Default for DiscoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register_watch(&self, filter: DiscoveryFilter) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            "Зарегистрировано наблюдение {}: include={:?} exclude={:?}",
            id, filter.include_names, filter.exclude_names
        );
        self.state.lock().watches.insert(id, filter);
        id
    }

    pub fn unregister_watch(&self, id: WatchId) -> bool {
        let removed = self.state.lock().watches.remove(&id).is_some();
        if removed {
            info!("Наблюдение {} снято", id);
        }
        removed
    }

    pub fn track_pid(&self, pid: u32) {
        if self.state.lock().forced.insert(pid) {
            debug!("pid {} отслеживается принудительно", pid);
        }
    }

    pub fn untrack_pid(&self, pid: u32) {
        if self.state.lock().forced.remove(&pid) {
            debug!("pid {} больше не отслеживается принудительно", pid);
        }
    }

    pub fn composed_patterns(&self) -> ComposedPatterns {
        let state = self.state.lock();
        let mut composed = ComposedPatterns {
            active: !state.watches.is_empty(),
            ..ComposedPatterns::default()
        };
        let match_all = state.watches.values().any(|w| w.include_names.is_empty());
        for watch in state.watches.values() {
            if !match_all {
                composed.includes.extend(watch.include_names.iter().cloned());
            }
            composed.excludes.extend(watch.exclude_names.iter().cloned());
        }
        composed
    }

    pub fn forced_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.state.lock().forced.iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn is_forced(&self, pid: u32) -> bool {
        self.state.lock().forced.contains(&pid)
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().watches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_is_normalized() {
        let filter = DiscoveryFilter::new([" POL.exe ", "pol.exe", ""], ["Crash*"]);
        assert_eq!(filter.include_names.len(), 1);
        assert!(filter.include_names.contains("pol.exe"));
        assert!(filter.exclude_names.contains("crash*"));
    }

    #[test]
    fn test_no_watches_match_nothing() {
        let registry = DiscoveryRegistry::new();
        assert!(!registry.composed_patterns().matches("game.exe"));
    }

    #[test]
    fn test_watches_compose_by_union() {
        let registry = DiscoveryRegistry::new();
        let first = registry.register_watch(DiscoveryFilter::include(["pol*"]));
        registry.register_watch(DiscoveryFilter::new(["game.exe"], ["polcrash.exe"]));

        let composed = registry.composed_patterns();
        assert!(composed.matches("polproxy.exe"));
        assert!(composed.matches("game.exe"));
        assert!(!composed.matches("polcrash.exe"));
        assert!(!composed.matches("notepad.exe"));

        assert!(registry.unregister_watch(first));
        assert!(!registry.unregister_watch(first));
        assert!(!registry.composed_patterns().matches("polproxy.exe"));
    }

    #[test]
    fn test_empty_include_watch_matches_all() {
        let registry = DiscoveryRegistry::new();
        registry.register_watch(DiscoveryFilter::include(["pol*"]));
        registry.register_watch(DiscoveryFilter::new(std::iter::empty::<&str>(), ["svchost.exe"]));

        let composed = registry.composed_patterns();
        assert!(composed.includes.is_empty());
        assert!(composed.matches("notepad.exe"));
        assert!(!composed.matches("svchost.exe"));
    }

    #[test]
    fn test_forced_pids_idempotent() {
        let registry = DiscoveryRegistry::new();
        registry.track_pid(42);
        registry.track_pid(42);
        assert_eq!(registry.forced_pids(), vec![42]);
        registry.untrack_pid(42);
        registry.untrack_pid(42);
        assert!(!registry.is_forced(42));
    }
}
