pub mod activator;
pub mod dispatcher;
pub mod name_matcher;
pub mod platform;
pub mod process_query;
pub mod registry;
pub mod snapshot;
pub mod title_cache;
pub mod tracker;
pub mod watchers;
pub mod window_enumerator;

pub use activator::{ActivationResult, FailureReason, WindowActivator};
pub use dispatcher::{ChannelDispatcher, Dispatcher, InlineDispatcher};
pub use platform::{create_platform, Platform};
pub use process_query::ProcessQuery;
pub use registry::{DiscoveryFilter, WatchId};
pub use snapshot::ProcessSnapshotProvider;
pub use tracker::ProcessTracker;
pub use window_enumerator::WindowEnumerator;
