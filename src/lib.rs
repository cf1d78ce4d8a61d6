//! procsentry: process and window monitoring for game-client companion tools.
//!
//! Discovers processes by name pattern, tracks their lifecycle and window
//! titles through polling plus native push notifications, and brings their
//! windows to the foreground with escalating activation strategies.

pub mod config;
pub mod error;
pub mod events;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use events::{ProcessRecord, SharedRecord, TrackerEvent, TrackerEventKind, WindowHandle, WindowRecord};
