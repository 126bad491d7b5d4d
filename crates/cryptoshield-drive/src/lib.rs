//! Removable-drive discovery, the possession token, and the presence monitor.

pub mod authorization;
pub mod enumerator;
pub mod monitor;
pub mod strategies;

pub use authorization::{AuthorizationManager, ACCEPTED_TOKEN_NAMES, TOKEN_FILENAME};
pub use enumerator::{DriveEnumerator, Enumeration, StrategyOutcome, StrategyReport};
pub use monitor::{DriveMonitor, MonitorHandle, MonitorState, MIN_MONITOR_INTERVAL};
pub use strategies::{build_strategies, default_media_dirs, StrategySettings};
