//! Configuration for the ondemand scheduler.
//!
//! This crate handles:
//! - Scheduler configuration from the environment or KDL
//! - Container layout documents (KDL)
//! - Template libraries serving named layouts

pub mod error;
pub mod layout;
pub mod library;
mod nodes;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use layout::{Layout, parse_layout};
pub use library::{DirectoryLibrary, HttpLibrary, open_library};
pub use system::{SchedulerConfig, parse_scheduler_config};
