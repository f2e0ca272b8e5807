//! Settings for attaching a queue and for the bundled harness.
//!
//! # Example
//!
//! ```rust,no_run
//! use nfgate::settings::{load_config, QueueSettings};
//! use std::path::Path;
//!
//! let settings: QueueSettings = load_config(Path::new("nfgate.toml")).unwrap_or_default();
//! println!("attaching to queue {}", settings.queue_num);
//! ```

pub mod config;
pub mod drop_rate;
pub mod queue;

// Re-export commonly used types
pub use config::{default_config_path, load_config, save_config};
pub use drop_rate::{DropRate, DropRateError};
pub use queue::QueueSettings;
