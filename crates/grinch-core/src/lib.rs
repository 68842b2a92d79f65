//! # Grinch Core
//!
//! Shared data model, configuration, and the two seams every supervisor
//! talks through: the event [`Registry`](traits::Registry) it reads and the
//! [`Notifier`](traits::Notifier) it escalates to.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SupervisorConfig;
pub use error::{GrinchError, Result};
pub use traits::{Alert, AlertPriority, Notifier, Registry};
pub use types::{EventFilter, EventRecord, EventType, LabelSet, LogEntry, TimeKey, TimeRange};
