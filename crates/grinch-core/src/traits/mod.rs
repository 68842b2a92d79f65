//! Seams between the supervisor and the outside world.

pub mod notifier;
pub mod registry;

pub use notifier::{Alert, AlertPriority, Notifier};
pub use registry::Registry;
