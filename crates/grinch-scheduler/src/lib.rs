//! # Grinch Scheduler
//!
//! Watches one registry event at a time: compiles the checks configured for
//! its type into a timed schedule, evaluates each check when it comes due,
//! and escalates missing pipeline stages to humans.
//!
//! ## Architecture
//! ```text
//! Supervisor::spawn(event_id)
//!   ├── Registry::get_event → EventType + frequency hint
//!   ├── compiler::compile   → Schedule [(delay, check, params, recipients)]
//!   └── Executor::run
//!         ├── wait until creation + delay (cancellable)
//!         ├── predicates::evaluate  (FAR gate, retry, timeout)
//!         └── ActionRequired → Notifier
//!                                ├── Email (SMTP)
//!                                ├── Telegram (sendMessage)
//!                                ├── Discord (webhook)
//!                                ├── Webhook (HTTP POST)
//!                                └── Log
//! ```

pub mod checks;
pub mod compiler;
pub mod dispatch;
pub mod executor;
pub mod notify;
pub mod predicates;
pub mod registry;
pub mod supervisor;

pub use checks::{CheckName, PredicateId};
pub use compiler::{CheckTask, Schedule, TaskParams, compile, validate_config};
pub use executor::{ExecutionReport, Executor, ExecutorState, TaskRecord, TaskStatus};
pub use notify::DispatchNotifier;
pub use predicates::{Outcome, Verdict};
pub use registry::{HttpRegistry, MemoryRegistry};
pub use supervisor::{Overrides, Supervisor, SupervisorHandle};
