//! Registry adapters.
//!
//! ```text
//! HttpRegistry    — GraceDB-style REST API over reqwest
//! MemoryRegistry  — in-process store for tests and embedders
//! ```

pub mod http;
pub mod memory;

pub use http::HttpRegistry;
pub use memory::MemoryRegistry;
