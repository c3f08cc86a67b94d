//! # pyindex-ports
//!
//! Port traits for the pyindex hexagonal architecture.
//!
//! This crate defines the interfaces between the domain and infrastructure
//! layers. It depends only on `domain` and `shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by port traits.
///
/// We deliberately use boxed futures for boundary traits (I/O-bound work), and
/// prefer batch APIs for hot paths where allocation overhead matters.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod embedder;
pub mod filesystem;
pub mod ignore;
pub mod lock;
pub mod logger;
pub mod parser;
pub mod process;
pub mod storage;
pub mod telemetry;
pub mod vector_index;

pub use embedder::*;
pub use filesystem::*;
pub use ignore::*;
pub use lock::*;
pub use logger::*;
pub use parser::*;
pub use process::*;
pub use storage::*;
pub use telemetry::*;
pub use vector_index::*;

// Re-export selected domain types used in port signatures, so adapter crates
// can implement ports without directly depending on `pyindex-domain`.
pub use pyindex_domain::{FileId, Language, LineSpan};
