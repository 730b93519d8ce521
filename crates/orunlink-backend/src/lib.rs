//! # orunlink-backend
//!
//! The data access facade: the single seam through which all Orunlink
//! feature code reaches the managed backend.  [`Backend`] fixes the
//! operation surface; [`RestBackend`] implements it against the hosted
//! service and [`MemoryBackend`] implements it in memory for local testing.
//!
//! Every mutating call causes a corresponding row-change event on the
//! backend's change feed.  Callers must not assume the return value and the
//! eventual realtime event are deduplicated; merge logic downstream has to
//! be idempotent.

pub mod facade;
pub mod memory;
pub mod rest;

mod error;

pub use error::BackendError;
pub use facade::{AuthSession, Backend, ChangeStream, CommentOrder, NewProject, Page};
pub use memory::MemoryBackend;
pub use rest::{RestBackend, RestConfig};
