//! # orunlink-shared
//!
//! Types shared by every Orunlink crate: entity identifiers, domain models,
//! the change-feed event protocol, and the constants that keep the backend
//! facade and the client screens in agreement.

pub mod constants;
pub mod models;
pub mod protocol;
pub mod types;

mod error;

pub use error::SharedError;
