//! Persistence layer: libSQL-backed storage for profiles and chat logs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ChatLogEntry, Database};
