//! Persistence layer: libSQL-backed storage for accounts, sender lists,
//! processed emails, notifications and feedback.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::*;
pub use traits::Database;
