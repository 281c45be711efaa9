//! `SQLite` configuration store for the broker.
//!
//! Holds the key/value settings (appliance binding, signing certificate,
//! per-role certificates, cached resource ids), the trusted certificate set
//! and the local retrievable-account mapping cache.

mod db;
mod models;
mod queries;

pub use db::{ConfigDatabase, DatabaseError};
pub use models::*;
