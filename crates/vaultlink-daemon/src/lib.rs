//! `VaultLink` Broker Library
//!
//! Core functionality for the broker that binds a host to a PAM appliance:
//! - Trust bootstrap from an administrator token and the appliance's
//!   federation metadata
//! - Client/server certificate lifecycle (CSR, install, removal)
//! - Reconciliation of the machine identity, its two A2A registrations and
//!   their retrievable accounts
//! - `SQLite` storage for settings, trusted certificates and account mappings

pub mod appliance;
pub mod bootstrap;
pub mod broker;
pub mod certificates;
pub mod error;
pub mod reconcile;
pub mod restart;
pub mod session;
pub mod storage;
pub mod trust;

pub use broker::Broker;
pub use error::{BrokerError, Result};
