//! Appliance REST access: resource types, the transport seam, the reqwest
//! client and an in-memory fake for tests.

pub mod client;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod transport;
pub mod types;

pub use client::HttpTransport;
pub use transport::{
    ApplianceConnection, ApplianceTransport, ConnectRequest, FullResponse, Service, TlsPolicy,
    TransportError,
};
pub use types::{
    AccountRef, ApplianceAvailability, ApplianceDescriptor, ApplianceTrustedCertificate,
    LoggedInUser, MachineIdentity, Registration, RegistrationKind, RetrievableAccount,
};
