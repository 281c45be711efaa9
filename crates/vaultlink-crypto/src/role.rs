//! Certificate roles managed by the broker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// OID of the TLS client authentication extended key usage.
pub const OID_CLIENT_AUTH: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 3, 2];
/// OID of the TLS server authentication extended key usage.
pub const OID_SERVER_AUTH: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 3, 1];

/// The two certificate slots the broker owns.
///
/// `Client` is the mTLS identity the appliance knows the machine identity
/// by; `Server` is the broker's own TLS server identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateRole {
    Client,
    Server,
}

impl CertificateRole {
    pub const ALL: [Self; 2] = [Self::Client, Self::Server];

    /// Extended key usage OID the certificate must carry.
    pub const fn eku_oid(self) -> &'static [u64] {
        match self {
            Self::Client => OID_CLIENT_AUTH,
            Self::Server => OID_SERVER_AUTH,
        }
    }

    /// Default subject for CSRs when the caller supplies none.
    pub fn default_subject(self, instance_id: &str) -> String {
        match self {
            Self::Client => format!("CN=VaultLink-{instance_id}-Client"),
            Self::Server => format!("CN=VaultLink-{instance_id}-Server"),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "Client certificate",
            Self::Server => "Server certificate",
        })
    }
}

impl FromStr for CertificateRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" | "a2aclient" => Ok(Self::Client),
            "server" | "webssl" => Ok(Self::Server),
            other => Err(format!("unknown certificate role '{other}'")),
        }
    }
}
