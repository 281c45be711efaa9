//! Appliance REST resource types.
//!
//! Field names follow the appliance's `PascalCase` JSON. Resources that the
//! broker updates in place keep unknown fields in `extra` so a PUT does not
//! drop attributes this crate does not model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Roles that may bootstrap and administer the broker.
pub const ADMIN_ROLES: [&str; 2] = ["ApplianceAdmin", "OperationsAdmin"];

/// Anonymous availability report from `Status/Availability`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApplianceAvailability {
    pub appliance_id: String,
    pub appliance_name: String,
    pub appliance_version: String,
    pub appliance_current_state: String,
}

/// Snapshot describing the appliance the broker is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceDescriptor {
    pub address: String,
    pub appliance_id: String,
    pub appliance_name: String,
    pub appliance_version: String,
    pub appliance_state: String,
    pub api_version: u32,
    pub ignore_tls_validation: bool,
}

impl ApplianceDescriptor {
    pub fn from_availability(
        address: &str,
        api_version: u32,
        ignore_tls_validation: bool,
        availability: ApplianceAvailability,
    ) -> Self {
        Self {
            address: address.to_string(),
            appliance_id: availability.appliance_id,
            appliance_name: availability.appliance_name,
            appliance_version: availability.appliance_version,
            appliance_state: availability.appliance_current_state,
            api_version,
            ignore_tls_validation,
        }
    }
}

/// The user a bearer token authenticates as (`GET Me`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LoggedInUser {
    pub id: i64,
    pub user_name: String,
    pub display_name: Option<String>,
    pub identity_provider_name: Option<String>,
    pub admin_roles: Vec<String>,
}

impl LoggedInUser {
    pub fn is_admin(&self) -> bool {
        self.admin_roles
            .iter()
            .any(|role| ADMIN_ROLES.contains(&role.as_str()))
    }
}

/// The certificate-authenticated machine identity (A2A user).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineIdentity {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_name: Option<String>,
    #[serde(default)]
    pub primary_authentication_identity: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_roles: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An A2A registration owned by the machine identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Registration {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,
    pub app_name: String,
    #[serde(default)]
    pub certificate_user_id: i64,
    #[serde(default)]
    pub visible_to_certificate_users: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An account a registration may release credentials for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetrievableAccount {
    #[serde(default)]
    pub account_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,
    #[serde(default)]
    pub ip_restrictions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Account reference supplied when adding retrievable accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A certificate from the appliance's own trust store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApplianceTrustedCertificate {
    pub thumbprint: String,
    pub subject: String,
    pub base64_certificate_data: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Kind of A2A registration the broker maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationKind {
    /// Credential retrieval for individual accounts.
    Account,
    /// Credential retrieval on behalf of vault plugins.
    Vault,
}

impl RegistrationKind {
    pub const ALL: [Self; 2] = [Self::Account, Self::Vault];

    pub const fn other(self) -> Self {
        match self {
            Self::Account => Self::Vault,
            Self::Vault => Self::Account,
        }
    }

    /// Deterministic registration name for this broker instance.
    pub fn app_name(self, instance_id: &str) -> String {
        match self {
            Self::Account => format!("VaultLink-{instance_id}"),
            Self::Vault => format!("VaultLinkVault-{instance_id}"),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Vault => "vault",
        }
    }
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "account" => Ok(Self::Account),
            "vault" => Ok(Self::Vault),
            other => Err(format!("unknown registration kind '{other}'")),
        }
    }
}

/// Deterministic machine identity user name for this broker instance.
pub fn machine_identity_name(instance_id: &str) -> String {
    format!("VaultLinkUser-{instance_id}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trip_keeps_unknown_fields() {
        let json = r#"{"Id":7,"UserName":"VaultLinkUser-x","PrimaryAuthenticationIdentity":"AB","Description":"kept"}"#;
        let identity: MachineIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.id, 7);
        let back = serde_json::to_value(&identity).unwrap();
        assert_eq!(back["Description"], "kept");
        assert_eq!(back["PrimaryAuthenticationIdentity"], "AB");
    }

    #[test]
    fn new_registration_omits_id() {
        let reg = Registration {
            app_name: "VaultLink-x".into(),
            certificate_user_id: 3,
            visible_to_certificate_users: true,
            ..Registration::default()
        };
        let json = serde_json::to_value(&reg).unwrap();
        assert!(json.get("Id").is_none());
        assert_eq!(json["CertificateUserId"], 3);
        assert_eq!(json["VisibleToCertificateUsers"], true);
    }

    #[test]
    fn admin_roles_gate() {
        let mut user = LoggedInUser {
            admin_roles: vec!["Auditor".into()],
            ..LoggedInUser::default()
        };
        assert!(!user.is_admin());
        user.admin_roles.push("OperationsAdmin".into());
        assert!(user.is_admin());
    }

    #[test]
    fn resource_names_are_distinct() {
        assert_eq!(RegistrationKind::Account.app_name("i"), "VaultLink-i");
        assert_eq!(RegistrationKind::Vault.app_name("i"), "VaultLinkVault-i");
        let identity = machine_identity_name("i");
        assert!(
            RegistrationKind::ALL
                .iter()
                .all(|kind| kind.app_name("i") != identity)
        );
        assert_eq!(RegistrationKind::Vault.other(), RegistrationKind::Account);
        assert_eq!("Vault".parse::<RegistrationKind>().unwrap(), RegistrationKind::Vault);
    }
}
