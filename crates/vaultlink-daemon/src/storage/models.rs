//! Database models for the configuration store.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use vaultlink_crypto::CertificateRole;

use crate::appliance::RegistrationKind;

/// Keys of the `settings` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Random id naming this broker's appliance-side resources.
    InstanceId,
    /// Base64 DER of the appliance token-signing certificate.
    SigningCertificate,
    ApplianceAddress,
    ApiVersion,
    IgnoreSsl,
    IdentityId,
    AccountRegistrationId,
    VaultRegistrationId,
    /// Base64 of the installed certificate (PEM bundle or PKCS#12).
    CertificateData(CertificateRole),
    CertificatePassphrase(CertificateRole),
    /// Last CSR generated for the role.
    Csr(CertificateRole),
    /// Base64 PKCS#1 DER of the key behind the last CSR.
    PendingKey(CertificateRole),
}

impl SettingKey {
    pub const fn registration_id(kind: RegistrationKind) -> Self {
        match kind {
            RegistrationKind::Account => Self::AccountRegistrationId,
            RegistrationKind::Vault => Self::VaultRegistrationId,
        }
    }

    pub fn as_key(self) -> Cow<'static, str> {
        match self {
            Self::InstanceId => "instance_id".into(),
            Self::SigningCertificate => "signing_certificate".into(),
            Self::ApplianceAddress => "appliance_address".into(),
            Self::ApiVersion => "api_version".into(),
            Self::IgnoreSsl => "ignore_ssl".into(),
            Self::IdentityId => "identity_id".into(),
            Self::AccountRegistrationId => "account_registration_id".into(),
            Self::VaultRegistrationId => "vault_registration_id".into(),
            Self::CertificateData(role) => format!("{}_certificate", role.as_str()).into(),
            Self::CertificatePassphrase(role) => format!("{}_certificate_passphrase", role.as_str()).into(),
            Self::Csr(role) => format!("{}_csr", role.as_str()).into(),
            Self::PendingKey(role) => format!("{}_pending_key", role.as_str()).into(),
        }
    }
}

/// Trusted certificate record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrustedCertificateRow {
    pub thumbprint: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: i64,
    pub not_after: i64,
    pub pem: String,
    pub created_at: i64,
}

/// Local record of an account added to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountMapping {
    pub registration_kind: String,
    pub account_id: i64,
    pub account_name: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_keys_are_distinct() {
        let client = SettingKey::PendingKey(CertificateRole::Client).as_key();
        let server = SettingKey::PendingKey(CertificateRole::Server).as_key();
        assert_eq!(client, "client_pending_key");
        assert_ne!(client, server);
        assert_eq!(
            SettingKey::registration_id(RegistrationKind::Vault),
            SettingKey::VaultRegistrationId
        );
    }

    #[test]
    fn role_keys_are_snake_case() {
        let role = CertificateRole::Server;
        let keys = [
            SettingKey::CertificateData(role).as_key(),
            SettingKey::CertificatePassphrase(role).as_key(),
            SettingKey::Csr(role).as_key(),
            SettingKey::PendingKey(role).as_key(),
        ];
        assert_eq!(
            keys,
            [
                "server_certificate",
                "server_certificate_passphrase",
                "server_csr",
                "server_pending_key",
            ]
        );
        assert!(
            keys.iter()
                .all(|k| k.chars().all(|c| c.is_ascii_lowercase() || c == '_'))
        );
    }
}
