//! Database queries for the configuration store.

use std::str::FromStr;

use super::db::{ConfigDatabase, DatabaseError, unix_timestamp};
use super::models::{AccountMapping, SettingKey, TrustedCertificateRow};
use crate::appliance::RegistrationKind;

impl ConfigDatabase {
    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn get_setting(&self, key: SettingKey) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key.as_key().as_ref())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Read a setting and parse it as `T`.
    pub async fn get_parsed<T: FromStr>(&self, key: SettingKey) -> Result<Option<T>, DatabaseError> {
        let Some(value) = self.get_setting(key).await? else {
            return Ok(None);
        };
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DatabaseError::InvalidSetting {
                key: key.as_key().into_owned(),
                value,
            })
    }

    /// Read a setting holding an appliance resource id. Zero reads as unset.
    pub async fn get_id(&self, key: SettingKey) -> Result<Option<i64>, DatabaseError> {
        Ok(self.get_parsed(key).await?.filter(|id: &i64| *id != 0))
    }

    pub async fn set_setting(&self, key: SettingKey, value: &str) -> Result<(), DatabaseError> {
        self.apply_settings(&[(key, Some(value.to_string()))]).await
    }

    pub async fn delete_setting(&self, key: SettingKey) -> Result<(), DatabaseError> {
        self.apply_settings(&[(key, None)]).await
    }

    /// Write several settings in one transaction. `None` deletes the key.
    pub async fn apply_settings(
        &self,
        changes: &[(SettingKey, Option<String>)],
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;
        for (key, value) in changes {
            let key = key.as_key();
            match value {
                Some(value) => {
                    sqlx::query(
                        r"
                        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
                        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                        ",
                    )
                    .bind(key.as_ref())
                    .bind(value)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM settings WHERE key = ?")
                        .bind(key.as_ref())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// The broker instance id, generated on first use.
    pub async fn instance_id(&self) -> Result<String, DatabaseError> {
        let key = SettingKey::InstanceId.as_key();
        sqlx::query("INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key.as_ref())
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;
        self.get_setting(SettingKey::InstanceId)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("instance id".into()))
    }

    // =========================================================================
    // Trusted certificates
    // =========================================================================

    pub async fn list_trusted_certificates(
        &self,
    ) -> Result<Vec<TrustedCertificateRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, TrustedCertificateRow>(
            "SELECT * FROM trusted_certificates ORDER BY created_at, thumbprint",
        )
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn get_trusted_certificate(
        &self,
        thumbprint: &str,
    ) -> Result<Option<TrustedCertificateRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, TrustedCertificateRow>(
            "SELECT * FROM trusted_certificates WHERE thumbprint = ?",
        )
        .bind(thumbprint.to_ascii_uppercase())
        .fetch_optional(self.pool())
        .await?)
    }

    /// Insert unless the thumbprint is already present. Returns the stored
    /// row and whether it was newly inserted.
    pub async fn insert_trusted_certificate(
        &self,
        row: &TrustedCertificateRow,
    ) -> Result<(TrustedCertificateRow, bool), DatabaseError> {
        let thumbprint = row.thumbprint.to_ascii_uppercase();
        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO trusted_certificates
                (thumbprint, subject, issuer, not_before, not_after, pem, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&thumbprint)
        .bind(&row.subject)
        .bind(&row.issuer)
        .bind(row.not_before)
        .bind(row.not_after)
        .bind(&row.pem)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        let stored = self
            .get_trusted_certificate(&thumbprint)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Trusted certificate {thumbprint}")))?;
        Ok((stored, result.rows_affected() > 0))
    }

    /// Returns whether a row was deleted.
    pub async fn delete_trusted_certificate(&self, thumbprint: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM trusted_certificates WHERE thumbprint = ?")
            .bind(thumbprint.to_ascii_uppercase())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_all_trusted_certificates(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM trusted_certificates")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Account mappings
    // =========================================================================

    pub async fn upsert_account_mapping(
        &self,
        kind: RegistrationKind,
        account_id: i64,
        account_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO account_mappings (registration_kind, account_id, account_name, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(registration_kind, account_id) DO UPDATE SET account_name = excluded.account_name
            ",
        )
        .bind(kind.as_str())
        .bind(account_id)
        .bind(account_name)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_account_mapping(
        &self,
        kind: RegistrationKind,
        account_id: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM account_mappings WHERE registration_kind = ? AND account_id = ?")
            .bind(kind.as_str())
            .bind(account_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_account_mappings(&self, kind: RegistrationKind) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM account_mappings WHERE registration_kind = ?")
            .bind(kind.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_account_mappings(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM account_mappings")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_account_mappings(
        &self,
        kind: RegistrationKind,
    ) -> Result<Vec<AccountMapping>, DatabaseError> {
        Ok(sqlx::query_as::<_, AccountMapping>(
            "SELECT * FROM account_mappings WHERE registration_kind = ? ORDER BY account_id",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?)
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Remove every stored value.
    pub async fn drop_all(&self) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        for table in ["settings", "trusted_certificates", "account_mappings"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!("Configuration store cleared");
        Ok(())
    }
}
