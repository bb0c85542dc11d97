use chrono::{DateTime, Utc};
use keyward_common::serde_base64url;
use keyward_kms::KmsKeyId;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::HmacAlgorithm;

/// Persisted metadata for one signing key.
///
/// The signing secret itself is never stored; `protected_material` holds the
/// KMS-protected seed it is derived from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtKeyRecord {
    /// Local identifier (`jwk_<ULID>`), used as the JWT `kid`
    pub id: String,
    /// The KMS key that protected this key's seed
    pub kms_key_id: KmsKeyId,
    /// When the key was generated
    pub created_at: DateTime<Utc>,
    /// When the key was deactivated
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the key may still verify signatures
    pub is_active: bool,
    /// HMAC algorithm the key signs with
    pub algorithm: HmacAlgorithm,
    /// Length in bytes of the derived signing material
    pub key_size: usize,
    /// KMS-protected seed
    #[serde(with = "serde_base64url")]
    pub protected_material: Vec<u8>,
}

impl JwtKeyRecord {
    /// Mint a fresh record identifier.
    pub fn generate_id() -> String {
        format!("jwk_{}", Ulid::new())
    }

    /// Age of the key at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    pub(crate) fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.expires_at = Some(now);
    }
}

impl fmt::Debug for JwtKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeyRecord")
            .field("id", &self.id)
            .field("kms_key_id", &self.kms_key_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field(
                "protected_material",
                &format_args!("{} bytes", self.protected_material.len()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JwtKeyRecord {
        JwtKeyRecord {
            id: JwtKeyRecord::generate_id(),
            kms_key_id: KmsKeyId::new("mem-1"),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            expires_at: None,
            is_active: true,
            algorithm: HmacAlgorithm::Hs256,
            key_size: 64,
            protected_material: vec![1, 2, 3],
        }
    }

    #[test]
    fn ids_are_prefixed_ulids() {
        let id = JwtKeyRecord::generate_id();
        let ulid = id.strip_prefix("jwk_").unwrap();
        assert!(Ulid::from_string(ulid).is_ok());
    }

    #[test]
    fn it_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["kmsKeyId"], "mem-1");
        assert_eq!(json["isActive"], true);
        assert_eq!(json["algorithm"], "HS256");
        assert_eq!(json["keySize"], 64);
        assert_eq!(json["protectedMaterial"], "AQID");
        assert!(json["expiresAt"].is_null());
    }

    #[test]
    fn deactivation_stamps_expiry() {
        let mut record = record();
        let now = record.created_at + chrono::Duration::hours(1);
        record.deactivate(now);
        assert!(!record.is_active);
        assert_eq!(record.expires_at, Some(now));
        assert_eq!(record.age(now), chrono::Duration::hours(1));
    }
}
