use keyward_kms::{KmsBackend, KmsConfig};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::KeyManagerError;

/// Upper bound on configured key sizes.
pub const MAX_KEY_SIZE: usize = 1024;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// HMAC algorithm used for signing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HmacAlgorithm {
    /// HMAC-SHA-256
    #[default]
    #[serde(rename = "HS256")]
    Hs256,
    /// HMAC-SHA-384
    #[serde(rename = "HS384")]
    Hs384,
    /// HMAC-SHA-512
    #[serde(rename = "HS512")]
    Hs512,
}

impl HmacAlgorithm {
    /// The JOSE `alg` name.
    pub fn name(&self) -> &'static str {
        match self {
            HmacAlgorithm::Hs256 => "HS256",
            HmacAlgorithm::Hs384 => "HS384",
            HmacAlgorithm::Hs512 => "HS512",
        }
    }

    /// Output length of the underlying hash, in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            HmacAlgorithm::Hs256 => 32,
            HmacAlgorithm::Hs384 => 48,
            HmacAlgorithm::Hs512 => 64,
        }
    }
}

impl fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for [`JwtKeyManager`](crate::JwtKeyManager).
///
/// Loadable from camelCase JSON; durations are given in milliseconds:
///
/// ```json
/// {
///   "algorithm": "HS512",
///   "keySize": 64,
///   "rotationInterval": 86400000,
///   "maxActiveKeys": 3,
///   "kmsProvider": "aws",
///   "kmsConfig": { "region": "us-east-1", "keyAlias": "alias/jwt" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyManagerConfig {
    /// Signing algorithm for newly generated keys
    pub algorithm: HmacAlgorithm,
    /// Length of the signing key material, in bytes
    pub key_size: usize,
    /// How old the current key may get before it is replaced
    #[serde(with = "millis")]
    pub rotation_interval: Duration,
    /// Upper bound on simultaneously active keys
    pub max_active_keys: usize,
    /// How often the scheduler checks whether rotation is due
    #[serde(with = "optional_millis", skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<Duration>,
    /// Which KMS backend [`JwtKeyManager::from_config`](crate::JwtKeyManager::from_config)
    /// connects to protect key material
    pub kms_provider: KmsBackend,
    /// Settings for that backend
    pub kms_config: KmsConfig,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            algorithm: HmacAlgorithm::Hs256,
            key_size: 64,
            rotation_interval: Duration::from_secs(24 * 60 * 60),
            max_active_keys: 3,
            check_interval: None,
            kms_provider: KmsBackend::Local,
            kms_config: KmsConfig::default(),
        }
    }
}

impl KeyManagerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, KeyManagerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| KeyManagerError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the manager cannot work with.
    pub fn validate(&self) -> Result<(), KeyManagerError> {
        let invalid = |message: String| Err(KeyManagerError::Configuration(message));

        if self.key_size < self.algorithm.digest_len() {
            return invalid(format!(
                "keySize must be at least {} bytes for {}",
                self.algorithm.digest_len(),
                self.algorithm
            ));
        }
        if self.key_size > MAX_KEY_SIZE {
            return invalid(format!("keySize must be at most {MAX_KEY_SIZE} bytes"));
        }
        if self.max_active_keys == 0 {
            return invalid("maxActiveKeys must be at least 1".into());
        }
        if self.rotation_interval.is_zero() {
            return invalid("rotationInterval must be greater than zero".into());
        }
        if self.check_interval.is_some_and(|interval| interval.is_zero()) {
            return invalid("checkInterval must be greater than zero".into());
        }
        Ok(())
    }

    /// How often the scheduler wakes up: the configured check interval, or
    /// the rotation interval capped at one hour.
    pub fn effective_check_interval(&self) -> Duration {
        self.check_interval
            .unwrap_or_else(|| self.rotation_interval.min(HOUR))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => super::millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let config = KeyManagerConfig::default();
        assert_eq!(config.algorithm, HmacAlgorithm::Hs256);
        assert_eq!(config.key_size, 64);
        assert_eq!(config.rotation_interval, Duration::from_secs(86_400));
        assert_eq!(config.max_active_keys, 3);
        assert_eq!(config.kms_provider, KmsBackend::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn it_loads_camel_case_json() {
        let config = KeyManagerConfig::from_json(
            r#"{
                "algorithm": "HS512",
                "keySize": 64,
                "rotationInterval": 3600000,
                "maxActiveKeys": 2,
                "checkInterval": 60000,
                "kmsProvider": "memory",
                "kmsConfig": { "masterKey": "dev" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.algorithm, HmacAlgorithm::Hs512);
        assert_eq!(config.rotation_interval, Duration::from_secs(3600));
        assert_eq!(config.max_active_keys, 2);
        assert_eq!(config.check_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.kms_provider, KmsBackend::Memory);
        assert_eq!(config.kms_config.master_key.as_deref(), Some("dev"));
    }

    #[test]
    fn it_rejects_keys_shorter_than_the_digest() {
        let config = KeyManagerConfig {
            algorithm: HmacAlgorithm::Hs512,
            key_size: 32,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(KeyManagerError::Configuration(_))
        ));
    }

    #[test]
    fn it_rejects_zero_bounds() {
        for config in [
            KeyManagerConfig {
                max_active_keys: 0,
                ..Default::default()
            },
            KeyManagerConfig {
                rotation_interval: Duration::ZERO,
                ..Default::default()
            },
            KeyManagerConfig {
                check_interval: Some(Duration::ZERO),
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn check_interval_defaults_to_at_most_an_hour() {
        let config = KeyManagerConfig::default();
        assert_eq!(config.effective_check_interval(), Duration::from_secs(3600));

        let short = KeyManagerConfig {
            rotation_interval: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(short.effective_check_interval(), Duration::from_secs(60));
    }
}
