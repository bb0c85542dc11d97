//! Provider configuration and construction.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use url::Url;

use crate::{
    AwsCredentials, AwsKmsConfig, AwsKmsProvider, GcpKmsConfig, GcpKmsProvider, KmsBackend,
    KmsError, KmsProvider, LocalKmsProvider, MemoryKmsProvider, ReqwestTransport,
    StaticAccessToken, transport::DEFAULT_REQUEST_TIMEOUT,
};

/// Backend-specific settings. Which fields matter depends on the
/// [`KmsBackend`] being connected; unused fields are ignored.
///
/// Cloud credentials not given here are read from the usual environment
/// variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
/// `AWS_SESSION_TOKEN`, `AWS_REGION`, `GOOGLE_OAUTH_ACCESS_TOKEN`).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KmsConfig {
    /// AWS region
    pub region: Option<String>,
    /// AWS key alias, id or ARN used as the default key
    pub key_alias: Option<String>,
    /// GCP project id
    pub project_id: Option<String>,
    /// GCP key ring location (defaults to `global`)
    pub location: Option<String>,
    /// GCP key ring
    pub key_ring: Option<String>,
    /// GCP default crypto key
    pub key_name: Option<String>,
    /// Master secret for the local backend
    pub master_key: Option<String>,
    /// Endpoint override for the cloud backends
    pub endpoint: Option<Url>,
    /// AWS access key id
    pub access_key_id: Option<String>,
    /// AWS secret access key
    pub secret_access_key: Option<String>,
    /// AWS session token
    pub session_token: Option<String>,
    /// GCP OAuth2 access token
    pub access_token: Option<String>,
    /// Per-request timeout for the cloud backends, in milliseconds
    pub request_timeout_ms: Option<u64>,
}

impl KmsConfig {
    fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    fn aws_credentials(&self) -> Result<AwsCredentials, KmsError> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials = AwsCredentials::new(access_key_id, secret_access_key);
                Ok(match &self.session_token {
                    Some(token) => credentials.with_session_token(token),
                    None => credentials,
                })
            }
            _ => AwsCredentials::from_env(),
        }
    }
}

impl fmt::Debug for KmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("KmsConfig")
            .field("region", &self.region)
            .field("key_alias", &self.key_alias)
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("key_ring", &self.key_ring)
            .field("key_name", &self.key_name)
            .field("master_key", &redacted(&self.master_key))
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .field("session_token", &redacted(&self.session_token))
            .field("access_token", &redacted(&self.access_token))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// Build the provider for `backend` from `config`.
pub fn connect(
    backend: KmsBackend,
    config: &KmsConfig,
) -> Result<Arc<dyn KmsProvider>, KmsError> {
    tracing::info!(%backend, "Connecting KMS provider");

    match backend {
        KmsBackend::Local => Ok(Arc::new(LocalKmsProvider::new(
            config.master_key.as_deref().map(str::as_bytes),
        ))),
        KmsBackend::Memory => Ok(Arc::new(MemoryKmsProvider::new())),
        KmsBackend::Aws => {
            let region = config
                .region
                .clone()
                .or_else(|| std::env::var("AWS_REGION").ok())
                .ok_or_else(|| KmsError::Configuration("AWS region is required".into()))?;

            let provider = AwsKmsProvider::new(
                AwsKmsConfig {
                    region,
                    key_alias: config.key_alias.clone(),
                    endpoint: config.endpoint.clone(),
                    credentials: config.aws_credentials()?,
                },
                Arc::new(ReqwestTransport::new(config.request_timeout())?),
            )?;
            Ok(Arc::new(provider))
        }
        KmsBackend::Gcp => {
            let required = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .ok_or_else(|| KmsError::Configuration(format!("GCP {name} is required")))
            };
            let tokens = match &config.access_token {
                Some(token) => StaticAccessToken::new(token.clone()),
                None => StaticAccessToken::from_env()?,
            };

            let provider = GcpKmsProvider::new(
                GcpKmsConfig {
                    project_id: required(&config.project_id, "project id")?,
                    location: config
                        .location
                        .clone()
                        .unwrap_or_else(|| "global".to_string()),
                    key_ring: required(&config.key_ring, "key ring")?,
                    default_key: config.key_name.clone(),
                    endpoint: config.endpoint.clone(),
                },
                Arc::new(tokens),
                Arc::new(ReqwestTransport::new(config.request_timeout())?),
            )?;
            Ok(Arc::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_camel_case_json() {
        let config: KmsConfig = serde_json::from_str(
            r#"{"region":"us-west-2","keyAlias":"alias/jwt","requestTimeoutMs":2500}"#,
        )
        .unwrap();

        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.key_alias.as_deref(), Some("alias/jwt"));
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = KmsConfig {
            master_key: Some("hunter2".into()),
            secret_access_key: Some("also-secret".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("also-secret"));
    }

    #[test]
    fn in_process_backends_connect_without_settings() {
        let config = KmsConfig::default();
        assert_eq!(
            connect(KmsBackend::Local, &config).unwrap().backend(),
            KmsBackend::Local
        );
        assert_eq!(
            connect(KmsBackend::Memory, &config).unwrap().backend(),
            KmsBackend::Memory
        );
    }

    #[test]
    fn gcp_requires_a_key_ring() {
        let config = KmsConfig {
            project_id: Some("project".into()),
            access_token: Some("token".into()),
            ..Default::default()
        };
        let result = connect(KmsBackend::Gcp, &config);
        assert!(matches!(result, Err(KmsError::Configuration(_))));
    }

    #[test]
    fn aws_connects_with_explicit_credentials() {
        let config = KmsConfig {
            region: Some("us-east-1".into()),
            access_key_id: Some("AKID".into()),
            secret_access_key: Some("secret".into()),
            ..Default::default()
        };
        let provider = connect(KmsBackend::Aws, &config).unwrap();
        assert_eq!(provider.backend(), KmsBackend::Aws);
    }
}
