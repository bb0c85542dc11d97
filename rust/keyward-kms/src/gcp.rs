//! Google Cloud KMS backend.
//!
//! Uses the Cloud KMS v1 REST API. Keys are crypto keys inside a single key
//! ring; a key id is the crypto key's short name.

use async_trait::async_trait;
use base64::Engine;
use keyward_common::BASE64;
use reqwest::Method;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use std::{fmt, sync::Arc};
use url::Url;
use zeroize::Zeroizing;

use crate::{
    EncryptedData, HttpRequest, HttpResponse, HttpTransport, KeySpec, KmsBackend, KmsDecrypt,
    KmsError, KmsKeyHandle, KmsKeyId, KmsProvider,
};

/// Production Cloud KMS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://cloudkms.googleapis.com/";

/// Supplies OAuth2 bearer tokens for Cloud KMS requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync + fmt::Debug {
    /// A currently valid access token.
    async fn access_token(&self) -> Result<String, KmsError>;
}

/// An access token obtained out of band (e.g. `gcloud auth print-access-token`
/// or the metadata server).
#[derive(Clone)]
pub struct StaticAccessToken(Zeroizing<String>);

impl StaticAccessToken {
    /// Wrap `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// Read the token from `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, KmsError> {
        std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
            .map(Self::new)
            .map_err(|_| KmsError::Configuration("GOOGLE_OAUTH_ACCESS_TOKEN is not set".into()))
    }
}

impl fmt::Debug for StaticAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticAccessToken(<redacted>)")
    }
}

#[async_trait]
impl AccessTokenSource for StaticAccessToken {
    async fn access_token(&self) -> Result<String, KmsError> {
        Ok(self.0.to_string())
    }
}

/// Connection settings for [`GcpKmsProvider`].
#[derive(Debug, Clone)]
pub struct GcpKmsConfig {
    /// Project that owns the key ring
    pub project_id: String,
    /// Key ring location, e.g. `global` or `europe-west1`
    pub location: String,
    /// Key ring name
    pub key_ring: String,
    /// Crypto key used when `encrypt` is called without a key id
    pub default_key: Option<String>,
    /// Override for the API endpoint
    pub endpoint: Option<Url>,
}

impl GcpKmsConfig {
    /// Resource name of the key ring.
    pub fn key_ring_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/keyRings/{}",
            self.project_id, self.location, self.key_ring
        )
    }
}

/// [`KmsProvider`] backed by Google Cloud KMS.
#[derive(Debug)]
pub struct GcpKmsProvider {
    endpoint: Url,
    key_ring: String,
    default_key: Option<KmsKeyId>,
    tokens: Arc<dyn AccessTokenSource>,
    transport: Arc<dyn HttpTransport>,
}

impl GcpKmsProvider {
    /// Create a provider for `config`.
    pub fn new(
        config: GcpKmsConfig,
        tokens: Arc<dyn AccessTokenSource>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, KmsError> {
        for (name, value) in [
            ("project id", &config.project_id),
            ("location", &config.location),
            ("key ring", &config.key_ring),
        ] {
            if value.is_empty() {
                return Err(KmsError::Configuration(format!("GCP {name} is required")));
            }
        }

        let endpoint = match &config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => Url::parse(DEFAULT_ENDPOINT)
                .map_err(|e| KmsError::Configuration(e.to_string()))?,
        };

        Ok(Self {
            endpoint,
            key_ring: config.key_ring_name(),
            default_key: config.default_key.map(KmsKeyId::new),
            tokens,
            transport,
        })
    }

    fn crypto_key_name(&self, key_id: &KmsKeyId) -> String {
        format!("{}/cryptoKeys/{}", self.key_ring, key_id)
    }

    fn url(&self, resource: &str) -> Result<Url, KmsError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/v1/{resource}"))
            .map_err(|e| KmsError::Configuration(format!("Invalid KMS resource URL: {e}")))
    }

    async fn call<Response>(
        &self,
        method: Method,
        resource: &str,
        body: Option<serde_json::Value>,
        key_id: Option<&KmsKeyId>,
    ) -> Result<Response, KmsError>
    where
        Response: DeserializeOwned,
    {
        let token = Zeroizing::new(self.tokens.access_token().await?);
        let mut request = HttpRequest::new(method, self.url(resource)?)
            .with_header("authorization", format!("Bearer {}", token.as_str()));
        if let Some(body) = body {
            request = request
                .with_header("content-type", "application/json")
                .with_body(serde_json::to_vec(&body)?);
        }

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            let error = map_error(&response, key_id);
            tracing::warn!(resource, status = response.status, %error, "GCP KMS request failed");
            return Err(error);
        }

        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

fn map_error(response: &HttpResponse, key_id: Option<&KmsKeyId>) -> KmsError {
    let ErrorEnvelope { error } = serde_json::from_slice(&response.body).unwrap_or_default();
    let key_id = || key_id.cloned().unwrap_or_else(|| KmsKeyId::new("unknown"));

    match (response.status, error.status.as_str()) {
        (404, _) | (_, "NOT_FOUND") => KmsError::KeyNotFound(key_id()),
        (_, "FAILED_PRECONDITION") => KmsError::KeyDisabled(key_id()),
        (_, "UNAVAILABLE" | "RESOURCE_EXHAUSTED" | "DEADLINE_EXCEEDED") => {
            KmsError::Unavailable(error.message)
        }
        _ if response.is_transient_failure() => KmsError::Unavailable(error.message),
        (status, code) => KmsError::Backend {
            code: if code.is_empty() {
                status.to_string()
            } else {
                code.to_string()
            },
            message: error.message,
        },
    }
}

fn decode_field(encoded: &str, field: &str) -> Result<Vec<u8>, KmsError> {
    BASE64
        .decode(encoded)
        .map_err(|e| KmsError::InvalidResponse(format!("{field} is not base64: {e}")))
}

/// Last path segment of a resource name.
fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Deserialize)]
struct CryptoKey {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptoKeyList {
    #[serde(default)]
    crypto_keys: Vec<CryptoKey>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptoKeyVersionList {
    #[serde(default)]
    crypto_key_versions: Vec<CryptoKeyVersion>,
}

#[derive(Deserialize, Serialize)]
struct CryptoKeyVersion {
    name: String,
}

fn key_template(spec: KeySpec) -> serde_json::Value {
    let (purpose, algorithm) = match spec {
        KeySpec::SymmetricDefault => ("ENCRYPT_DECRYPT", "GOOGLE_SYMMETRIC_ENCRYPTION"),
        KeySpec::Hmac256 => ("MAC", "HMAC_SHA256"),
        KeySpec::Hmac384 => ("MAC", "HMAC_SHA384"),
        KeySpec::Hmac512 => ("MAC", "HMAC_SHA512"),
    };
    json!({
        "purpose": purpose,
        "versionTemplate": { "algorithm": algorithm },
    })
}

#[async_trait]
impl KmsProvider for GcpKmsProvider {
    fn backend(&self) -> KmsBackend {
        KmsBackend::Gcp
    }

    async fn encrypt(
        &self,
        data: &[u8],
        key_id: Option<&KmsKeyId>,
    ) -> Result<EncryptedData, KmsError> {
        let key_id = key_id
            .or(self.default_key.as_ref())
            .ok_or(KmsError::NoDefaultKey)?;

        let response: EncryptResponse = self
            .call(
                Method::POST,
                &format!("{}:encrypt", self.crypto_key_name(key_id)),
                Some(json!({ "plaintext": BASE64.encode(data) })),
                Some(key_id),
            )
            .await?;

        Ok(EncryptedData {
            ciphertext: decode_field(&response.ciphertext, "ciphertext")?,
            key_id: key_id.clone(),
        })
    }

    async fn generate_key(&self, spec: Option<KeySpec>) -> Result<KmsKeyHandle, KmsError> {
        let spec = spec.unwrap_or_default();
        let requested = KmsKeyId::generate("keyward");

        let created: CryptoKey = self
            .call(
                Method::POST,
                &format!("{}/cryptoKeys?cryptoKeyId={}", self.key_ring, requested),
                Some(key_template(spec)),
                None,
            )
            .await?;

        let key_id = KmsKeyId::new(short_name(&created.name));
        tracing::info!(key_id = %key_id, ?spec, "Created GCP KMS crypto key");

        Ok(KmsKeyHandle {
            key_id,
            public_key: None,
        })
    }

    async fn delete_key(&self, key_id: &KmsKeyId) -> Result<(), KmsError> {
        let versions: CryptoKeyVersionList = self
            .call(
                Method::GET,
                &format!(
                    "{}/cryptoKeyVersions?filter=state%3DENABLED",
                    self.crypto_key_name(key_id)
                ),
                None,
                Some(key_id),
            )
            .await?;

        // Crypto keys themselves cannot be deleted; destroying every enabled
        // version makes the key unusable.
        for version in &versions.crypto_key_versions {
            let _: CryptoKeyVersion = self
                .call(
                    Method::POST,
                    &format!("{}:destroy", version.name),
                    Some(json!({})),
                    Some(key_id),
                )
                .await?;
        }

        tracing::info!(
            key_id = %key_id,
            versions = versions.crypto_key_versions.len(),
            "Scheduled GCP KMS key version destruction"
        );
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KmsKeyId>, KmsError> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let resource = match &page_token {
                Some(token) => format!("{}/cryptoKeys?pageToken={}", self.key_ring, token),
                None => format!("{}/cryptoKeys", self.key_ring),
            };
            let page: CryptoKeyList = self.call(Method::GET, &resource, None, None).await?;

            keys.extend(
                page.crypto_keys
                    .iter()
                    .map(|key| KmsKeyId::new(short_name(&key.name))),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(keys)
    }

    fn decrypter(&self) -> Option<&dyn KmsDecrypt> {
        Some(self)
    }
}

#[async_trait]
impl KmsDecrypt for GcpKmsProvider {
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        key_id: &KmsKeyId,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let response: DecryptResponse = self
            .call(
                Method::POST,
                &format!("{}:decrypt", self.crypto_key_name(key_id)),
                Some(json!({ "ciphertext": BASE64.encode(ciphertext) })),
                Some(key_id),
            )
            .await
            .map_err(|error| match error {
                KmsError::Backend { code, message } if code == "INVALID_ARGUMENT" => {
                    KmsError::Decryption(message)
                }
                other => other.on_decrypt(),
            })?;

        let plaintext = Zeroizing::new(response.plaintext);
        decode_field(&plaintext, "plaintext").map(Zeroizing::new)
    }
}
