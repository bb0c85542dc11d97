//! AWS KMS backend.
//!
//! Talks to the KMS JSON API (`TrentService.*` targets) directly over HTTPS,
//! signing each request with SigV4.

mod sigv4;

pub use sigv4::{AwsCredentials, RequestSigner};

use async_trait::async_trait;
use base64::Engine;
use keyward_common::{BASE64, Clock, SystemClock};
use reqwest::Method;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use url::Url;
use zeroize::Zeroizing;

use crate::{
    EncryptedData, HttpRequest, HttpResponse, HttpTransport, KeySpec, KmsBackend, KmsDecrypt,
    KmsError, KmsKeyHandle, KmsKeyId, KmsProvider,
};

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const SERVICE: &str = "kms";
const DELETION_WINDOW_DAYS: u32 = 7;
const LIST_PAGE_SIZE: u32 = 1000;

/// Connection settings for [`AwsKmsProvider`].
#[derive(Debug, Clone)]
pub struct AwsKmsConfig {
    /// Region, e.g. `us-east-1`
    pub region: String,
    /// Key used when `encrypt` is called without a key id (alias, key id or ARN)
    pub key_alias: Option<String>,
    /// Override for the regional endpoint
    pub endpoint: Option<Url>,
    /// Signing credentials
    pub credentials: AwsCredentials,
}

impl AwsKmsConfig {
    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> Result<Url, KmsError> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Url::parse(&format!("https://kms.{}.amazonaws.com/", self.region))
                .map_err(|e| KmsError::Configuration(format!("Invalid region: {e}"))),
        }
    }
}

/// [`KmsProvider`] backed by AWS KMS.
#[derive(Debug)]
pub struct AwsKmsProvider {
    endpoint: Url,
    default_key: Option<KmsKeyId>,
    signer: RequestSigner,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl AwsKmsProvider {
    /// Create a provider for `config`, sending requests through `transport`.
    pub fn new(config: AwsKmsConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, KmsError> {
        if config.region.is_empty() {
            return Err(KmsError::Configuration("AWS region is required".into()));
        }

        Ok(Self {
            endpoint: config.endpoint()?,
            default_key: config.key_alias.map(KmsKeyId::new),
            signer: RequestSigner::new(config.credentials, config.region, SERVICE),
            transport,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for request timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn call<Request, Response>(
        &self,
        action: &str,
        body: &Request,
        key_id: Option<&KmsKeyId>,
    ) -> Result<Response, KmsError>
    where
        Request: Serialize + Sync,
        Response: DeserializeOwned,
    {
        let mut request = HttpRequest::new(Method::POST, self.endpoint.clone())
            .with_header("content-type", CONTENT_TYPE)
            .with_header("x-amz-target", format!("TrentService.{action}"))
            .with_body(serde_json::to_vec(body)?);
        self.signer.sign(&mut request, self.clock.now())?;

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            let error = map_error(&response, key_id);
            tracing::warn!(action, status = response.status, %error, "AWS KMS request failed");
            return Err(error);
        }

        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

fn map_error(response: &HttpResponse, key_id: Option<&KmsKeyId>) -> KmsError {
    let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or(ErrorBody {
        kind: String::new(),
        message: String::from_utf8_lossy(&response.body).into_owned(),
    });
    // `__type` may be namespaced, e.g. `com.amazonaws.kms#NotFoundException`
    let kind = body.kind.rsplit('#').next().unwrap_or_default();
    let key_id = || key_id.cloned().unwrap_or_else(|| KmsKeyId::new("unknown"));

    match kind {
        "NotFoundException" => KmsError::KeyNotFound(key_id()),
        "DisabledException" | "KMSInvalidStateException" => KmsError::KeyDisabled(key_id()),
        "InvalidCiphertextException" | "IncorrectKeyException" => {
            KmsError::Decryption(body.message)
        }
        "ThrottlingException" | "KMSInternalException" | "DependencyTimeoutException"
        | "LimitExceededException" => KmsError::Unavailable(body.message),
        _ if response.is_transient_failure() => KmsError::Unavailable(body.message),
        _ => KmsError::Backend {
            code: if kind.is_empty() {
                response.status.to_string()
            } else {
                kind.to_string()
            },
            message: body.message,
        },
    }
}

fn decode_blob(encoded: &str, field: &str) -> Result<Vec<u8>, KmsError> {
    BASE64
        .decode(encoded)
        .map_err(|e| KmsError::InvalidResponse(format!("{field} is not base64: {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptRequest<'a> {
    key_id: &'a str,
    plaintext: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptResponse {
    ciphertext_blob: String,
    key_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptRequest<'a> {
    ciphertext_blob: String,
    key_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyRequest {
    key_spec: KeySpec,
    key_usage: &'static str,
    description: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyResponse {
    key_metadata: KeyMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMetadata {
    key_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduleKeyDeletionRequest<'a> {
    key_id: &'a str,
    pending_window_in_days: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListKeysRequest {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListKeysResponse {
    #[serde(default)]
    keys: Vec<KeyListEntry>,
    next_marker: Option<String>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyListEntry {
    key_id: String,
}

#[async_trait]
impl KmsProvider for AwsKmsProvider {
    fn backend(&self) -> KmsBackend {
        KmsBackend::Aws
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
                "Encrypt",
                &EncryptRequest {
                    key_id: key_id.as_str(),
                    plaintext: BASE64.encode(data),
                },
                Some(key_id),
            )
            .await?;

        Ok(EncryptedData {
            ciphertext: decode_blob(&response.ciphertext_blob, "CiphertextBlob")?,
            key_id: KmsKeyId::new(response.key_id),
        })
    }

    async fn generate_key(&self, spec: Option<KeySpec>) -> Result<KmsKeyHandle, KmsError> {
        let spec = spec.unwrap_or_default();
        let key_usage = if spec.can_encrypt() {
            "ENCRYPT_DECRYPT"
        } else {
            "GENERATE_VERIFY_MAC"
        };

        let response: CreateKeyResponse = self
            .call(
                "CreateKey",
                &CreateKeyRequest {
                    key_spec: spec,
                    key_usage,
                    description: "keyward managed key",
                },
                None,
            )
            .await?;

        let key_id = KmsKeyId::new(response.key_metadata.key_id);
        tracing::info!(key_id = %key_id, ?spec, "Created AWS KMS key");

        Ok(KmsKeyHandle {
            key_id,
            public_key: None,
        })
    }

    async fn delete_key(&self, key_id: &KmsKeyId) -> Result<(), KmsError> {
        let _: serde::de::IgnoredAny = self
            .call(
                "ScheduleKeyDeletion",
                &ScheduleKeyDeletionRequest {
                    key_id: key_id.as_str(),
                    pending_window_in_days: DELETION_WINDOW_DAYS,
                },
                Some(key_id),
            )
            .await?;

        tracing::info!(key_id = %key_id, days = DELETION_WINDOW_DAYS, "Scheduled AWS KMS key deletion");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KmsKeyId>, KmsError> {
        let mut keys = Vec::new();
        let mut marker = None;

        loop {
            let page: ListKeysResponse = self
                .call(
                    "ListKeys",
                    &ListKeysRequest {
                        limit: LIST_PAGE_SIZE,
                        marker: marker.take(),
                    },
                    None,
                )
                .await?;

            keys.extend(page.keys.into_iter().map(|entry| KmsKeyId::new(entry.key_id)));

            match page.next_marker {
                Some(next) if page.truncated => marker = Some(next),
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
impl KmsDecrypt for AwsKmsProvider {
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        key_id: &KmsKeyId,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let response: DecryptResponse = self
            .call(
                "Decrypt",
                &DecryptRequest {
                    ciphertext_blob: BASE64.encode(ciphertext),
                    key_id: key_id.as_str(),
                },
                Some(key_id),
            )
            .await
            .map_err(KmsError::on_decrypt)?;

        let plaintext = Zeroizing::new(response.plaintext);
        decode_blob(&plaintext, "Plaintext").map(Zeroizing::new)
    }
}
