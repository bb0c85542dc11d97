use async_trait::async_trait;
use base64::Engine;
use keyward_common::BASE64;
use keyward_kms::{
    GcpKmsConfig, GcpKmsProvider, HttpRequest, HttpResponse, HttpTransport, KeySpec, KmsError,
    KmsProvider, StaticAccessToken, conformance,
};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc};
use testresult::TestResult;

const KEY_RING: &str = "projects/test-project/locations/global/keyRings/jwt";

#[derive(Debug, Default)]
struct CryptoKey {
    purpose: String,
    /// version name -> enabled
    versions: Vec<(String, bool)>,
}

/// In-process stand-in for the Cloud KMS v1 REST API.
#[derive(Debug, Default)]
struct FakeCloudKms {
    keys: Mutex<HashMap<String, CryptoKey>>,
    order: Mutex<Vec<String>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn reply(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
    }
}

fn error(status: u16, code: &str) -> HttpResponse {
    reply(
        status,
        json!({ "error": { "code": status, "message": code, "status": code } }),
    )
}

impl FakeCloudKms {
    fn key_name(id: &str) -> String {
        format!("{KEY_RING}/cryptoKeys/{id}")
    }

    fn create(&self, id: &str, body: &Value) -> HttpResponse {
        let name = Self::key_name(id);
        self.keys.lock().insert(
            name.clone(),
            CryptoKey {
                purpose: body["purpose"].as_str().unwrap_or_default().to_string(),
                versions: vec![(format!("{name}/cryptoKeyVersions/1"), true)],
            },
        );
        self.order.lock().push(name.clone());
        reply(200, json!({ "name": name, "purpose": body["purpose"] }))
    }

    /// Looks up a usable key, mirroring the errors Cloud KMS returns.
    fn usable(&self, name: &str) -> Result<(), HttpResponse> {
        let keys = self.keys.lock();
        let key = keys.get(name).ok_or_else(|| error(404, "NOT_FOUND"))?;
        if key.purpose != "ENCRYPT_DECRYPT" {
            return Err(error(400, "INVALID_ARGUMENT"));
        }
        if !key.versions.iter().any(|(_, enabled)| *enabled) {
            return Err(error(400, "FAILED_PRECONDITION"));
        }
        Ok(())
    }

    fn handle(&self, method: &Method, path: &str, query: Option<&str>, body: Value) -> HttpResponse {
        let resource = path.trim_start_matches("/v1/");

        if let Some(name) = resource.strip_suffix(":encrypt") {
            if let Err(response) = self.usable(name) {
                return response;
            }
            let plaintext = BASE64.decode(body["plaintext"].as_str().unwrap_or_default()).unwrap();
            let mut sealed = name.as_bytes().to_vec();
            sealed.push(0);
            sealed.extend(plaintext.iter().map(|byte| !byte));
            sealed.push(plaintext.iter().fold(0u8, |acc, byte| acc ^ byte));
            return reply(
                200,
                json!({ "name": format!("{name}/cryptoKeyVersions/1"), "ciphertext": BASE64.encode(sealed) }),
            );
        }

        if let Some(name) = resource.strip_suffix(":decrypt") {
            if let Err(response) = self.usable(name) {
                return response;
            }
            let sealed = BASE64.decode(body["ciphertext"].as_str().unwrap_or_default()).unwrap();
            let prefix_length = name.len() + 1;
            if sealed.len() <= prefix_length || &sealed[..name.len()] != name.as_bytes() {
                return error(400, "INVALID_ARGUMENT");
            }
            let (checksum, body) = sealed[prefix_length..].split_last().unwrap();
            let plaintext: Vec<u8> = body.iter().map(|byte| !byte).collect();
            if plaintext.iter().fold(0u8, |acc, byte| acc ^ byte) != *checksum {
                return error(400, "INVALID_ARGUMENT");
            }
            return reply(200, json!({ "plaintext": BASE64.encode(plaintext) }));
        }

        if let Some(version) = resource.strip_suffix(":destroy") {
            let mut keys = self.keys.lock();
            for key in keys.values_mut() {
                for (name, enabled) in key.versions.iter_mut() {
                    if name == version {
                        *enabled = false;
                        return reply(200, json!({ "name": name, "state": "DESTROY_SCHEDULED" }));
                    }
                }
            }
            return error(404, "NOT_FOUND");
        }

        if let Some(name) = resource.strip_suffix("/cryptoKeyVersions") {
            assert_eq!(query, Some("filter=state%3DENABLED"));
            let keys = self.keys.lock();
            let Some(key) = keys.get(name) else {
                return error(404, "NOT_FOUND");
            };
            let versions: Vec<Value> = key
                .versions
                .iter()
                .filter(|(_, enabled)| *enabled)
                .map(|(name, _)| json!({ "name": name, "state": "ENABLED" }))
                .collect();
            return reply(200, json!({ "cryptoKeyVersions": versions }));
        }

        if resource == format!("{KEY_RING}/cryptoKeys") {
            if *method == Method::POST {
                let id = query
                    .and_then(|query| query.strip_prefix("cryptoKeyId="))
                    .unwrap_or_default();
                return self.create(id, &body);
            }

            // One key per page so pagination gets exercised.
            let order = self.order.lock();
            let start: usize = query
                .and_then(|query| query.strip_prefix("pageToken="))
                .map(|token| token.parse().unwrap())
                .unwrap_or(0);
            let page: Vec<Value> = order
                .get(start)
                .map(|name| vec![json!({ "name": name })])
                .unwrap_or_default();
            let next = (start + 1 < order.len()).then(|| (start + 1).to_string());
            return reply(200, json!({ "cryptoKeys": page, "nextPageToken": next }));
        }

        error(404, "NOT_FOUND")
    }
}

#[async_trait]
impl HttpTransport for FakeCloudKms {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, KmsError> {
        self.requests.lock().push(request.clone());

        if request.header("authorization") != Some("Bearer test-token") {
            return Ok(error(401, "UNAUTHENTICATED"));
        }

        let body = if request.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&request.body).unwrap()
        };
        Ok(self.handle(
            &request.method,
            request.url.path(),
            request.url.query(),
            body,
        ))
    }
}

fn provider(transport: Arc<FakeCloudKms>) -> GcpKmsProvider {
    GcpKmsProvider::new(
        GcpKmsConfig {
            project_id: "test-project".into(),
            location: "global".into(),
            key_ring: "jwt".into(),
            default_key: None,
            endpoint: None,
        },
        Arc::new(StaticAccessToken::new("test-token")),
        transport,
    )
    .unwrap()
}

#[tokio::test]
async fn gcp_backend_conforms() {
    let fresh = || provider(Arc::new(FakeCloudKms::default()));
    conformance::generate_key_returns_unique_ids(&fresh()).await;
    conformance::list_keys_includes_generated_keys(&fresh()).await;
    conformance::encrypt_does_not_leak_plaintext(&fresh()).await;
    conformance::encrypt_with_unknown_key_fails(&fresh()).await;
    conformance::delete_key_disables_the_key(&fresh()).await;
    conformance::decrypt_round_trips_or_is_unsupported(&fresh()).await;
    conformance::decrypt_rejects_tampered_ciphertext(&fresh()).await;
}

#[tokio::test]
async fn it_creates_keys_in_the_configured_ring() -> TestResult {
    let fake = Arc::new(FakeCloudKms::default());
    let kms = provider(fake.clone());

    let handle = kms.generate_key(Some(KeySpec::Hmac256)).await?;
    assert!(handle.key_id.as_str().starts_with("keyward-"));

    let requests = fake.requests.lock();
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(
        request.url.path(),
        format!("/v1/{KEY_RING}/cryptoKeys")
    );
    assert_eq!(
        request.url.query(),
        Some(format!("cryptoKeyId={}", handle.key_id).as_str())
    );

    let body: Value = serde_json::from_slice(&request.body)?;
    assert_eq!(body["purpose"], "MAC");
    assert_eq!(body["versionTemplate"]["algorithm"], "HMAC_SHA256");
    Ok(())
}

#[tokio::test]
async fn delete_destroys_every_enabled_version() -> TestResult {
    let fake = Arc::new(FakeCloudKms::default());
    let kms = provider(fake.clone());
    let key_id = kms.generate_key(None).await?.key_id;

    kms.delete_key(&key_id).await?;

    let destroyed = fake
        .requests
        .lock()
        .iter()
        .filter(|request| request.url.path().ends_with(":destroy"))
        .count();
    assert_eq!(destroyed, 1);
    assert!(matches!(
        kms.encrypt(b"seed", Some(&key_id)).await,
        Err(KmsError::KeyDisabled(_))
    ));
    Ok(())
}

#[tokio::test]
async fn list_keys_follows_page_tokens() -> TestResult {
    let kms = provider(Arc::new(FakeCloudKms::default()));
    let mut created = Vec::new();
    for _ in 0..3 {
        created.push(kms.generate_key(None).await?.key_id);
    }

    assert_eq!(kms.list_keys().await?, created);
    Ok(())
}

#[tokio::test]
async fn unauthenticated_requests_surface_backend_errors() {
    let kms = GcpKmsProvider::new(
        GcpKmsConfig {
            project_id: "test-project".into(),
            location: "global".into(),
            key_ring: "jwt".into(),
            default_key: None,
            endpoint: None,
        },
        Arc::new(StaticAccessToken::new("wrong-token")),
        Arc::new(FakeCloudKms::default()),
    )
    .unwrap();

    let result = kms.list_keys().await;
    assert!(matches!(
        result,
        Err(KmsError::Backend { ref code, .. }) if code == "UNAUTHENTICATED"
    ));
}
