use async_trait::async_trait;
use base64::Engine;
use keyward_common::{BASE64, ManualClock};
use keyward_kms::{
    AwsCredentials, AwsKmsConfig, AwsKmsProvider, HttpRequest, HttpResponse, HttpTransport,
    KmsError, KmsKeyId, KmsProvider, conformance, decrypt,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc};
use testresult::TestResult;

const ACCOUNT_ARN: &str = "arn:aws:kms:us-east-1:111122223333:key";

/// In-process stand-in for the AWS KMS JSON API.
#[derive(Debug, Default)]
struct FakeAwsKms {
    /// key id -> enabled
    keys: Mutex<HashMap<String, bool>>,
    order: Mutex<Vec<String>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeAwsKms {
    fn reply(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    fn error(kind: &str) -> HttpResponse {
        Self::reply(400, json!({ "__type": kind, "message": kind }))
    }

    /// Accepts a key id or ARN.
    fn check_key(&self, key_id: &str) -> Result<String, HttpResponse> {
        let key_id = key_id.rsplit('/').next().unwrap_or(key_id).to_string();
        match self.keys.lock().get(&key_id) {
            Some(true) => Ok(key_id),
            Some(false) => Err(Self::error("KMSInvalidStateException")),
            None => Err(Self::error("NotFoundException")),
        }
    }

    fn seal(key_id: &str, plaintext: &[u8]) -> Vec<u8> {
        let mut blob = vec![key_id.len() as u8];
        blob.extend_from_slice(key_id.as_bytes());
        blob.extend(plaintext.iter().map(|byte| byte ^ 0xa5));
        blob.push(plaintext.iter().fold(0u8, |acc, byte| acc ^ byte));
        blob
    }

    fn open(blob: &[u8]) -> Option<(String, Vec<u8>)> {
        let id_length = *blob.first()? as usize;
        let key_id = String::from_utf8(blob.get(1..1 + id_length)?.to_vec()).ok()?;
        let (checksum, body) = blob.get(1 + id_length..)?.split_last()?;
        let plaintext: Vec<u8> = body.iter().map(|byte| byte ^ 0xa5).collect();
        let expected = plaintext.iter().fold(0u8, |acc, byte| acc ^ byte);
        (expected == *checksum).then_some((key_id, plaintext))
    }

    fn handle(&self, target: &str, body: Value) -> HttpResponse {
        match target {
            "TrentService.CreateKey" => {
                let mut order = self.order.lock();
                let key_id = format!("1234abcd-12ab-34cd-56ef-{:012}", order.len() + 1);
                self.keys.lock().insert(key_id.clone(), true);
                order.push(key_id.clone());
                Self::reply(
                    200,
                    json!({ "KeyMetadata": {
                        "KeyId": key_id,
                        "Arn": format!("{ACCOUNT_ARN}/{key_id}"),
                        "KeySpec": body["KeySpec"],
                        "KeyUsage": body["KeyUsage"],
                    }}),
                )
            }
            "TrentService.Encrypt" => {
                let key_id = match self.check_key(body["KeyId"].as_str().unwrap_or_default()) {
                    Ok(key_id) => key_id,
                    Err(response) => return response,
                };
                let plaintext = BASE64
                    .decode(body["Plaintext"].as_str().unwrap_or_default())
                    .unwrap();
                Self::reply(
                    200,
                    json!({
                        "CiphertextBlob": BASE64.encode(Self::seal(&key_id, &plaintext)),
                        "KeyId": format!("{ACCOUNT_ARN}/{key_id}"),
                    }),
                )
            }
            "TrentService.Decrypt" => {
                let key_id = match self.check_key(body["KeyId"].as_str().unwrap_or_default()) {
                    Ok(key_id) => key_id,
                    Err(response) => return response,
                };
                let blob = BASE64
                    .decode(body["CiphertextBlob"].as_str().unwrap_or_default())
                    .unwrap();
                match Self::open(&blob) {
                    Some((sealed_under, plaintext)) if sealed_under == key_id => Self::reply(
                        200,
                        json!({ "Plaintext": BASE64.encode(plaintext), "KeyId": key_id }),
                    ),
                    Some(_) => Self::error("IncorrectKeyException"),
                    None => Self::error("InvalidCiphertextException"),
                }
            }
            "TrentService.ScheduleKeyDeletion" => {
                let key_id = match self.check_key(body["KeyId"].as_str().unwrap_or_default()) {
                    Ok(key_id) => key_id,
                    Err(response) => return response,
                };
                assert_eq!(body["PendingWindowInDays"], 7);
                self.keys.lock().insert(key_id.clone(), false);
                Self::reply(200, json!({ "KeyId": key_id, "KeyState": "PendingDeletion" }))
            }
            "TrentService.ListKeys" => {
                // Two keys per page so pagination gets exercised.
                let order = self.order.lock();
                let start: usize = body["Marker"]
                    .as_str()
                    .map(|marker| marker.parse().unwrap())
                    .unwrap_or(0);
                let end = (start + 2).min(order.len());
                let keys: Vec<Value> = order[start..end]
                    .iter()
                    .map(|key_id| json!({ "KeyId": key_id, "KeyArn": format!("{ACCOUNT_ARN}/{key_id}") }))
                    .collect();
                let truncated = end < order.len();
                Self::reply(
                    200,
                    json!({
                        "Keys": keys,
                        "Truncated": truncated,
                        "NextMarker": truncated.then(|| end.to_string()),
                    }),
                )
            }
            other => Self::reply(
                400,
                json!({ "__type": "UnknownOperationException", "message": other }),
            ),
        }
    }
}

#[async_trait]
impl HttpTransport for FakeAwsKms {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, KmsError> {
        self.requests.lock().push(request.clone());

        let authorized = request
            .header("authorization")
            .is_some_and(|value| value.starts_with("AWS4-HMAC-SHA256 Credential=AKIDTEST/"));
        if !authorized {
            return Ok(Self::reply(
                403,
                json!({ "__type": "AccessDeniedException", "message": "unsigned" }),
            ));
        }

        let target = request.header("x-amz-target").unwrap_or_default().to_string();
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        Ok(self.handle(&target, body))
    }
}

/// Always answers with the given status.
#[derive(Debug)]
struct FailingTransport(u16);

#[async_trait]
impl HttpTransport for FailingTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, KmsError> {
        Ok(HttpResponse {
            status: self.0,
            body: br#"{"__type":"KMSInternalException","message":"try later"}"#.to_vec(),
        })
    }
}

fn config() -> AwsKmsConfig {
    AwsKmsConfig {
        region: "us-east-1".into(),
        key_alias: None,
        endpoint: None,
        credentials: AwsCredentials::new("AKIDTEST", "test-secret"),
    }
}

fn provider(transport: Arc<dyn HttpTransport>) -> AwsKmsProvider {
    AwsKmsProvider::new(config(), transport).unwrap()
}

#[tokio::test]
async fn aws_backend_conforms() {
    conformance::generate_key_returns_unique_ids(&provider(Arc::new(FakeAwsKms::default()))).await;
    conformance::list_keys_includes_generated_keys(&provider(Arc::new(FakeAwsKms::default()))).await;
    conformance::encrypt_does_not_leak_plaintext(&provider(Arc::new(FakeAwsKms::default()))).await;
    conformance::encrypt_with_unknown_key_fails(&provider(Arc::new(FakeAwsKms::default()))).await;
    conformance::delete_key_disables_the_key(&provider(Arc::new(FakeAwsKms::default()))).await;
    conformance::decrypt_round_trips_or_is_unsupported(&provider(Arc::new(FakeAwsKms::default())))
        .await;
    conformance::decrypt_rejects_tampered_ciphertext(&provider(Arc::new(FakeAwsKms::default())))
        .await;
}

#[tokio::test]
async fn it_sends_signed_json_requests() -> TestResult {
    let fake = Arc::new(FakeAwsKms::default());
    let clock = Arc::new(ManualClock::new("2024-03-01T10:00:00Z".parse()?));
    let kms = provider(fake.clone()).with_clock(clock);

    kms.generate_key(None).await?;

    let requests = fake.requests.lock();
    let request = &requests[0];
    assert_eq!(request.method, reqwest::Method::POST);
    assert_eq!(request.url.as_str(), "https://kms.us-east-1.amazonaws.com/");
    assert_eq!(request.header("x-amz-target"), Some("TrentService.CreateKey"));
    assert_eq!(
        request.header("content-type"),
        Some("application/x-amz-json-1.1")
    );
    assert_eq!(request.header("x-amz-date"), Some("20240301T100000Z"));
    assert!(
        request
            .header("authorization")
            .unwrap_or_default()
            .contains("/20240301/us-east-1/kms/aws4_request")
    );

    let body: Value = serde_json::from_slice(&request.body)?;
    assert_eq!(body["KeySpec"], "SYMMETRIC_DEFAULT");
    assert_eq!(body["KeyUsage"], "ENCRYPT_DECRYPT");
    Ok(())
}

#[tokio::test]
async fn default_key_comes_from_the_alias() -> TestResult {
    let fake = Arc::new(FakeAwsKms::default());
    let bootstrap = provider(fake.clone());
    let key_id = bootstrap.generate_key(None).await?.key_id;

    let kms = AwsKmsProvider::new(
        AwsKmsConfig {
            key_alias: Some(key_id.to_string()),
            ..config()
        },
        fake.clone(),
    )?;
    let encrypted = kms.encrypt(b"seed", None).await?;
    assert_eq!(encrypted.key_id.as_str(), format!("{ACCOUNT_ARN}/{key_id}"));

    let recovered = decrypt(&kms, &encrypted).await?;
    assert_eq!(&recovered[..], b"seed");
    Ok(())
}

#[tokio::test]
async fn encrypt_without_a_default_key_fails() {
    let kms = provider(Arc::new(FakeAwsKms::default()));
    assert!(matches!(
        kms.encrypt(b"seed", None).await,
        Err(KmsError::NoDefaultKey)
    ));
}

#[tokio::test]
async fn decrypt_under_an_unknown_key_is_a_decryption_error() -> TestResult {
    let kms = provider(Arc::new(FakeAwsKms::default()));
    let key_id = kms.generate_key(None).await?.key_id;
    let encrypted = kms.encrypt(b"seed", Some(&key_id)).await?;

    let decrypter = kms.decrypter().ok_or("aws can decrypt")?;
    let result = decrypter
        .decrypt(&encrypted.ciphertext, &KmsKeyId::new("missing"))
        .await;
    assert!(matches!(result, Err(KmsError::Decryption(_))));
    Ok(())
}

#[tokio::test]
async fn list_keys_follows_pagination() -> TestResult {
    let kms = provider(Arc::new(FakeAwsKms::default()));
    let mut created = Vec::new();
    for _ in 0..5 {
        created.push(kms.generate_key(None).await?.key_id);
    }

    assert_eq!(kms.list_keys().await?, created);
    Ok(())
}

#[tokio::test]
async fn server_errors_are_transient() {
    let kms = provider(Arc::new(FailingTransport(500)));
    let result = kms.encrypt(b"seed", Some(&KmsKeyId::new("any"))).await;
    assert!(matches!(result, Err(ref error) if error.is_transient()));
}
