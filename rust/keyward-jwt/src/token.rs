//! Compact JWS issuance and verification.
//!
//! Tokens are `base64url(header).base64url(claims).base64url(signature)`
//! with header `{"alg": "HS…", "typ": "JWT", "kid": <key record id>}`, signed
//! by the manager's current key and verified against whichever active key the
//! `kid` names.

use keyward_common::{base64url_decode, base64url_encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::time::Duration;

use crate::{JwtKeyManager, TokenError};

/// JOSE header of an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Signing algorithm (`HS256`, `HS384` or `HS512`)
    pub alg: String,
    /// Token type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Id of the signing key record
    pub kid: String,
}

/// A token that passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken<C> {
    /// The token header
    pub header: Header,
    /// The decoded claims
    pub claims: C,
}

impl JwtKeyManager {
    /// Issue a compact JWT carrying `claims`, signed with the current key.
    ///
    /// `claims` must serialize to a JSON object. `iat` is always set to now;
    /// `exp` is set to now + `ttl` when a TTL is given and the claims do not
    /// already carry one.
    pub fn issue_token<C: Serialize>(
        &self,
        claims: &C,
        ttl: Option<Duration>,
    ) -> Result<String, TokenError> {
        let Value::Object(mut payload) =
            serde_json::to_value(claims).map_err(|e| TokenError::Encoding(e.to_string()))?
        else {
            return Err(TokenError::Encoding("claims must be a JSON object".into()));
        };

        let now = self.clock.now().timestamp();
        payload.insert("iat".into(), now.into());
        if let Some(ttl) = ttl {
            let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            payload
                .entry("exp")
                .or_insert_with(|| now.saturating_add(ttl).into());
        }

        let (kid, key) = self
            .current_signing_key()
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        let header = Header {
            alg: key.algorithm().name().into(),
            typ: Some("JWT".into()),
            kid,
        };

        let signing_input = format!(
            "{}.{}",
            encode_segment(&header)?,
            encode_segment(&payload)?
        );
        let signature = key
            .sign(signing_input.as_bytes())
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(format!("{signing_input}.{}", base64url_encode(&signature)))
    }

    /// Verify a compact JWT and decode its claims.
    ///
    /// Rejects tokens whose `kid` is unknown or inactive, whose `alg` differs
    /// from the key's, whose signature does not verify, whose `exp` has
    /// passed or whose `nbf` has not yet arrived.
    pub fn verify_token<C: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<VerifiedToken<C>, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_segment), Some(payload_segment), Some(signature_segment), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed("expected three segments".into()));
        };

        let header: Header = decode_segment(header_segment, "header")?;
        let key = self
            .ring
            .read()
            .active_key(&header.kid)
            .ok_or_else(|| TokenError::UnknownKey(header.kid.clone()))?;

        let expected = key.algorithm().name();
        if header.alg != expected {
            return Err(TokenError::AlgorithmMismatch {
                expected: expected.into(),
                actual: header.alg,
            });
        }

        let signature = base64url_decode(signature_segment)
            .map_err(|e| TokenError::Malformed(format!("signature: {e}")))?;
        let signing_input = &token[..header_segment.len() + 1 + payload_segment.len()];
        if !key.verify(signing_input.as_bytes(), &signature) {
            tracing::debug!(kid = %header.kid, "Token signature mismatch");
            return Err(TokenError::InvalidSignature);
        }

        let payload: Value = decode_segment(payload_segment, "claims")?;
        let now = self.clock.now().timestamp();
        if let Some(exp) = numeric_claim(&payload, "exp")? {
            if exp <= now {
                return Err(TokenError::Expired);
            }
        }
        if let Some(nbf) = numeric_claim(&payload, "nbf")? {
            if nbf > now {
                return Err(TokenError::NotYetValid);
            }
        }

        let claims = serde_json::from_value(payload)
            .map_err(|e| TokenError::Malformed(format!("claims: {e}")))?;
        Ok(VerifiedToken { header, claims })
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    serde_json::to_vec(value)
        .map(base64url_encode)
        .map_err(|e| TokenError::Encoding(e.to_string()))
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, TokenError> {
    let bytes =
        base64url_decode(segment).map_err(|e| TokenError::Malformed(format!("{what}: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("{what}: {e}")))
}

fn numeric_claim(payload: &Value, name: &str) -> Result<Option<i64>, TokenError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(|seconds| Some(seconds.floor() as i64))
            .ok_or_else(|| TokenError::Malformed(format!("{name} is not a number"))),
    }
}
