//! `CollectedClientData`, the JSON the browser signs over.

use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::VerificationError;

/// Client data type of a registration ceremony.
pub const TYPE_CREATE: &str = "webauthn.create";
/// Client data type of an authentication ceremony.
pub const TYPE_GET: &str = "webauthn.get";

/// The fields of `clientDataJSON` that verification looks at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    /// `webauthn.create` or `webauthn.get`
    #[serde(rename = "type")]
    pub ty: String,
    /// The challenge, base64url
    pub challenge: String,
    /// Origin of the calling document
    pub origin: String,
    /// Whether the call came from a cross-origin iframe
    #[serde(default)]
    pub cross_origin: bool,
    /// Origin of the top-level document when `cross_origin` is set
    #[serde(default)]
    pub top_origin: Option<String>,
}

impl CollectedClientData {
    /// Parse `clientDataJSON` bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, VerificationError> {
        serde_json::from_slice(bytes)
            .map_err(|e| VerificationError::InvalidClientData(e.to_string()))
    }

    pub(crate) fn check_type(&self, expected: &'static str) -> Result<(), VerificationError> {
        if self.ty != expected {
            return Err(VerificationError::ClientDataType {
                expected,
                actual: self.ty.clone(),
            });
        }
        Ok(())
    }

    /// Compare the signed challenge with the issued one. Padding is ignored
    /// on both sides.
    pub(crate) fn check_challenge(&self, issued: &str) -> Result<(), VerificationError> {
        let signed = self.challenge.trim_end_matches('=').as_bytes();
        let issued = issued.trim_end_matches('=').as_bytes();
        if bool::from(signed.ct_eq(issued)) {
            Ok(())
        } else {
            Err(VerificationError::ChallengeMismatch)
        }
    }

    pub(crate) fn check_origin(&self, expected: &str) -> Result<(), VerificationError> {
        if self.origin != expected {
            return Err(VerificationError::OriginMismatch);
        }
        Ok(())
    }
}
