//! The CBOR attestation object returned by `navigator.credentials.create()`.
//!
//! Attestation statements are carried through but not trust-evaluated: every
//! format is accepted as if it were `none`/self attestation and only the
//! format name is reported. Relying parties that need authenticator
//! provenance must check `attStmt` against their own trust anchors.

use ciborium::Value;

use crate::VerificationError;

/// A decoded `attestationObject`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    /// Attestation statement format (`none`, `packed`, `tpm`, ...)
    pub fmt: String,
    /// Raw authenticator data
    pub auth_data: Vec<u8>,
    /// The format-specific statement, undecoded
    pub att_stmt: Value,
}

impl AttestationObject {
    /// Decode an attestation object from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, VerificationError> {
        let value: Value = ciborium::from_reader(bytes).map_err(|e| invalid(e.to_string()))?;
        let entries = value
            .as_map()
            .ok_or_else(|| invalid("expected a CBOR map".into()))?;

        let field = |name: &str| {
            entries
                .iter()
                .find(|(key, _)| key.as_text() == Some(name))
                .map(|(_, value)| value)
                .ok_or_else(|| invalid(format!("missing {name}")))
        };

        let fmt = field("fmt")?
            .as_text()
            .ok_or_else(|| invalid("fmt is not text".into()))?
            .to_owned();
        let auth_data = field("authData")?
            .as_bytes()
            .ok_or_else(|| invalid("authData is not a byte string".into()))?
            .clone();
        let att_stmt = field("attStmt")?.clone();
        if !att_stmt.is_map() {
            return Err(invalid("attStmt is not a map".into()));
        }

        Ok(Self {
            fmt,
            auth_data,
            att_stmt,
        })
    }
}

fn invalid(reason: String) -> VerificationError {
    VerificationError::InvalidAttestationObject(reason)
}
