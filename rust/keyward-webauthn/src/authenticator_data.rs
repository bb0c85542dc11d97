//! Authenticator data parsing.
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, big-endian)
//!   [ aaguid (16) | credentialIdLength (2, big-endian) | credentialId | COSE key ]   if AT
//!   [ extensions (CBOR map) ]                                                       if ED
//! ```

use ciborium::Value;
use std::fmt;

use crate::{CoseKey, VerificationError};

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

/// The flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorFlags(pub u8);

impl AuthenticatorFlags {
    /// UP: the user was present.
    pub const USER_PRESENT: u8 = 0x01;
    /// UV: the user was verified (PIN, biometrics).
    pub const USER_VERIFIED: u8 = 0x04;
    /// BE: the credential may be backed up.
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    /// BS: the credential is backed up.
    pub const BACKED_UP: u8 = 0x10;
    /// AT: attested credential data follows.
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    /// ED: an extensions map follows.
    pub const EXTENSION_DATA: u8 = 0x80;

    fn has(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    /// Whether the user-present bit is set.
    pub fn user_present(self) -> bool {
        self.has(Self::USER_PRESENT)
    }

    /// Whether the user-verified bit is set.
    pub fn user_verified(self) -> bool {
        self.has(Self::USER_VERIFIED)
    }

    /// Whether the backup-eligible bit is set.
    pub fn backup_eligible(self) -> bool {
        self.has(Self::BACKUP_ELIGIBLE)
    }

    /// Whether the backed-up bit is set.
    pub fn backed_up(self) -> bool {
        self.has(Self::BACKED_UP)
    }

    /// Whether attested credential data is present.
    pub fn attested_credential_data(self) -> bool {
        self.has(Self::ATTESTED_CREDENTIAL_DATA)
    }

    /// Whether extension data is present.
    pub fn extension_data(self) -> bool {
        self.has(Self::EXTENSION_DATA)
    }
}

/// Authenticator model identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Aaguid(pub [u8; AAGUID_LEN]);

impl fmt::Display for Aaguid {
    /// Hyphenated UUID form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if matches!(index, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Aaguid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aaguid({self})")
    }
}

impl serde::Serialize for Aaguid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The credential created during registration.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    /// Authenticator model
    pub aaguid: Aaguid,
    /// Raw credential id
    pub credential_id: Vec<u8>,
    /// The credential public key
    pub public_key: CoseKey,
}

/// Parsed `authenticatorData`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    /// SHA-256 of the RP ID the authenticator scoped the credential to
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    /// Flags
    pub flags: AuthenticatorFlags,
    /// Signature counter
    pub counter: u32,
    /// Present when the AT flag is set
    pub attested_credential: Option<AttestedCredentialData>,
    /// Present when the ED flag is set
    pub extensions: Option<Value>,
}

impl AuthenticatorData {
    /// Parse authenticator data, including any attested credential data and
    /// extensions its flags announce.
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid(format!(
                "expected at least {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let (rp_id_hash, rest) = bytes.split_at(RP_ID_HASH_LEN);
        let flags = AuthenticatorFlags(rest[0]);
        let counter = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]);
        let mut rest = &rest[5..];

        let attested_credential = if flags.attested_credential_data() {
            Some(parse_attested_credential(&mut rest)?)
        } else {
            None
        };

        let extensions = if flags.extension_data() {
            let value: Value = ciborium::from_reader(&mut rest)
                .map_err(|e| invalid(format!("extensions: {e}")))?;
            Some(value)
        } else {
            None
        };

        if !rest.is_empty() {
            return Err(invalid(format!("{} trailing bytes", rest.len())));
        }

        let mut hash = [0; RP_ID_HASH_LEN];
        hash.copy_from_slice(rp_id_hash);

        Ok(Self {
            rp_id_hash: hash,
            flags,
            counter,
            attested_credential,
            extensions,
        })
    }
}

/// Walk the attested credential data at the front of `rest`, advancing it
/// past the COSE key. The key's length is only known once it is decoded.
fn parse_attested_credential(
    rest: &mut &[u8],
) -> Result<AttestedCredentialData, VerificationError> {
    let aaguid = take(rest, AAGUID_LEN, "AAGUID")?;
    let length = take(rest, 2, "credential ID length")?;
    let length = usize::from(u16::from_be_bytes([length[0], length[1]]));
    let credential_id = take(rest, length, "credential ID")?.to_vec();

    let key: Value = ciborium::from_reader(&mut *rest)
        .map_err(|e| invalid(format!("credential public key: {e}")))?;
    let public_key = CoseKey::from_value(&key)?;

    let mut id = [0; AAGUID_LEN];
    id.copy_from_slice(aaguid);

    Ok(AttestedCredentialData {
        aaguid: Aaguid(id),
        credential_id,
        public_key,
    })
}

fn take<'a>(rest: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], VerificationError> {
    if rest.len() < len {
        return Err(invalid(format!("truncated {what}")));
    }
    let (head, tail) = rest.split_at(len);
    *rest = tail;
    Ok(head)
}

fn invalid(reason: String) -> VerificationError {
    VerificationError::InvalidAuthenticatorData(reason)
}
