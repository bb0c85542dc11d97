//! COSE public keys (RFC 9052/9053) as they appear in attested credential
//! data, their raw storage form, and signature verification against them.
//!
//! Stored keys are kept in the form each verifier consumes directly:
//!
//! | key type | raw form |
//! |----------|----------|
//! | EC2      | SEC1 uncompressed point `0x04 ‖ x ‖ y` |
//! | OKP      | 32-byte Ed25519 public key |
//! | RSA      | PKCS#1 `RSAPublicKey` DER |
//!
//! ECDSA signatures from authenticators are ASN.1 DER; they are parsed into
//! fixed-width `r ‖ s` with `Signature::from_der` before verification.

use ciborium::Value;
use rsa::{
    BigUint, RsaPublicKey,
    pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey},
    traits::PublicKeyParts,
};
use serde::{Deserialize, Serialize};
use signature::Verifier as _;
use std::fmt;

use crate::VerificationError;

/// COSE key type: octet key pair.
pub const KTY_OKP: i64 = 1;
/// COSE key type: elliptic curve with x and y coordinates.
pub const KTY_EC2: i64 = 2;
/// COSE key type: RSA.
pub const KTY_RSA: i64 = 3;

const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
// EC2/OKP: crv, x, y. RSA reuses -1/-2 for n and e.
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_Y: i64 = -3;
const LABEL_N: i64 = -1;
const LABEL_E: i64 = -2;

const SEC1_UNCOMPRESSED: u8 = 0x04;
const ED25519_KEY_LEN: usize = 32;

/// A COSE signature algorithm we can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA over P-256 with SHA-256
    Es256,
    /// ECDSA over P-384 with SHA-384
    Es384,
    /// ECDSA over P-521 with SHA-512
    Es512,
    /// EdDSA (Ed25519)
    EdDsa,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    /// The COSE algorithm identifier.
    pub const fn id(self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Es384 => -35,
            Self::Es512 => -36,
            Self::EdDsa => -8,
            Self::Rs256 => -257,
        }
    }

    /// The COSE key type this algorithm signs with.
    pub const fn key_type(self) -> i64 {
        match self {
            Self::Es256 | Self::Es384 | Self::Es512 => KTY_EC2,
            Self::EdDsa => KTY_OKP,
            Self::Rs256 => KTY_RSA,
        }
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = VerificationError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        match id {
            -7 => Ok(Self::Es256),
            -35 => Ok(Self::Es384),
            -36 => Ok(Self::Es512),
            -8 => Ok(Self::EdDsa),
            -257 => Ok(Self::Rs256),
            other => Err(VerificationError::UnsupportedAlgorithm(other)),
        }
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.id()
    }
}

impl fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::EdDsa => "EdDSA",
            Self::Rs256 => "RS256",
        };
        f.write_str(name)
    }
}

/// NIST curves for EC2 keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    /// P-256 (COSE crv 1)
    P256,
    /// P-384 (COSE crv 2)
    P384,
    /// P-521 (COSE crv 3)
    P521,
}

impl EcCurve {
    fn from_id(id: i64) -> Result<Self, VerificationError> {
        match id {
            1 => Ok(Self::P256),
            2 => Ok(Self::P384),
            3 => Ok(Self::P521),
            other => Err(cose_error(format!("unsupported EC2 curve {other}"))),
        }
    }

    /// Byte length of one affine coordinate.
    pub const fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }

    const fn algorithm(self) -> CoseAlgorithm {
        match self {
            Self::P256 => CoseAlgorithm::Es256,
            Self::P384 => CoseAlgorithm::Es384,
            Self::P521 => CoseAlgorithm::Es512,
        }
    }
}

/// Edwards curves for OKP keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OkpCurve {
    /// Ed25519 (COSE crv 6)
    Ed25519,
}

impl OkpCurve {
    fn from_id(id: i64) -> Result<Self, VerificationError> {
        match id {
            6 => Ok(Self::Ed25519),
            other => Err(cose_error(format!("unsupported OKP curve {other}"))),
        }
    }
}

/// Verify an ECDSA signature given as DER against a SEC1 point on `$curve`.
macro_rules! verify_ecdsa {
    ($curve:ident, $point:expr, $message:expr, $signature:expr) => {{
        let key = $curve::ecdsa::VerifyingKey::from_sec1_bytes($point)
            .map_err(|e| public_key_error(e.to_string()))?;
        let signature = $curve::ecdsa::Signature::from_der($signature)
            .map_err(|_| VerificationError::InvalidSignature)?;
        key.verify($message, &signature)
            .map_err(|_| VerificationError::InvalidSignature)
    }};
}

/// A credential public key.
#[derive(Clone, PartialEq, Eq)]
pub enum CoseKey {
    /// Elliptic-curve key with both affine coordinates
    Ec2 {
        /// Signature algorithm
        alg: CoseAlgorithm,
        /// Curve
        crv: EcCurve,
        /// x coordinate, big-endian, `crv.coordinate_len()` bytes
        x: Vec<u8>,
        /// y coordinate, big-endian, `crv.coordinate_len()` bytes
        y: Vec<u8>,
    },
    /// Octet key pair
    Okp {
        /// Signature algorithm
        alg: CoseAlgorithm,
        /// Curve
        crv: OkpCurve,
        /// Public key bytes
        x: Vec<u8>,
    },
    /// RSA key
    Rsa {
        /// Signature algorithm
        alg: CoseAlgorithm,
        /// Modulus, big-endian
        n: Vec<u8>,
        /// Public exponent, big-endian
        e: Vec<u8>,
    },
}

impl fmt::Debug for CoseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ec2 { alg, crv, .. } => f
                .debug_struct("Ec2")
                .field("alg", alg)
                .field("crv", crv)
                .finish_non_exhaustive(),
            Self::Okp { alg, crv, .. } => f
                .debug_struct("Okp")
                .field("alg", alg)
                .field("crv", crv)
                .finish_non_exhaustive(),
            Self::Rsa { alg, n, .. } => f
                .debug_struct("Rsa")
                .field("alg", alg)
                .field("bits", &(n.len() * 8))
                .finish_non_exhaustive(),
        }
    }
}

impl CoseKey {
    /// Decode a CBOR-encoded COSE key.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, VerificationError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| cose_error(format!("CBOR: {e}")))?;
        Self::from_value(&value)
    }

    /// Interpret an already decoded CBOR value as a COSE key.
    pub fn from_value(value: &Value) -> Result<Self, VerificationError> {
        let entries = value
            .as_map()
            .ok_or_else(|| cose_error("COSE key is not a map"))?;

        let lookup = |label: i64| {
            entries.iter().find_map(|(key, value)| {
                let key = i64::try_from(key.as_integer()?).ok()?;
                (key == label).then_some(value)
            })
        };
        let integer = |label: i64, name: &str| {
            lookup(label)
                .and_then(Value::as_integer)
                .and_then(|value| i64::try_from(value).ok())
                .ok_or_else(|| cose_error(format!("missing or non-integer {name}")))
        };
        let bytes = |label: i64, name: &str| {
            lookup(label)
                .and_then(Value::as_bytes)
                .cloned()
                .ok_or_else(|| cose_error(format!("missing or non-bytes {name}")))
        };

        let kty = integer(LABEL_KTY, "kty")?;
        let alg = CoseAlgorithm::try_from(integer(LABEL_ALG, "alg")?)?;
        if alg.key_type() != kty {
            return Err(cose_error(format!("{alg} cannot be used with key type {kty}")));
        }

        let key = match kty {
            KTY_EC2 => {
                let crv = EcCurve::from_id(integer(LABEL_CRV, "crv")?)?;
                if crv.algorithm() != alg {
                    return Err(cose_error(format!("{alg} cannot be used with {crv:?}")));
                }
                let x = bytes(LABEL_X, "x")?;
                let y = bytes(LABEL_Y, "y")?;
                let len = crv.coordinate_len();
                if x.len() != len || y.len() != len {
                    return Err(cose_error(format!(
                        "{crv:?} coordinates must be {len} bytes"
                    )));
                }
                Self::Ec2 { alg, crv, x, y }
            }
            KTY_OKP => {
                let crv = OkpCurve::from_id(integer(LABEL_CRV, "crv")?)?;
                let x = bytes(LABEL_X, "x")?;
                if x.len() != ED25519_KEY_LEN {
                    return Err(cose_error("Ed25519 keys must be 32 bytes"));
                }
                Self::Okp { alg, crv, x }
            }
            KTY_RSA => Self::Rsa {
                alg,
                n: bytes(LABEL_N, "n")?,
                e: bytes(LABEL_E, "e")?,
            },
            other => return Err(cose_error(format!("unsupported key type {other}"))),
        };
        Ok(key)
    }

    /// Rebuild a key from its stored raw form.
    pub fn from_public_key_bytes(
        alg: CoseAlgorithm,
        bytes: &[u8],
    ) -> Result<Self, VerificationError> {
        match alg {
            CoseAlgorithm::Es256 | CoseAlgorithm::Es384 | CoseAlgorithm::Es512 => {
                let crv = match alg {
                    CoseAlgorithm::Es256 => EcCurve::P256,
                    CoseAlgorithm::Es384 => EcCurve::P384,
                    _ => EcCurve::P521,
                };
                let len = crv.coordinate_len();
                match bytes.split_first() {
                    Some((&SEC1_UNCOMPRESSED, coordinates)) if coordinates.len() == 2 * len => {
                        let (x, y) = coordinates.split_at(len);
                        Ok(Self::Ec2 {
                            alg,
                            crv,
                            x: x.to_vec(),
                            y: y.to_vec(),
                        })
                    }
                    _ => Err(public_key_error(format!(
                        "expected an uncompressed {crv:?} point"
                    ))),
                }
            }
            CoseAlgorithm::EdDsa => {
                if bytes.len() != ED25519_KEY_LEN {
                    return Err(public_key_error("Ed25519 keys must be 32 bytes"));
                }
                Ok(Self::Okp {
                    alg,
                    crv: OkpCurve::Ed25519,
                    x: bytes.to_vec(),
                })
            }
            CoseAlgorithm::Rs256 => {
                let key = RsaPublicKey::from_pkcs1_der(bytes)
                    .map_err(|e| public_key_error(e.to_string()))?;
                Ok(Self::Rsa {
                    alg,
                    n: key.n().to_bytes_be(),
                    e: key.e().to_bytes_be(),
                })
            }
        }
    }

    /// The signature algorithm this key is bound to.
    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            Self::Ec2 { alg, .. } | Self::Okp { alg, .. } | Self::Rsa { alg, .. } => *alg,
        }
    }

    /// The raw form stored alongside a credential.
    pub fn to_public_key_bytes(&self) -> Result<Vec<u8>, VerificationError> {
        match self {
            Self::Ec2 { x, y, .. } => {
                let mut point = Vec::with_capacity(1 + x.len() + y.len());
                point.push(SEC1_UNCOMPRESSED);
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                Ok(point)
            }
            Self::Okp { x, .. } => Ok(x.clone()),
            Self::Rsa { .. } => {
                let der = self
                    .rsa_public_key()?
                    .to_pkcs1_der()
                    .map_err(|e| cose_error(e.to_string()))?;
                Ok(der.as_bytes().to_vec())
            }
        }
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), VerificationError> {
        match self {
            Self::Ec2 { crv, .. } => {
                let point = self.to_public_key_bytes()?;
                match crv {
                    EcCurve::P256 => verify_ecdsa!(p256, &point, message, signature),
                    EcCurve::P384 => verify_ecdsa!(p384, &point, message, signature),
                    EcCurve::P521 => verify_ecdsa!(p521, &point, message, signature),
                }
            }
            Self::Okp {
                crv: OkpCurve::Ed25519,
                x,
                ..
            } => {
                let key_bytes: [u8; ED25519_KEY_LEN] = x
                    .as_slice()
                    .try_into()
                    .map_err(|_| public_key_error("Ed25519 keys must be 32 bytes"))?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                    .map_err(|e| public_key_error(e.to_string()))?;
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| VerificationError::InvalidSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| VerificationError::InvalidSignature)
            }
            Self::Rsa { .. } => {
                let key =
                    rsa::pkcs1v15::VerifyingKey::<sha2::Sha256>::new(self.rsa_public_key()?);
                let signature = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| VerificationError::InvalidSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| VerificationError::InvalidSignature)
            }
        }
    }

    fn rsa_public_key(&self) -> Result<RsaPublicKey, VerificationError> {
        let Self::Rsa { n, e, .. } = self else {
            return Err(cose_error("not an RSA key"));
        };
        RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
            .map_err(|e| public_key_error(e.to_string()))
    }
}

fn cose_error(reason: impl Into<String>) -> VerificationError {
    VerificationError::InvalidCoseKey(reason.into())
}

fn public_key_error(reason: impl Into<String>) -> VerificationError {
    VerificationError::InvalidPublicKey(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integer(value: i64) -> Value {
        Value::Integer(value.into())
    }

    fn ec2_key(alg: i64, crv: i64, len: usize) -> Value {
        Value::Map(vec![
            (integer(LABEL_KTY), integer(KTY_EC2)),
            (integer(LABEL_ALG), integer(alg)),
            (integer(LABEL_CRV), integer(crv)),
            (integer(LABEL_X), Value::Bytes(vec![1; len])),
            (integer(LABEL_Y), Value::Bytes(vec![2; len])),
        ])
    }

    #[test]
    fn it_parses_ec2_keys_for_every_nist_curve() {
        for (alg, crv, len, expected) in [
            (-7, 1, 32, CoseAlgorithm::Es256),
            (-35, 2, 48, CoseAlgorithm::Es384),
            (-36, 3, 66, CoseAlgorithm::Es512),
        ] {
            let key = CoseKey::from_value(&ec2_key(alg, crv, len)).unwrap();
            assert_eq!(key.algorithm(), expected);

            let raw = key.to_public_key_bytes().unwrap();
            assert_eq!(raw.len(), 1 + 2 * len);
            assert_eq!(raw[0], SEC1_UNCOMPRESSED);
            assert_eq!(CoseKey::from_public_key_bytes(expected, &raw).unwrap(), key);
        }
    }

    #[test]
    fn it_rejects_mismatched_curve_and_algorithm() {
        let error = CoseKey::from_value(&ec2_key(-7, 2, 48)).unwrap_err();
        assert!(matches!(error, VerificationError::InvalidCoseKey(_)));
    }

    #[test]
    fn it_rejects_short_coordinates() {
        let error = CoseKey::from_value(&ec2_key(-7, 1, 31)).unwrap_err();
        assert!(matches!(error, VerificationError::InvalidCoseKey(_)));
    }

    #[test]
    fn it_reports_unsupported_algorithms() {
        let error = CoseKey::from_value(&ec2_key(-47, 1, 32)).unwrap_err();
        assert_eq!(error, VerificationError::UnsupportedAlgorithm(-47));
    }

    #[test]
    fn it_rejects_algorithms_for_the_wrong_key_type() {
        let key = Value::Map(vec![
            (integer(LABEL_KTY), integer(KTY_OKP)),
            (integer(LABEL_ALG), integer(-7)),
            (integer(LABEL_CRV), integer(6)),
            (integer(LABEL_X), Value::Bytes(vec![0; 32])),
        ]);
        assert!(matches!(
            CoseKey::from_value(&key),
            Err(VerificationError::InvalidCoseKey(_))
        ));
    }

    #[test]
    fn it_decodes_cbor_bytes() {
        let key = Value::Map(vec![
            (integer(LABEL_KTY), integer(KTY_OKP)),
            (integer(LABEL_ALG), integer(-8)),
            (integer(LABEL_CRV), integer(6)),
            (integer(LABEL_X), Value::Bytes(vec![9; 32])),
        ]);
        let mut encoded = Vec::new();
        ciborium::into_writer(&key, &mut encoded).unwrap();

        let decoded = CoseKey::from_cbor(&encoded).unwrap();
        assert_eq!(decoded.algorithm(), CoseAlgorithm::EdDsa);
        assert_eq!(decoded.to_public_key_bytes().unwrap(), vec![9; 32]);
    }

    #[test]
    fn it_rejects_non_map_keys() {
        assert!(matches!(
            CoseKey::from_value(&Value::Bytes(vec![0; 65])),
            Err(VerificationError::InvalidCoseKey(_))
        ));
    }

    #[test]
    fn stored_ec2_keys_must_be_uncompressed() {
        let mut compressed = vec![0x02];
        compressed.extend_from_slice(&[1; 32]);
        assert!(matches!(
            CoseKey::from_public_key_bytes(CoseAlgorithm::Es256, &compressed),
            Err(VerificationError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn algorithms_serialize_as_cose_ids() {
        assert_eq!(serde_json::to_string(&CoseAlgorithm::Rs256).unwrap(), "-257");
        assert_eq!(
            serde_json::from_str::<CoseAlgorithm>("-8").unwrap(),
            CoseAlgorithm::EdDsa
        );
        assert!(serde_json::from_str::<CoseAlgorithm>("-65535").is_err());
    }
}
