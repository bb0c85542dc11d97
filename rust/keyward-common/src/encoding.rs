//! Byte encodings shared by the KMS wire formats, key records and WebAuthn
//! payloads.

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use std::fmt::Write;

/// Base64url without padding on encode; padding is accepted on decode.
///
/// Browsers emit unpadded base64url for WebAuthn fields but some client
/// libraries pad, so decoding is indifferent to `=`.
pub const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Standard base64 with padding, as used by the cloud KMS JSON APIs.
pub const BASE64: GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Encode bytes as unpadded base64url.
pub fn base64url_encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64URL.encode(bytes)
}

/// Decode base64url, with or without padding.
pub fn base64url_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64URL.decode(input)
}

/// Hex-encode bytes (lowercase).
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing into a String cannot fail
        let _ = write!(result, "{:02x}", byte);
    }
    result
}

/// Serde adapter storing `Vec<u8>` fields as unpadded base64url strings.
pub mod serde_base64url {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as a base64url string.
    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::base64url_encode(bytes))
    }

    /// Deserialize bytes from a base64url string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::base64url_decode(encoded).map_err(serde::de::Error::custom)
    }
}
