//! Signing material derived from KMS-protected seeds.

use hkdf::Hkdf;
use hmac::{
    Hmac, Mac,
    digest::{InvalidLength, KeyInit},
};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{HmacAlgorithm, JwtKeyRecord, KeyManagerError};

const DERIVATION_CONTEXT: &[u8] = b"keyward/jwt-signing-key/v1:";

/// HMAC key material for one record. Zeroized on drop.
pub(crate) struct SigningKey {
    algorithm: HmacAlgorithm,
    material: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    /// Derive the signing key for `record`.
    ///
    /// HKDF over the protected seed, salted with the record id and bound to
    /// the algorithm, producing `record.key_size` bytes. The same record
    /// always yields the same material.
    pub(crate) fn derive(record: &JwtKeyRecord) -> Result<Self, KeyManagerError> {
        let salt = record.id.as_bytes();
        let ikm = &record.protected_material;
        let info = [DERIVATION_CONTEXT, record.algorithm.name().as_bytes()].concat();
        let mut material = Zeroizing::new(vec![0u8; record.key_size]);

        let result = match record.algorithm {
            HmacAlgorithm::Hs256 => {
                Hkdf::<Sha256>::new(Some(salt), ikm).expand(&info, &mut material)
            }
            HmacAlgorithm::Hs384 => {
                Hkdf::<Sha384>::new(Some(salt), ikm).expand(&info, &mut material)
            }
            HmacAlgorithm::Hs512 => {
                Hkdf::<Sha512>::new(Some(salt), ikm).expand(&info, &mut material)
            }
        };
        result.map_err(|error| KeyManagerError::KeyDerivation {
            key_id: record.id.clone(),
            reason: error.to_string(),
        })?;

        Ok(Self {
            algorithm: record.algorithm,
            material,
        })
    }

    pub(crate) fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    /// HMAC of `data` under this key.
    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
        match self.algorithm {
            HmacAlgorithm::Hs256 => mac::<Hmac<Sha256>>(&self.material, data),
            HmacAlgorithm::Hs384 => mac::<Hmac<Sha384>>(&self.material, data),
            HmacAlgorithm::Hs512 => mac::<Hmac<Sha512>>(&self.material, data),
        }
    }

    /// Constant-time check of `signature` over `data`.
    pub(crate) fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self.sign(data) {
            Ok(expected) => expected.ct_eq(signature).into(),
            Err(_) => false,
        }
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = <M as Mac>::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
