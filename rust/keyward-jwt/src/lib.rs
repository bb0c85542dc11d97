#![warn(missing_docs)]

//! JWT signing-key management.
//!
//! [`JwtKeyManager`] owns a ring of HMAC signing keys. Each key starts life as
//! a random seed that is protected once by a [`KmsProvider`]; only the
//! protected bytes are persisted (through a [`KeyMetadataStore`]) and the
//! signing material is re-derived from them with HKDF whenever the manager
//! starts. Keys rotate on a timer: a new key becomes current, superseded keys
//! keep verifying until the active set exceeds its bound, and the oldest are
//! then deactivated and their KMS keys deleted.
//!
//! The [`token`] module layers compact JWS issuance and verification on top.
//!
//! [`KmsProvider`]: keyward_kms::KmsProvider

mod config;
mod error;
mod keying;
mod manager;
mod record;
mod scheduler;
mod store;
pub mod token;

pub use config::*;
pub use error::*;
pub use manager::*;
pub use record::*;
pub use store::*;
