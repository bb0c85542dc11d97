#![warn(missing_docs)]

//! Stateless verification of WebAuthn (passkey) ceremonies.
//!
//! [`WebAuthnVerifier::verify_registration`] checks an attestation returned
//! by `navigator.credentials.create()` and extracts the credential to store;
//! [`WebAuthnVerifier::verify_authentication`] checks an assertion returned
//! by `navigator.credentials.get()` against that stored credential and
//! proposes the next signature counter. Supported algorithms are ES256,
//! ES384, ES512, EdDSA (Ed25519) and RS256.
//!
//! ```no_run
//! # use keyward_webauthn::*;
//! # fn load() -> (AuthenticationCredential, StoredCredential, Challenge) { unimplemented!() }
//! let (credential, mut stored, challenge) = load();
//! let outcome = WebAuthnVerifier::default().verify_authentication(
//!     &credential,
//!     &stored,
//!     &challenge,
//!     "https://app.example.com",
//! );
//! if let Some(counter) = outcome.new_counter {
//!     stored.counter = counter;
//! }
//! ```

mod attestation;
mod authenticator_data;
mod client_data;
mod cose;
mod credential;
mod error;
mod verifier;

pub use attestation::*;
pub use authenticator_data::*;
pub use client_data::*;
pub use cose::*;
pub use credential::*;
pub use error::*;
pub use verifier::*;
