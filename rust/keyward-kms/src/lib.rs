#![warn(missing_docs)]

//! Key-management service abstraction.
//!
//! A [`KmsProvider`] protects key material on behalf of the JWT key manager.
//! Four backends ship with this crate:
//!
//! - [`LocalKmsProvider`]: keys derived from a master secret. Encryption is a
//!   one-way keyed tag, so this backend cannot decrypt.
//! - [`MemoryKmsProvider`]: process-local AES-256-GCM. Useful in tests and
//!   single-process deployments.
//! - [`AwsKmsProvider`]: AWS KMS over its JSON API, signed with SigV4.
//! - [`GcpKmsProvider`]: Google Cloud KMS over its REST API.
//!
//! Backends that can decrypt expose it through [`KmsProvider::decrypter`];
//! callers go through [`decrypt`], which reports
//! [`KmsError::DecryptUnsupported`] instead of silently returning input.

pub mod aws;
pub mod config;
mod error;
pub mod gcp;
mod key;
pub mod local;
pub mod memory;
mod provider;
pub mod transport;

#[cfg(any(test, feature = "helpers"))]
pub mod conformance;

pub use aws::{AwsCredentials, AwsKmsConfig, AwsKmsProvider};
pub use config::{KmsConfig, connect};
pub use error::*;
pub use gcp::{AccessTokenSource, GcpKmsConfig, GcpKmsProvider, StaticAccessToken};
pub use key::*;
pub use local::LocalKmsProvider;
pub use memory::MemoryKmsProvider;
pub use provider::*;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
