//! Cloud KMS backends exercised against in-process fakes of their HTTP APIs.
//!
//! The fakes implement just enough of AWS KMS and Cloud KMS to run the
//! provider conformance suite and to check the request shapes each provider
//! emits. No network access is needed.

mod aws;
mod gcp;
