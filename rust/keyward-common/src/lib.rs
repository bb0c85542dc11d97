#![warn(missing_docs)]

//! This crate constitutes a library of light weight helpers that are shared
//! across the keyward crates: a clock abstraction that key rotation can be
//! tested against, base64url/hex encoding used by every wire format we touch,
//! and process-wide tracing initialisation.

pub mod encoding;
pub mod logging;
pub mod time;

pub use encoding::*;
pub use time::{Clock, ManualClock, SystemClock};
