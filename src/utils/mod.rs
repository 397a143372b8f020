//! Pure utility functions.
//!
//! These are stateless helper functions used across the codebase.

pub mod bootstrap;
pub mod retry;

use sha2::{Digest, Sha256};

/// Short SHA-256 fingerprint of a payload, for log fields and error messages.
pub fn payload_digest(payload: &[u8]) -> String {
    let hash = Sha256::digest(payload);
    hex::encode(&hash[..8])
}
