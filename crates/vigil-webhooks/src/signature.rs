//! HMAC-SHA256 payload signatures.
//!
//! The signature header value is `sha256=<lowercase hex>` computed over the
//! exact request body bytes with the subscription's secret as key.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Sign `payload` with `secret`. Returns `sha256=<64 hex chars>`.
pub fn generate_signature(payload: &[u8], secret: &str) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Check `signature` against `payload` and `secret` in constant time.
///
/// Empty inputs and length mismatches are rejected before comparing.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    if payload.is_empty() || signature.is_empty() || secret.is_empty() {
        return false;
    }
    let expected = generate_signature(payload, secret);
    if expected.len() != signature.len() {
        return false;
    }
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
