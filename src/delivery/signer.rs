//! HMAC-SHA256 payload signing.
//!
//! The signature covers the exact request body bytes. Receivers recompute it
//! with the shared secret and compare in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Webhook-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

fn keyed(secret: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// `sha256=<hex hmac>` over `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = keyed(secret);
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a `sha256=<hex>` header against `body` using constant-time comparison.
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = keyed(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
