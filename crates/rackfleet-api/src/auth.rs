//! Challenge/response authentication between rack and region.
//!
//! The rack sends a random message; the region answers with a fresh salt
//! and `HMAC-SHA256(secret, message || salt)`. The rack recomputes the
//! digest with its own copy of the shared secret and compares in constant
//! time. The secret itself never crosses the wire.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random challenge message and of the salt.
pub const NONCE_LEN: usize = 16;

/// Generate a random challenge message or salt.
pub fn random_nonce() -> Vec<u8> {
    let mut buf = vec![0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn keyed(secret: &[u8], message: &[u8], salt: &[u8]) -> Result<HmacSha256, Error> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| Error::Digest(e.to_string()))?;
    mac.update(message);
    mac.update(salt);
    Ok(mac)
}

/// Compute the digest the region returns for `message` and `salt`.
pub fn calculate_digest(secret: &[u8], message: &[u8], salt: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(keyed(secret, message, salt)?.finalize().into_bytes().to_vec())
}

/// Verify a digest received from the peer.
pub fn verify_digest(secret: &[u8], message: &[u8], salt: &[u8], digest: &[u8]) -> bool {
    keyed(secret, message, salt).is_ok_and(|mac| mac.verify_slice(digest).is_ok())
}

/// Serde helper carrying raw bytes as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
