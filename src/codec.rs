/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Byte/codec utilities: base64, base64url, UTF-8, and CSPRNG bytes.
//!
//! Grounded on the repeated `base64::encode_config(..., URL_SAFE_NO_PAD)`
//! idiom in `internal/crypto.rs` and `internal/push_manager.rs`, updated to the
//! `base64` 0.21 `Engine` API.

use crate::error::Result;
use base64::{engine::general_purpose, Engine as _};
use rand_core::{OsRng, RngCore};

/// Encode bytes as base64url without padding (the encoding used on the wire
/// for `auth`, `p256dh`, and record fields).
pub fn to_base64url(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url (with or without padding; the server is lenient).
pub fn from_base64url(s: &str) -> Result<Vec<u8>> {
    Ok(general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .or_else(|_| general_purpose::URL_SAFE.decode(s))?)
}

/// Encode bytes as standard base64 (used for JWT segments before the
/// URL-safe rewrite, kept for completeness/round-trip testing).
pub fn to_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    Ok(general_purpose::STANDARD.decode(s)?)
}

pub fn to_utf8(bytes: Vec<u8>) -> Result<String> {
    Ok(String::from_utf8(bytes)?)
}

/// `n` bytes from the system CSPRNG. Used for auth secrets and anywhere
/// else fresh random material is needed.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Joins a namespace prefix and a key with `:`, eliding an empty prefix:
/// `join_namespaces("a","b") == "a:b"`, `join_namespaces("","b") == "b"`,
/// `join_namespaces("a","") == "a"`.
pub fn join_namespaces(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else if key.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_round_trips() {
        let data = b"\x00\x01\xff\xfe hello push";
        let encoded = to_base64url(data);
        assert_eq!(from_base64url(&encoded).unwrap(), data);
        assert!(!encoded.contains('='));
    }

    #[test]
    fn base64_round_trips() {
        let data = b"arbitrary bytes \xfe\xff";
        let encoded = to_base64(data);
        assert_eq!(from_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn utf8_round_trips() {
        let s = "hello \u{1F600}";
        assert_eq!(to_utf8(s.as_bytes().to_vec()).unwrap(), s);
    }

    #[test]
    fn join_namespaces_elides_empty_segments() {
        assert_eq!(join_namespaces("a", "b"), "a:b");
        assert_eq!(join_namespaces("", "b"), "b");
        assert_eq!(join_namespaces("a", ""), "a");
    }

    #[test]
    fn random_bytes_has_requested_length() {
        assert_eq!(random_bytes(16).len(), 16);
        assert_ne!(random_bytes(16), random_bytes(16));
    }
}
