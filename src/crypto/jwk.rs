/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! JSON Web Key export/import for the P-256 keypair a subscription stores
//! at `privateEncKey`.
//!
//! The `ece`/`rc_crypto` crypto layers never surface a JWK — they take
//! raw key bytes. This shape comes from the subscription
//! record format needed here (`privateEncKey` persisted as a JWK,
//! recoverable across restarts), matching what the Push API exposes to
//! web content in browsers.

use crate::codec::{from_base64url, to_base64url};
use crate::error::{PushError, Result};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

/// A private EC key in JWK form, `kty: "EC"`, `crv: "P-256"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivateKeyJwk {
    pub kty: String,
    pub crv: String,
    pub d: String,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub ext: bool,
    #[serde(default, rename = "key_ops")]
    pub key_ops: Vec<String>,
}

impl PrivateKeyJwk {
    pub fn from_secret_key(secret: &SecretKey) -> Self {
        let public = secret.public_key();
        let encoded = public.to_encoded_point(false);
        let x = encoded.x().expect("uncompressed point has x");
        let y = encoded.y().expect("uncompressed point has y");
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            d: to_base64url(&secret.to_bytes()),
            x: to_base64url(x),
            y: to_base64url(y),
            ext: true,
            key_ops: vec!["deriveKey".to_string(), "deriveBits".to_string()],
        }
    }

    pub fn to_secret_key(&self) -> Result<SecretKey> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(PushError::CryptoError(format!(
                "unsupported JWK kty/crv: {}/{}",
                self.kty, self.crv
            )));
        }
        let d = from_base64url(&self.d)?;
        SecretKey::from_slice(&d)
            .map_err(|e| PushError::CryptoError(format!("invalid JWK private scalar: {e}")))
    }

    /// The raw uncompressed SEC1 public key point (0x04 || x || y), the
    /// form used on the wire as `p256dh`.
    pub fn public_key_raw(&self) -> Result<Vec<u8>> {
        let secret = self.to_secret_key()?;
        Ok(secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec())
    }
}

/// Parses a raw SEC1 uncompressed point into a `p256::PublicKey`.
pub fn public_key_from_raw(raw: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(raw)
        .map_err(|e| PushError::CryptoError(format!("invalid EC public key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn jwk_round_trips_through_secret_key() {
        let secret = SecretKey::random(&mut OsRng);
        let jwk = PrivateKeyJwk::from_secret_key(&secret);
        let recovered = jwk.to_secret_key().unwrap();
        assert_eq!(secret.to_bytes(), recovered.to_bytes());
    }

    #[test]
    fn public_key_raw_matches_encoded_point() {
        let secret = SecretKey::random(&mut OsRng);
        let jwk = PrivateKeyJwk::from_secret_key(&secret);
        let raw = jwk.public_key_raw().unwrap();
        assert_eq!(raw, secret.public_key().to_encoded_point(false).as_bytes());
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);
    }
}
