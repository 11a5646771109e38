/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! RFC 8291 (Web Push message encryption) and RFC 8292 (VAPID) on the
//! receiving end.
//!
//! `internal/crypto.rs`'s approach wraps the `ece` crate, which hides the
//! intermediate CEK/nonce values behind a single `decrypt` call. This
//! module instead hand-rolls HKDF/ECDH/AES-128-GCM so
//! `web_push_decrypt_prep` can expose those intermediates, mirrored from
//! the encrypt-direction implementation in `rust-srec`'s `web_push.rs`
//! (same HKDF info strings, reversed role: we are always the UA/receiver,
//! never the sender).

pub mod jwk;

use crate::codec::{random_bytes, to_base64url};
use crate::error::{PushError, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use hkdf::Hkdf;
use jwk::{public_key_from_raw, PrivateKeyJwk};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::Sha256;

const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const KEY_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";
const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;

/// The per-record intermediate values `web_push_decrypt_prep` exposes,
/// ahead of the AES-GCM decrypt itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptPrep {
    pub cek: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Everything the push manager needs from the crypto layer. A trait (not
/// a bare set of free functions) so tests can substitute a fixed-output
/// double, the way `internal::crypto::Cryptography` does for
/// `PushManager<Co, Cr, S>`.
#[cfg_attr(test, mockall::automock)]
pub trait Cryptography {
    fn random_bytes(&self, len: usize) -> Vec<u8>;
    fn generate_key(&self) -> Result<PrivateKeyJwk>;
    fn web_push_decrypt_prep(
        &self,
        private_key: &PrivateKeyJwk,
        auth_secret: &[u8],
        sender_public_raw: &[u8],
        salt: &[u8],
        ciphertext: Vec<u8>,
    ) -> Result<DecryptPrep>;
    fn aes_gcm_decrypt(&self, cek: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
    fn remove_padding(&self, data: Vec<u8>) -> Result<Vec<u8>>;
    /// Verifies an `Authorization: vapid t=<jwt>, k=<b64url pubkey>` header
    /// against the VAPID public key this client expects. Never errors:
    /// any shape violation (missing fields, bad base64, wrong key, a
    /// signature that doesn't verify) simply returns `false`.
    fn verify_vapid_auth(&self, header: &str, expected_public_key_raw: &[u8]) -> bool;
}

#[derive(Default, Clone, Copy)]
pub struct Crypto;

impl Crypto {
    pub fn new() -> Self {
        Self
    }

    fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = vec![0u8; len];
        hk.expand(info, &mut okm)
            .map_err(|_| PushError::CryptoError("HKDF expand failed".to_string()))?;
        Ok(okm)
    }

    /// IV for record `counter` under RFC 8188's nonce-derivation scheme.
    /// Every subscription in this client uses a single-record body, so
    /// `counter` is always 0, but the derivation is written generally.
    fn record_iv(nonce: &[u8], counter: u64) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv.copy_from_slice(nonce);
        let tail = u64::from_be_bytes(iv[4..12].try_into().unwrap());
        iv[4..12].copy_from_slice(&(tail ^ counter).to_be_bytes());
        iv
    }
}

impl Cryptography for Crypto {
    fn random_bytes(&self, len: usize) -> Vec<u8> {
        random_bytes(len)
    }

    fn generate_key(&self) -> Result<PrivateKeyJwk> {
        let secret = SecretKey::random(&mut p256::elliptic_curve::rand_core::OsRng);
        Ok(PrivateKeyJwk::from_secret_key(&secret))
    }

    fn web_push_decrypt_prep(
        &self,
        private_key: &PrivateKeyJwk,
        auth_secret: &[u8],
        sender_public_raw: &[u8],
        salt: &[u8],
        ciphertext: Vec<u8>,
    ) -> Result<DecryptPrep> {
        if salt.len() != SALT_LEN {
            return Err(PushError::CryptoError(format!(
                "salt must be {SALT_LEN} bytes, got {}",
                salt.len()
            )));
        }
        if sender_public_raw.len() != PUBLIC_KEY_LEN {
            return Err(PushError::CryptoError(format!(
                "sender public key must be {PUBLIC_KEY_LEN} bytes, got {}",
                sender_public_raw.len()
            )));
        }

        let receiver_secret = private_key.to_secret_key()?;
        let receiver_public_raw = receiver_secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let sender_public: PublicKey = public_key_from_raw(sender_public_raw)?;

        let shared = p256::ecdh::diffie_hellman(
            receiver_secret.to_nonzero_scalar(),
            sender_public.as_affine(),
        );

        let mut info = Vec::with_capacity(IKM_INFO_PREFIX.len() + 2 * PUBLIC_KEY_LEN);
        info.extend_from_slice(IKM_INFO_PREFIX);
        info.extend_from_slice(&receiver_public_raw);
        info.extend_from_slice(sender_public_raw);

        let ikm = Self::hkdf_sha256(auth_secret, shared.raw_secret_bytes(), &info, 32)?;
        let cek = Self::hkdf_sha256(salt, &ikm, KEY_INFO, 16)?;
        let nonce = Self::hkdf_sha256(salt, &ikm, NONCE_INFO, 12)?;

        Ok(DecryptPrep {
            cek,
            nonce,
            ciphertext,
        })
    }

    fn aes_gcm_decrypt(&self, cek: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128Gcm::new_from_slice(cek)
            .map_err(|_| PushError::CryptoError("invalid CEK length".to_string()))?;
        let iv = Self::record_iv(nonce, 0);
        cipher
            .decrypt((&iv).into(), ciphertext)
            .map_err(|_| PushError::CryptoError("AES-GCM decryption failed".to_string()))
    }

    /// Strips RFC 8188 record padding: trailing zero bytes, then the
    /// delimiter byte (`0x02` for the last/only record in this client's
    /// single-record bodies).
    fn remove_padding(&self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        while data.last() == Some(&0) {
            data.pop();
        }
        match data.pop() {
            Some(0x02) => Ok(data),
            Some(other) => Err(PushError::CryptoError(format!(
                "unexpected record delimiter {other:#x}, expected 0x02"
            ))),
            None => Err(PushError::CryptoError(
                "empty record has no delimiter".to_string(),
            )),
        }
    }

    fn verify_vapid_auth(&self, header: &str, expected_public_key_raw: &[u8]) -> bool {
        let tokens: Vec<&str> = header.split_whitespace().collect();
        let [scheme, t_field, k_field] = tokens.as_slice() else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("vapid") {
            return false;
        }
        let Some(jwt) = t_field.trim_end_matches(',').strip_prefix("t=") else {
            return false;
        };
        let Some(key_b64) = k_field.strip_prefix("k=") else {
            return false;
        };

        if key_b64 != to_base64url(expected_public_key_raw) {
            return false;
        }

        let mut parts = jwt.split('.');
        let (Some(jwt_header), Some(jwt_body), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(expected_public_key_raw) else {
            return false;
        };
        let Ok(sig_bytes) = crate::codec::from_base64url(sig_b64) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };

        let signing_input = format!("{jwt_header}.{jwt_body}");
        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .is_ok()
    }
}
