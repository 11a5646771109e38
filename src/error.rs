/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Crate-wide error type.
//!
//! Mirrors the shape of `internal::error::PushError`: a single enum deriving
//! `thiserror::Error`, with `#[from]` conversions for the handful of
//! library errors that cross our boundaries, and ack-code helpers for the
//! places where a failure must be translated into a protocol-level code
//! rather than propagated to the host.

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The frame did not match any known shape for its `messageType`.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Header parsing, ECDH, HKDF, AES-GCM or padding failure.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// A notification referenced a channel-id this registry has no record of.
    #[error("Unknown subscription for channel {0}")]
    UnknownSubscription(String),

    /// The autopush server reported a transient (500) failure.
    #[error("Server transient error: {0}")]
    ServerTransientError(String),

    /// The autopush server reported a conflict (409) on register.
    #[error("Server conflict: {0}")]
    ServerConflict(String),

    /// The WebSocket transport failed or closed unexpectedly.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The host called an API in a way the protocol does not allow.
    #[error("Misuse: {0}")]
    Misuse(String),

    /// Failure from the namespaced storage wrapper or its backend.
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

/// Disposition of a processed notification, sent back to the server as
/// part of a batched `ack` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AckCode {
    Success = 100,
    DecryptFail = 101,
    OtherFail = 102,
}

impl PushError {
    /// Maps a processing failure to the ack code the `NotificationHandler`
    /// must report. Crypto/shape failures are always `DECRYPT_FAIL`;
    /// everything else (unknown channel, storage, misuse surfacing this
    /// far) is `OTHER_FAIL`. Authorization failures are intentionally not
    /// distinguished yet, pending server behavior clarification.
    pub fn to_ack_code(&self) -> AckCode {
        match self {
            PushError::CryptoError(_) => AckCode::DecryptFail,
            _ => AckCode::OtherFail,
        }
    }
}
