/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Typed message envelopes for the Autopush WebSocket protocol.
//!
//! `communications.rs`'s HTTP variant models requests/responses as ad-hoc
//! structs per endpoint (`RegisterResponse`, `SubscribeResponse`). Here
//! everything rides one text-frame JSON transport tagged by
//! `messageType`, so each direction gets one `serde` tagged enum instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Disposition code for an `unregister` frame. The client only
/// ever sends `USER_UNSUBSCRIBED`; kept as a plain constant rather than an
/// enum since the wire value is a bare integer and there's only one
/// producer.
pub const UNREGISTER_USER_UNSUBSCRIBED: u16 = 200;

/// One entry in an outbound `ack`/inbound-derived acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckUpdate {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    pub version: String,
    pub code: u16,
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello {
        uaid: String,
        #[serde(rename = "channelIDs")]
        channel_ids: Vec<String>,
        use_webpush: bool,
    },
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "channelID")]
        channel_id: String,
        key: Option<String>,
    },
    #[serde(rename = "unregister")]
    Unregister {
        #[serde(rename = "channelID")]
        channel_id: String,
        code: u16,
    },
    #[serde(rename = "ack")]
    Ack { updates: Vec<AckUpdate> },
    #[serde(rename = "nack")]
    Nack {
        #[serde(rename = "channelID")]
        channel_id: String,
        version: String,
        code: u16,
    },
    #[serde(rename = "broadcast_subscribe")]
    BroadcastSubscribe {
        broadcasts: HashMap<String, String>,
    },
    #[serde(rename = "ping")]
    Ping {},
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ServerMessage {
    #[serde(rename = "hello")]
    Hello {
        status: i32,
        uaid: String,
        #[serde(default, rename = "useWebPush")]
        use_webpush: bool,
    },
    #[serde(rename = "register")]
    Register {
        status: i32,
        #[serde(rename = "channelID")]
        channel_id: String,
        #[serde(rename = "pushEndpoint")]
        push_endpoint: Option<String>,
    },
    #[serde(rename = "unregister")]
    Unregister {
        status: i32,
        #[serde(rename = "channelID")]
        channel_id: String,
    },
    #[serde(rename = "notification")]
    Notification {
        #[serde(rename = "channelID")]
        channel_id: String,
        version: String,
        #[serde(default)]
        ttl: i64,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
    },
    #[serde(rename = "broadcast")]
    Broadcast {
        #[serde(default)]
        broadcasts: HashMap<String, serde_json::Value>,
    },
    #[serde(rename = "ping")]
    Ping {},
}

impl AckUpdate {
    /// Builds the `ack` entry for a successfully processed notification.
    pub fn new(channel_id: String, version: String, code: crate::error::AckCode) -> Self {
        Self {
            channel_id,
            version,
            code: code as u16,
        }
    }
}
