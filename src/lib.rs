/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]
//! # autopush-client
//!
//! A client-side implementation of Mozilla's Autopush WebSocket protocol,
//! layered on top of the standard [Web Push](https://datatracker.ietf.org/doc/html/rfc8030)
//! building blocks: [RFC 8291](https://datatracker.ietf.org/doc/html/rfc8291)
//! message encryption, [RFC 8188](https://datatracker.ietf.org/doc/html/rfc8188)
//! `aes128gcm` content coding, and [RFC 8292](https://datatracker.ietf.org/doc/html/rfc8292)
//! VAPID.
//!
//! ## Background
//!
//! Autopush multiplexes every subscription a host owns over one
//! WebSocket connection, identified by a single *UAID* ("user-agent id")
//! the server assigns on first connect. Each subscription is a *channel
//! id* the host mints locally; `hello` announces the full channel-id set
//! for the session, `register`/`unregister` add and remove individual
//! ones, and `notification` frames deliver encrypted payloads the client
//! decrypts and dispatches to whichever part of the host owns that
//! channel.
//!
//! This crate does not speak HTTP to the autopush bridge the way the
//! `mozilla-application-services` push component does for mobile
//! platforms — there is no native push service underneath it, so every
//! subscription rides the same WebSocket from open to close.
//!
//! ## Example
//!
//! ```no_run
//! use autopush_client::config::PushConfiguration;
//! use autopush_client::crypto::Crypto;
//! use autopush_client::push_manager::PushManager;
//! use autopush_client::storage::memory::MemoryKvStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> autopush_client::error::Result<()> {
//! let config = PushConfiguration::new("wss://push.services.mozilla.com/");
//! let backend = Arc::new(MemoryKvStore::new()) as Arc<dyn autopush_client::storage::KvStore>;
//! let manager = PushManager::create(config, backend, Arc::new(Crypto::new())).await?;
//! manager.connect();
//!
//! let subscription = manager.subscribe(None).await?;
//! println!("{subscription}");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod mediator;
pub mod message;
pub mod push_manager;
pub mod senders;
pub mod socket;
pub mod storage;
pub mod subscription;

pub use config::PushConfiguration;
pub use error::{PushError, Result};
pub use push_manager::PushManager;
