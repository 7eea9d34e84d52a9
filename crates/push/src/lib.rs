//! Web Push delivery.
//!
//! Encrypts a JSON payload for one subscription (RFC 8291), signs it with the
//! server's VAPID key (RFC 8292), POSTs it to the endpoint and classifies the
//! response into a [`DeliveryResult`].

pub mod client;
pub mod error;
pub mod payload;
pub mod vapid;

pub use {
    client::{DeliveryResult, PushSender, WebPushSender, WebPushSenderConfig, classify_status},
    error::{Error, Result},
    payload::PushPayload,
    vapid::VapidKeys,
};
