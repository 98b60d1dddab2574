//! Messaging network capability.
//!
//! The protocol client itself is an external collaborator. This crate fixes
//! the seam the gateway talks through: a [`MessagingBackend`] that provisions
//! or loads device identities, and a [`MessagingClient`] per session that
//! connects, pairs, downloads media and emits [`InboundEvent`]s.

pub mod error;
pub mod events;
pub mod jid;
pub mod loopback;
pub mod platform;
pub mod plugin;

pub use {
    error::ChannelError,
    events::{InboundEvent, PairingEvent},
    jid::Jid,
    platform::PlatformType,
    plugin::{DeviceProps, EventHandler, MessagingBackend, MessagingClient, Presence},
};
