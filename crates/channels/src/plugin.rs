use std::sync::Arc;

use {async_trait::async_trait, bytes::Bytes, tokio::sync::mpsc};

use crate::{
    error::ChannelError,
    events::{InboundEvent, MediaRef, PairingEvent},
    jid::Jid,
    platform::PlatformType,
};

/// Callback invoked for every inbound event, in arrival order.
///
/// Called from the client's receive path, so it must not block.
pub type EventHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Device properties announced when a client links or reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProps {
    pub os_name: String,
    pub platform: PlatformType,
    /// Forward the protocol client's own logs.
    pub verbose: bool,
}

/// Our own availability, as broadcast to contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
}

/// Provisions clients bound to a device identity.
#[async_trait]
pub trait MessagingBackend: Send + Sync {
    /// Backend identifier for logs (e.g. "loopback").
    fn id(&self) -> &str;

    /// Create a client for a brand new, unpaired device.
    async fn new_identity(
        &self,
        props: &DeviceProps,
    ) -> Result<Arc<dyn MessagingClient>, ChannelError>;

    /// Create a client for a stored device. `Ok(None)` means the store has no
    /// such device.
    async fn load_identity(
        &self,
        jid: &Jid,
        props: &DeviceProps,
    ) -> Result<Option<Arc<dyn MessagingClient>>, ChannelError>;
}

/// One live connection to the messaging network.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Whether the device has a stored identity (no pairing needed).
    fn is_logged_in(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Display name of the linked account, once known.
    fn push_name(&self) -> Option<String>;

    /// Register an event callback. Returns an id for removal.
    fn add_event_handler(&self, handler: EventHandler) -> u32;

    fn remove_event_handler(&self, id: u32) -> bool;

    /// Open the pairing stream. Must be called before `connect` on an
    /// unpaired device; fails with [`ChannelError::AlreadyPaired`] otherwise.
    async fn pairing_codes(&self) -> Result<mpsc::Receiver<PairingEvent>, ChannelError>;

    async fn connect(&self) -> Result<(), ChannelError>;

    async fn disconnect(&self);

    async fn send_presence(&self, presence: Presence) -> Result<(), ChannelError>;

    async fn download(&self, media: &MediaRef) -> Result<Bytes, ChannelError>;
}
