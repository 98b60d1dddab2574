use thiserror::Error;

use crate::jid::Jid;

/// Failures reported by a messaging backend or client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid JID '{0}'")]
    InvalidJid(String),

    #[error("identity store error: {0}")]
    IdentityStore(String),

    #[error("device {0} is already paired")]
    AlreadyPaired(Jid),

    #[error("client is not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("media download failed: {0}")]
    Download(String),

    #[error("send failed: {0}")]
    Send(String),
}
