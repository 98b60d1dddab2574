use std::{io, path::PathBuf};

use {hookgate_channels::ChannelError, reqwest::StatusCode, thiserror::Error};

use crate::pairing::InvalidTransition;

/// Why a session could not be established. Recorded as the session's
/// terminal exit; other sessions are unaffected.
///
/// The cause is part of the message and is not repeated as a `source`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    #[error("stored jid is invalid: {0}")]
    InvalidJid(ChannelError),

    #[error("identity lookup failed: {0}")]
    IdentityLookup(ChannelError),

    #[error("could not create a device identity: {0}")]
    NewIdentity(ChannelError),

    #[error("failed to build http client: {0}")]
    HttpClient(String),

    #[error("pairing could not start: {0}")]
    Pairing(InvalidTransition),

    #[error("could not open pairing stream: {0}")]
    PairingChannel(ChannelError),

    #[error("could not connect: {0}")]
    Connect(ChannelError),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook responded with {0}")]
    Status(StatusCode),

    #[error("failed to read attachment {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid multipart part: {0}")]
    Multipart(String),
}

impl DeliveryError {
    /// Transport failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_builder(),
            Self::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            },
            Self::File { .. } | Self::Multipart(_) => false,
        }
    }
}

/// Failures writing attachments or history dumps under the files directory.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("could not create directory {}: {source}", .path.display())]
    Dir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download failed: {0}")]
    Download(#[from] ChannelError),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode history payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("message id {0:?} cannot be used as a file name")]
    InvalidName(String),
}
