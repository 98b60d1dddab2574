//! Events emitted by a messaging client.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::jid::Jid;

/// App-state patch whose completion marks the end of the initial sync.
pub const CRITICAL_BLOCK: &str = "critical_block";

// ── Pairing ─────────────────────────────────────────────────────────────────

/// Item of the one-shot pairing stream opened before the first connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh code to display; repeats until scanned or expired.
    CodeIssued(String),
    TimedOut,
    Paired {
        jid: Jid,
        business_name: String,
        platform: String,
    },
}

// ── Inbound events ──────────────────────────────────────────────────────────

/// Every event kind a client can deliver to its handlers.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    AppStateSyncComplete { name: String },
    Connected,
    PushNameSetting { push_name: String },
    PairSuccess(PairSuccessEvent),
    StreamReplaced,
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    Presence(PresenceEvent),
    HistorySync(HistorySyncEvent),
    AppState(AppStateEvent),
    LoggedOut { reason: String },
    ChatPresence(ChatPresenceEvent),
    CallOffer(CallEvent),
    CallAccept(CallEvent),
    CallTerminate(CallEvent),
    CallOfferNotice(CallEvent),
    CallRelayLatency(CallEvent),
    /// Anything the client decoded but the gateway has no variant for.
    Unknown { kind: String, payload: Value },
}

impl InboundEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::AppStateSyncComplete { .. } => "app_state_sync_complete",
            Self::Connected => "connected",
            Self::PushNameSetting { .. } => "push_name_setting",
            Self::PairSuccess(_) => "pair_success",
            Self::StreamReplaced => "stream_replaced",
            Self::Message(_) => "message",
            Self::Receipt(_) => "receipt",
            Self::Presence(_) => "presence",
            Self::HistorySync(_) => "history_sync",
            Self::AppState(_) => "app_state",
            Self::LoggedOut { .. } => "logged_out",
            Self::ChatPresence(_) => "chat_presence",
            Self::CallOffer(_) => "call_offer",
            Self::CallAccept(_) => "call_accept",
            Self::CallTerminate(_) => "call_terminate",
            Self::CallOfferNotice(_) => "call_offer_notice",
            Self::CallRelayLatency(_) => "call_relay_latency",
            Self::Unknown { kind, .. } => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSuccessEvent {
    pub id: Jid,
    pub business_name: String,
    pub platform: String,
}

/// Where a message, receipt or chat-state came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSource {
    pub chat: Jid,
    pub sender: Jid,
    pub is_from_me: bool,
    pub is_group: bool,
}

impl MessageSource {
    /// Short human-readable origin for logs.
    pub fn describe(&self) -> String {
        if self.is_group {
            format!("{} in {}", self.sender, self.chat)
        } else {
            self.chat.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: String,
    #[serde(flatten)]
    pub source: MessageSource,
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Opaque handle the client needs to fetch an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub direct_path: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub kind: MediaKind,
    pub media: MediaRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub info: MessageInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_view_once: bool,
    #[serde(default)]
    pub is_ephemeral: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    Delivered,
    Read,
    ReadSelf,
    Played,
    PlayedSelf,
    Sender,
    Retry,
    Inactive,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEvent {
    pub message_ids: Vec<String>,
    #[serde(flatten)]
    pub source: MessageSource,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ReceiptKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub from: Jid,
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Raw history payload, dumped verbatim to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySyncEvent {
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateEvent {
    pub index: Vec<String>,
    pub action: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPresenceState {
    Composing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPresenceMedia {
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPresenceEvent {
    #[serde(flatten)]
    pub source: MessageSource,
    pub state: ChatPresenceState,
    pub media: ChatPresenceMedia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub from: Jid,
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}
