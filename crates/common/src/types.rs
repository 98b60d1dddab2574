use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::error::ValidationError;

// ── User id ──────────────────────────────────────────────────────────────────

/// Primary key of a user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ── Subscription labels ──────────────────────────────────────────────────────

/// Webhook event labels a user can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLabel {
    Message,
    ReadReceipt,
    Presence,
    HistorySync,
    ChatPresence,
    /// Sentinel matching every label.
    All,
}

impl EventLabel {
    pub const ALL_LABELS: [EventLabel; 6] = [
        EventLabel::Message,
        EventLabel::ReadReceipt,
        EventLabel::Presence,
        EventLabel::HistorySync,
        EventLabel::ChatPresence,
        EventLabel::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::ReadReceipt => "ReadReceipt",
            Self::Presence => "Presence",
            Self::HistorySync => "HistorySync",
            Self::ChatPresence => "ChatPresence",
            Self::All => "All",
        }
    }

    /// Whether a subscription set admits this label (exact match or `All`).
    pub fn admitted_by(&self, subscriptions: &[EventLabel]) -> bool {
        subscriptions
            .iter()
            .any(|s| *s == EventLabel::All || s == self)
    }
}

impl fmt::Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventLabel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL_LABELS
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownLabel(s.to_string()))
    }
}

/// Parse a comma-separated subscription string.
///
/// Unknown labels are dropped with a warning, duplicates collapse, and a
/// blank string subscribes to everything.
pub fn parse_subscriptions(raw: &str) -> Vec<EventLabel> {
    if raw.trim().is_empty() {
        return vec![EventLabel::All];
    }
    let mut labels = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<EventLabel>() {
            Ok(label) => {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            },
            Err(e) => warn!(label = part, error = %e, "subscription label discarded"),
        }
    }
    labels
}

pub fn subscriptions_to_string(labels: &[EventLabel]) -> String {
    labels
        .iter()
        .map(EventLabel::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

// ── Tokens ───────────────────────────────────────────────────────────────────

pub const TOKEN_LEN: usize = 32;

/// Check that a user token is exactly 32 ASCII alphanumeric characters.
pub fn validate_token(token: &str) -> Result<(), ValidationError> {
    if token.len() != TOKEN_LEN {
        return Err(ValidationError::TokenLength(token.len()));
    }
    if !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ValidationError::TokenFormat);
    }
    Ok(())
}
