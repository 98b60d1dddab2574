//! First-time device linking.
//!
//! [`PairingState::apply`] is the pure transition function; [`drive`] feeds
//! it the backend's pairing stream and performs the side effects of each
//! accepted transition.

use std::fmt;

use {
    hookgate_channels::{Jid, PairingEvent},
    hookgate_common::UserId,
    thiserror::Error,
    tokio::sync::mpsc,
    tracing::{info, warn},
};

use crate::{manager::SessionManager, qr, session::Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    NoIdentity,
    /// Subscribed to the pairing stream, no code yet.
    AwaitingCode,
    /// `count` codes shown so far.
    CodeIssued { count: u32 },
    TimedOut,
    Paired { jid: Jid },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pairing event {event} is not valid in state {state}")]
pub struct InvalidTransition {
    pub state: &'static str,
    pub event: &'static str,
}

fn event_name(event: &PairingEvent) -> &'static str {
    match event {
        PairingEvent::CodeIssued(_) => "code",
        PairingEvent::TimedOut => "timeout",
        PairingEvent::Paired { .. } => "success",
    }
}

impl PairingState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoIdentity => "no-identity",
            Self::AwaitingCode => "awaiting-code",
            Self::CodeIssued { .. } => "code-issued",
            Self::TimedOut => "timed-out",
            Self::Paired { .. } => "paired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Paired { .. })
    }

    /// `NoIdentity -> AwaitingCode`, taken when the pairing stream opens.
    pub fn subscribe(&self) -> Result<Self, InvalidTransition> {
        match self {
            Self::NoIdentity => Ok(Self::AwaitingCode),
            other => Err(InvalidTransition {
                state: other.name(),
                event: "subscribe",
            }),
        }
    }

    pub fn apply(&self, event: &PairingEvent) -> Result<Self, InvalidTransition> {
        let count = match self {
            Self::AwaitingCode => 0,
            Self::CodeIssued { count } => *count,
            other => {
                return Err(InvalidTransition {
                    state: other.name(),
                    event: event_name(event),
                });
            },
        };
        Ok(match event {
            PairingEvent::CodeIssued(_) => Self::CodeIssued {
                count: count.saturating_add(1),
            },
            PairingEvent::TimedOut => Self::TimedOut,
            PairingEvent::Paired { jid, .. } => Self::Paired { jid: jid.clone() },
        })
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a pairing wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired(Jid),
    TimedOut,
    /// The stream closed before a terminal event.
    Abandoned,
}

/// Consume an already opened pairing stream until a terminal event,
/// starting from `state` (normally [`PairingState::AwaitingCode`]).
///
/// Persistence failures are logged and the transition still happens. A
/// stream that closes early clears the stored code like a timeout.
pub async fn drive(
    manager: &SessionManager,
    session: &Session,
    mut state: PairingState,
    mut events: mpsc::Receiver<PairingEvent>,
) -> PairingOutcome {
    let user_id = session.user_id;

    while let Some(event) = events.recv().await {
        let next = match state.apply(&event) {
            Ok(next) => next,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "ignoring pairing event");
                continue;
            },
        };

        match &event {
            PairingEvent::CodeIssued(code) => {
                // Flag first: a kill drops this future, possibly mid-write.
                session.set_pairing_code_stored(true);
                on_code_issued(manager, user_id, code).await;
                if let PairingState::CodeIssued { count } = next {
                    info!(user_id = %user_id, count, "pairing code issued");
                }
            },
            PairingEvent::TimedOut => {
                clear_session_code(manager, session).await;
                info!(user_id = %user_id, "pairing timed out");
            },
            PairingEvent::Paired {
                jid,
                business_name,
                platform,
            } => {
                clear_session_code(manager, session).await;
                on_paired(manager, session, jid, business_name, platform).await;
            },
        }

        state = next;
        match &state {
            PairingState::Paired { jid } => return PairingOutcome::Paired(jid.clone()),
            PairingState::TimedOut => return PairingOutcome::TimedOut,
            _ => {},
        }
    }

    warn!(user_id = %user_id, state = %state, "pairing stream closed before completion");
    clear_session_code(manager, session).await;
    PairingOutcome::Abandoned
}

async fn on_code_issued(manager: &SessionManager, user_id: UserId, code: &str) {
    match qr::png_data_url(code) {
        Ok(url) => {
            if let Err(e) = manager.store().set_qrcode(user_id, &url).await {
                warn!(user_id = %user_id, error = %e, "failed to store pairing code");
            }
        },
        Err(e) => warn!(user_id = %user_id, error = %e, "failed to render pairing code"),
    }

    if !manager.options().json_logs {
        match qr::render_console(code) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(user_id = %user_id, error = %e, "failed to render pairing code"),
        }
    }
}

/// Blank the user's `qrcode`. Returns false if the store rejected it.
pub(crate) async fn clear_qrcode(manager: &SessionManager, user_id: UserId) -> bool {
    match manager.store().set_qrcode(user_id, "").await {
        Ok(()) => true,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "failed to clear pairing code");
            false
        },
    }
}

async fn clear_session_code(manager: &SessionManager, session: &Session) {
    // Left set on failure so teardown retries.
    if clear_qrcode(manager, session.user_id).await {
        session.set_pairing_code_stored(false);
    }
}

async fn on_paired(
    manager: &SessionManager,
    session: &Session,
    jid: &Jid,
    business_name: &str,
    platform: &str,
) {
    let user_id = session.user_id;
    let jid = jid.to_string();
    if let Err(e) = manager.store().set_jid(user_id, &jid).await {
        warn!(user_id = %user_id, error = %e, "failed to store paired jid");
    }
    if !manager.cache().update_jid(&session.token, &jid) {
        warn!(user_id = %user_id, "no cached user info for paired session");
    }
    info!(
        user_id = %user_id,
        jid = %jid,
        business_name,
        platform,
        "device paired"
    );
}
