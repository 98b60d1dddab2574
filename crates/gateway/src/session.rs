use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    hookgate_channels::MessagingClient,
    hookgate_common::UserId,
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
};

use crate::error::StartupError;

/// Where a session is in its life. `Closed` is published after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Starting,
    Pairing,
    Connected,
    Closed,
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    Killed,
    LoggedOut,
    PairingTimedOut,
    /// Process shutdown. The connected flag is kept so the session is
    /// relaunched on the next start.
    Shutdown,
    Failed(StartupError),
}

impl SessionExit {
    /// Whether teardown persists `connected = false`.
    pub fn clears_connected(&self) -> bool {
        matches!(self, Self::Killed | Self::LoggedOut | Self::PairingTimedOut)
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => f.write_str("killed"),
            Self::LoggedOut => f.write_str("logged out"),
            Self::PairingTimedOut => f.write_str("pairing timed out"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Registry entry for one user's session.
///
/// Handles acquired while the session starts are parked here so teardown can
/// release them even if startup was interrupted.
pub struct Session {
    pub user_id: UserId,
    /// Distinguishes successive sessions of the same user.
    pub generation: u64,
    pub token: String,
    cancel: CancellationToken,
    exit: OnceLock<SessionExit>,
    phase: watch::Sender<SessionPhase>,
    client: OnceLock<Arc<dyn MessagingClient>>,
    handler_id: OnceLock<u32>,
    /// A pairing code is persisted on the user row and not yet cleared.
    pairing_code: AtomicBool,
}

impl Session {
    pub(crate) fn new(user_id: UserId, generation: u64, token: String) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Starting);
        Self {
            user_id,
            generation,
            token,
            cancel: CancellationToken::new(),
            exit: OnceLock::new(),
            phase,
            client: OnceLock::new(),
            handler_id: OnceLock::new(),
            pairing_code: AtomicBool::new(false),
        }
    }

    /// Record `reason` (the first one wins) and raise the cancellation
    /// signal. Idempotent and safe from any task.
    pub fn terminate(&self, reason: SessionExit) {
        let _ = self.exit.set(reason);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The recorded exit reason. A signal raised without one counts as a kill.
    pub fn exit_reason(&self) -> SessionExit {
        self.exit.get().cloned().unwrap_or(SessionExit::Killed)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    pub fn client(&self) -> Option<&Arc<dyn MessagingClient>> {
        self.client.get()
    }

    pub(crate) fn attach_client(&self, client: Arc<dyn MessagingClient>) {
        let _ = self.client.set(client);
    }

    pub(crate) fn handler_id(&self) -> Option<u32> {
        self.handler_id.get().copied()
    }

    pub(crate) fn attach_handler(&self, id: u32) {
        let _ = self.handler_id.set(id);
    }

    pub(crate) fn set_pairing_code_stored(&self, stored: bool) {
        self.pairing_code.store(stored, Ordering::SeqCst);
    }

    /// Whether a stored pairing code still needs clearing. Resets the flag.
    pub(crate) fn take_pairing_code_stored(&self) -> bool {
        self.pairing_code.swap(false, Ordering::SeqCst)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("generation", &self.generation)
            .field("phase", &self.phase())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
