use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    hookgate_channels::MessagingBackend,
    hookgate_common::{EventLabel, UserId, parse_subscriptions},
    hookgate_config::{GatewayConfig, ProtocolLogLevel, WebhookConfig},
    hookgate_sessions::{User, UserStore},
    tokio::sync::watch,
    tokio_util::task::TaskTracker,
    tracing::{debug, info, warn},
};

use crate::{
    cache::{CachedUserInfo, UserInfoCache},
    lifecycle,
    session::{Session, SessionExit, SessionPhase},
};

/// Settings shared by every session the manager starts.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Root for `user_<id>/` media and history directories.
    pub files_dir: PathBuf,
    pub webhook: WebhookConfig,
    pub protocol: ProtocolLogLevel,
    /// Structured log output; suppresses console QR rendering.
    pub json_logs: bool,
}

impl SessionOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            files_dir: config.storage.files_dir.clone(),
            webhook: config.webhook.clone(),
            protocol: config.protocol.debug,
            json_logs: config.logging.json,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Everything needed to start (or refresh) one user's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub user_id: UserId,
    /// Stored identity; empty means the device has never been paired.
    pub jid: String,
    pub token: String,
    pub webhook: String,
    pub subscriptions: Vec<EventLabel>,
    pub os_name: String,
    pub platform: String,
}

impl ConnectRequest {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            jid: user.jid.clone(),
            token: user.token.clone(),
            webhook: user.webhook.clone(),
            subscriptions: parse_subscriptions(&user.events),
            os_name: user.os_name.clone(),
            platform: user.platform_type.clone(),
        }
    }

    pub(crate) fn cache_entry(&self) -> CachedUserInfo {
        CachedUserInfo {
            id: self.user_id,
            jid: self.jid.clone(),
            webhook: self.webhook.clone(),
            token: self.token.clone(),
            events: self.subscriptions.clone(),
            os_name: self.os_name.clone(),
            platform_type: self.platform.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDisposition {
    Started,
    /// A live session already exists; only the cache was refreshed.
    AlreadyActive,
    /// The manager is shutting down and refuses new sessions.
    ShuttingDown,
}

/// Owns the session registry, the user info cache and every session task.
pub struct SessionManager {
    sessions: DashMap<UserId, Arc<Session>>,
    exits: DashMap<UserId, SessionExit>,
    cache: Arc<UserInfoCache>,
    store: Arc<dyn UserStore>,
    backend: Arc<dyn MessagingBackend>,
    options: SessionOptions,
    history_seq: AtomicU64,
    next_generation: AtomicU64,
    closing: AtomicBool,
    tasks: TaskTracker,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn UserStore>,
        backend: Arc<dyn MessagingBackend>,
        options: SessionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            exits: DashMap::new(),
            cache: Arc::new(UserInfoCache::new()),
            store,
            backend,
            options,
            history_seq: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            tasks: TaskTracker::new(),
        })
    }

    pub fn cache(&self) -> &Arc<UserInfoCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn MessagingBackend> {
        &self.backend
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Next history dump number. Unique across all sessions of the process.
    pub fn next_history_seq(&self) -> u64 {
        self.history_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Start a session for the user unless a live one exists.
    ///
    /// The cache entry for the token is refreshed either way. A registry
    /// entry whose signal already fired (still tearing down) is replaced.
    pub fn request_connect(self: &Arc<Self>, req: ConnectRequest) -> ConnectDisposition {
        if self.closing.load(Ordering::SeqCst) {
            warn!(user_id = %req.user_id, "refusing connect during shutdown");
            return ConnectDisposition::ShuttingDown;
        }

        self.cache.insert(req.cache_entry());

        let session = match self.sessions.entry(req.user_id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_cancelled() {
                    debug!(user_id = %req.user_id, "session already active");
                    return ConnectDisposition::AlreadyActive;
                }
                let session = self.new_session(&req);
                entry.insert(Arc::clone(&session));
                session
            },
            Entry::Vacant(entry) => {
                let session = self.new_session(&req);
                entry.insert(Arc::clone(&session));
                session
            },
        };
        self.exits.remove(&req.user_id);

        // `shutdown` may have taken its snapshot before the insert above.
        // The task still runs so teardown unregisters the session.
        let disposition = if self.closing.load(Ordering::SeqCst) {
            warn!(user_id = %req.user_id, "shutdown began while starting session");
            session.terminate(SessionExit::Shutdown);
            ConnectDisposition::ShuttingDown
        } else {
            info!(
                user_id = %req.user_id,
                generation = session.generation,
                paired = !req.jid.is_empty(),
                "starting session"
            );
            ConnectDisposition::Started
        };
        let manager = Arc::clone(self);
        self.tasks
            .spawn(async move { lifecycle::run_session(manager, session, req).await });
        disposition
    }

    fn new_session(&self, req: &ConnectRequest) -> Arc<Session> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Arc::new(Session::new(req.user_id, generation, req.token.clone()))
    }

    /// Raise the user's kill signal. Returns false if no session is
    /// registered. Never waits for teardown.
    pub fn kill(&self, user_id: UserId) -> bool {
        let Some(session) = self.session(user_id) else {
            return false;
        };
        info!(user_id = %user_id, "killing session");
        session.terminate(SessionExit::Killed);
        true
    }

    /// Signal every session with [`SessionExit::Shutdown`], refuse new ones,
    /// and wait up to `timeout` for all session tasks to finish. Returns
    /// whether they all did.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.closing.store(true, Ordering::SeqCst);
        let live: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        info!(
            sessions = live.len(),
            cached_users = self.cache.len(),
            "shutting down sessions"
        );
        for session in live {
            session.terminate(SessionExit::Shutdown);
        }
        self.tasks.close();
        let finished = tokio::time::timeout(timeout, self.tasks.wait())
            .await
            .is_ok();
        if !finished {
            warn!(
                remaining = self.tasks.len(),
                "sessions did not finish before the shutdown timeout"
            );
        }
        finished
    }

    /// Drop the registry entry if it still belongs to `session`, and record
    /// the exit.
    pub(crate) fn finish(&self, session: &Session, reason: SessionExit) {
        let removed = self
            .sessions
            .remove_if(&session.user_id, |_, s| s.generation == session.generation)
            .is_some();
        if removed {
            self.exits.insert(session.user_id, reason);
        } else {
            debug!(
                user_id = %session.user_id,
                generation = session.generation,
                "registry entry already replaced"
            );
        }
    }

    /// Whether the registry entry for the user is still `session`.
    pub(crate) fn is_current(&self, session: &Session) -> bool {
        self.sessions
            .get(&session.user_id)
            .is_some_and(|s| s.generation == session.generation)
    }

    fn session(&self, user_id: UserId) -> Option<Arc<Session>> {
        self.sessions.get(&user_id).map(|e| Arc::clone(e.value()))
    }

    // ── Status ──────────────────────────────────────────────────────────────

    /// A live session exists: registered and not yet signalled.
    pub fn is_active(&self, user_id: UserId) -> bool {
        self.session(user_id).is_some_and(|s| !s.is_cancelled())
    }

    pub fn phase(&self, user_id: UserId) -> Option<SessionPhase> {
        self.session(user_id).map(|s| s.phase())
    }

    pub fn subscribe_phase(&self, user_id: UserId) -> Option<watch::Receiver<SessionPhase>> {
        self.session(user_id).map(|s| s.subscribe_phase())
    }

    /// Exit of the user's most recent finished session, cleared when a new
    /// one starts.
    pub fn last_exit(&self, user_id: UserId) -> Option<SessionExit> {
        self.exits.get(&user_id).map(|e| e.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| !e.value().is_cancelled())
            .count()
    }
}
