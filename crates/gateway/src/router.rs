//! Classifies inbound events into side effects and webhook notifications.

use std::{path::PathBuf, sync::Arc};

use {
    hookgate_channels::{
        InboundEvent, MessagingClient, Presence,
        events::{
            CRITICAL_BLOCK, ChatPresenceEvent, HistorySyncEvent, MessageEvent, PairSuccessEvent,
            PresenceEvent, ReceiptEvent, ReceiptKind,
        },
    },
    hookgate_common::{EventLabel, UserId},
    serde::Serialize,
    serde_json::{Map, Value},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    manager::SessionManager,
    media,
    session::{Session, SessionExit},
    webhook::{WebhookDispatcher, WebhookJob},
};

/// A webhook-eligible event, before subscription gating.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub label: EventLabel,
    pub event: Value,
    pub state: Option<&'static str>,
    pub file: Option<PathBuf>,
}

impl Notification {
    fn new(label: EventLabel, event: Value) -> Self {
        Self {
            label,
            event,
            state: None,
            file: None,
        }
    }

    fn with_state(mut self, state: &'static str) -> Self {
        self.state = Some(state);
        self
    }

    /// The `jsonData` object: `type`, `event` and, when set, `state`.
    pub fn payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(self.label.as_str()));
        map.insert("event".into(), self.event.clone());
        if let Some(state) = self.state {
            map.insert("state".into(), Value::from(state));
        }
        Value::Object(map)
    }
}

fn to_event_value<T: Serialize>(user_id: UserId, event: &T) -> Value {
    serde_json::to_value(event).unwrap_or_else(|e| {
        warn!(user_id = %user_id, error = %e, "failed to serialize event");
        Value::Null
    })
}

/// Webhook `state` for receipts that are forwarded at all.
pub fn receipt_state(kind: &ReceiptKind) -> Option<&'static str> {
    match kind {
        ReceiptKind::Read => Some("Read"),
        ReceiptKind::ReadSelf => Some("ReadSelf"),
        ReceiptKind::Delivered => Some("Delivered"),
        ReceiptKind::Played
        | ReceiptKind::PlayedSelf
        | ReceiptKind::Sender
        | ReceiptKind::Retry
        | ReceiptKind::Inactive
        | ReceiptKind::Other(_) => None,
    }
}

/// Per-session event handler. Events are handled one at a time in arrival
/// order.
pub struct EventRouter {
    manager: Arc<SessionManager>,
    session: Arc<Session>,
    client: Arc<dyn MessagingClient>,
    dispatcher: WebhookDispatcher,
}

impl EventRouter {
    pub fn new(
        manager: Arc<SessionManager>,
        session: Arc<Session>,
        client: Arc<dyn MessagingClient>,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            manager,
            session,
            client,
            dispatcher,
        }
    }

    fn user_id(&self) -> UserId {
        self.session.user_id
    }

    /// Handle events until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<InboundEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }
        debug!(user_id = %self.user_id(), "event router stopped");
    }

    pub async fn handle(&self, event: InboundEvent) {
        let user_id = self.user_id();
        let notification = match event {
            InboundEvent::AppStateSyncComplete { name } => {
                if name == CRITICAL_BLOCK && self.has_push_name() {
                    self.mark_available().await;
                }
                None
            },
            InboundEvent::Connected | InboundEvent::PushNameSetting { .. } => {
                if self.has_push_name() {
                    self.mark_available().await;
                    if let Err(e) = self.manager.store().set_connected(user_id, true).await {
                        error!(user_id = %user_id, error = %e, "failed to persist connected state");
                    }
                }
                None
            },
            InboundEvent::PairSuccess(evt) => {
                self.on_pair_success(&evt).await;
                None
            },
            InboundEvent::StreamReplaced => {
                info!(user_id = %user_id, "stream replaced");
                None
            },
            InboundEvent::Message(msg) => Some(self.on_message(&msg).await),
            InboundEvent::Receipt(receipt) => self.on_receipt(&receipt),
            InboundEvent::Presence(presence) => Some(self.on_presence(&presence)),
            InboundEvent::HistorySync(history) => self.on_history_sync(&history).await,
            InboundEvent::AppState(evt) => {
                info!(user_id = %user_id, index = ?evt.index, action = %evt.action, "app state event");
                None
            },
            InboundEvent::LoggedOut { reason } => {
                info!(user_id = %user_id, reason = %reason, "logged out");
                self.session.terminate(SessionExit::LoggedOut);
                None
            },
            InboundEvent::ChatPresence(evt) => Some(self.on_chat_presence(&evt)),
            InboundEvent::CallOffer(evt) => {
                info!(user_id = %user_id, from = %evt.from, call_id = %evt.call_id, "call offer");
                None
            },
            InboundEvent::CallAccept(evt) => {
                info!(user_id = %user_id, from = %evt.from, call_id = %evt.call_id, "call accept");
                None
            },
            InboundEvent::CallTerminate(evt) => {
                info!(user_id = %user_id, from = %evt.from, call_id = %evt.call_id, "call terminate");
                None
            },
            InboundEvent::CallOfferNotice(evt) => {
                info!(user_id = %user_id, from = %evt.from, call_id = %evt.call_id, "call offer notice");
                None
            },
            InboundEvent::CallRelayLatency(evt) => {
                info!(user_id = %user_id, from = %evt.from, call_id = %evt.call_id, "call relay latency");
                None
            },
            InboundEvent::Unknown { kind, payload } => {
                warn!(user_id = %user_id, kind = %kind, payload = %payload, "unhandled event");
                None
            },
        };

        if let Some(notification) = notification {
            self.dispatch(notification);
        }
    }

    fn has_push_name(&self) -> bool {
        self.client.push_name().is_some_and(|n| !n.is_empty())
    }

    async fn mark_available(&self) {
        match self.client.send_presence(Presence::Available).await {
            Ok(()) => info!(user_id = %self.user_id(), "marked self as available"),
            Err(e) => warn!(user_id = %self.user_id(), error = %e, "failed to send available presence"),
        }
    }

    async fn on_pair_success(&self, evt: &PairSuccessEvent) {
        let user_id = self.user_id();
        let jid = evt.id.to_string();
        info!(
            user_id = %user_id,
            jid = %jid,
            business_name = %evt.business_name,
            platform = %evt.platform,
            "pair success"
        );
        if let Err(e) = self.manager.store().set_jid(user_id, &jid).await {
            error!(user_id = %user_id, error = %e, "failed to persist jid");
            return;
        }
        if !self.manager.cache().update_jid(&self.session.token, &jid) {
            warn!(user_id = %user_id, "no user info cached on pairing");
        }
    }

    async fn on_message(&self, msg: &MessageEvent) -> Notification {
        let user_id = self.user_id();
        let info = &msg.info;

        let mut parts = vec![
            format!("pushname: {}", info.push_name),
            format!("timestamp: {}", info.timestamp),
        ];
        if let Some(kind) = info.kind.as_deref().filter(|k| !k.is_empty()) {
            parts.push(format!("type: {kind}"));
        }
        if let Some(category) = info.category.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("category: {category}"));
        }
        if msg.is_view_once {
            parts.push("view once".into());
        }
        if msg.is_ephemeral {
            parts.push("ephemeral".into());
        }
        info!(
            user_id = %user_id,
            id = %info.id,
            source = %info.source.describe(),
            parts = %parts.join(", "),
            "message received"
        );

        let files_dir = &self.manager.options().files_dir;
        let mut saved = Vec::new();
        for attachment in &msg.attachments {
            match media::save_attachment(
                self.client.as_ref(),
                files_dir,
                user_id,
                &info.id,
                attachment,
            )
            .await
            {
                Ok(path) => {
                    info!(user_id = %user_id, kind = attachment.kind.as_str(), path = %path.display(), "attachment saved");
                    saved.push(path);
                },
                Err(e) => {
                    error!(user_id = %user_id, kind = attachment.kind.as_str(), error = %e, "failed to save attachment");
                },
            }
        }

        let mut notification = Notification::new(EventLabel::Message, to_event_value(user_id, msg));
        if saved.len() == 1 {
            notification.file = saved.pop();
        }
        notification
    }

    fn on_receipt(&self, receipt: &ReceiptEvent) -> Option<Notification> {
        let user_id = self.user_id();
        let Some(state) = receipt_state(&receipt.kind) else {
            debug!(user_id = %user_id, kind = ?receipt.kind, "ignoring receipt");
            return None;
        };
        info!(
            user_id = %user_id,
            ids = ?receipt.message_ids,
            source = %receipt.source.describe(),
            timestamp = %receipt.timestamp,
            state,
            "receipt"
        );
        Some(
            Notification::new(EventLabel::ReadReceipt, to_event_value(user_id, receipt))
                .with_state(state),
        )
    }

    fn on_presence(&self, presence: &PresenceEvent) -> Notification {
        let user_id = self.user_id();
        let state = if presence.unavailable {
            match presence.last_seen {
                Some(last_seen) => {
                    info!(user_id = %user_id, from = %presence.from, last_seen = %last_seen, "user is now offline");
                },
                None => info!(user_id = %user_id, from = %presence.from, "user is now offline"),
            }
            "offline"
        } else {
            info!(user_id = %user_id, from = %presence.from, "user is now online");
            "online"
        };
        Notification::new(EventLabel::Presence, to_event_value(user_id, presence)).with_state(state)
    }

    async fn on_history_sync(&self, history: &HistorySyncEvent) -> Option<Notification> {
        let user_id = self.user_id();
        let seq = self.manager.next_history_seq();
        match media::write_history(&self.manager.options().files_dir, user_id, seq, &history.data)
            .await
        {
            Ok(path) => {
                info!(user_id = %user_id, path = %path.display(), "wrote history sync");
                Some(Notification::new(
                    EventLabel::HistorySync,
                    to_event_value(user_id, history),
                ))
            },
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to write history sync");
                None
            },
        }
    }

    fn on_chat_presence(&self, evt: &ChatPresenceEvent) -> Notification {
        info!(
            user_id = %self.user_id(),
            state = ?evt.state,
            media = ?evt.media,
            chat = %evt.source.chat,
            sender = %evt.source.sender,
            "chat presence"
        );
        Notification::new(EventLabel::ChatPresence, to_event_value(self.user_id(), evt))
    }

    /// Gate on cache entry, subscription and webhook URL, then enqueue.
    fn dispatch(&self, notification: Notification) {
        let user_id = self.user_id();
        let label = notification.label;
        let Some(info) = self.manager.cache().get(&self.session.token) else {
            warn!(user_id = %user_id, label = %label, "no cached user for token, skipping webhook");
            return;
        };
        if !label.admitted_by(&info.events) {
            warn!(user_id = %user_id, label = %label, "not subscribed, skipping webhook");
            return;
        }
        if info.webhook.is_empty() {
            warn!(user_id = %user_id, label = %label, "no webhook configured, skipping");
            return;
        }

        debug!(user_id = %user_id, label = %label, url = %info.webhook, "queueing webhook");
        let job = WebhookJob::new(
            user_id,
            info.webhook,
            notification.payload().to_string(),
            info.token,
            notification.file,
        );
        self.dispatcher.enqueue(job);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::manager::{ConnectRequest, SessionOptions},
        chrono::{DateTime, Utc},
        hookgate_channels::{
            DeviceProps, Jid, MessagingBackend, PlatformType,
            events::{Attachment, MediaKind, MediaRef, MessageInfo, MessageSource},
            loopback::{LoopbackBackend, LoopbackClient},
        },
        hookgate_sessions::{NewUser, SqliteUserStore, UserStore},
        serde_json::json,
        sqlx::sqlite::SqlitePoolOptions,
        tempfile::TempDir,
    };

    const TOKEN: &str = "AbCdEfGhIjKlMnOpQrStUvWxYz012345";

    struct Harness {
        router: EventRouter,
        jobs: mpsc::Receiver<WebhookJob>,
        store: Arc<SqliteUserStore>,
        client: Arc<LoopbackClient>,
        session: Arc<Session>,
        user_id: UserId,
        dir: TempDir,
    }

    async fn harness(events: &str, webhook: &str) -> Harness {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteUserStore::init(&pool).await.unwrap();
        let store = Arc::new(SqliteUserStore::new(pool));
        let user_id = store
            .create_user(&NewUser {
                name: "ana".into(),
                token: TOKEN.into(),
                webhook: webhook.into(),
                events: events.into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LoopbackBackend::new());
        let options = SessionOptions {
            files_dir: dir.path().to_path_buf(),
            json_logs: true,
            ..Default::default()
        };
        let manager = SessionManager::new(store.clone(), backend.clone(), options);
        let user = store.get_user(user_id).await.unwrap();
        manager
            .cache()
            .insert(ConnectRequest::from_user(&user).cache_entry());

        let jid = Jid::new("5511", "s.whatsapp.net");
        backend.register_device(&jid, Some("Ana"));
        let props = DeviceProps {
            os_name: "Mac OS 10".into(),
            platform: PlatformType::Chrome,
            verbose: false,
        };
        let client = backend.load_identity(&jid, &props).await.unwrap().unwrap();
        let loopback = backend.clients().remove(0);

        let session = Arc::new(Session::new(user_id, 1, TOKEN.into()));
        let (dispatcher, jobs) = WebhookDispatcher::channel(user_id, 16);
        Harness {
            router: EventRouter::new(manager, Arc::clone(&session), client, dispatcher),
            jobs,
            store,
            client: loopback,
            session,
            user_id,
            dir,
        }
    }

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn source() -> MessageSource {
        MessageSource {
            chat: Jid::new("5599", "s.whatsapp.net"),
            sender: Jid::new("5599", "s.whatsapp.net"),
            is_from_me: false,
            is_group: false,
        }
    }

    fn receipt(kind: ReceiptKind) -> InboundEvent {
        InboundEvent::Receipt(ReceiptEvent {
            message_ids: vec!["M1".into()],
            source: source(),
            timestamp: ts(),
            kind,
        })
    }

    fn presence(unavailable: bool) -> InboundEvent {
        InboundEvent::Presence(PresenceEvent {
            from: Jid::new("5599", "s.whatsapp.net"),
            unavailable,
            last_seen: None,
        })
    }

    fn message(id: &str, attachments: Vec<Attachment>) -> InboundEvent {
        InboundEvent::Message(MessageEvent {
            info: MessageInfo {
                id: id.into(),
                source: source(),
                push_name: "Bob".into(),
                timestamp: ts(),
                kind: Some("media".into()),
                category: None,
            },
            text: None,
            attachments,
            is_view_once: false,
            is_ephemeral: false,
        })
    }

    fn image(path: &str) -> Attachment {
        Attachment {
            kind: MediaKind::Image,
            media: MediaRef {
                direct_path: path.into(),
                mime_type: "image/jpeg".into(),
                file_length: 4,
                file_name: None,
            },
        }
    }

    fn payload(job: &WebhookJob) -> Value {
        assert_eq!(job.fields[0].0, "jsonData");
        assert_eq!(job.fields[1], ("token".to_string(), TOKEN.to_string()));
        serde_json::from_str(&job.fields[0].1).unwrap()
    }

    #[tokio::test]
    async fn delivered_receipt_fires_with_state() {
        let mut h = harness("All", "http://hooks.local/in").await;
        h.router.handle(receipt(ReceiptKind::Delivered)).await;

        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.url, "http://hooks.local/in");
        let body = payload(&job);
        assert_eq!(body["type"], "ReadReceipt");
        assert_eq!(body["state"], "Delivered");
        assert_eq!(body["event"]["messageIds"][0], "M1");
    }

    #[tokio::test]
    async fn read_receipts_keep_their_kind() {
        let mut h = harness("ReadReceipt", "http://hooks.local/in").await;
        h.router.handle(receipt(ReceiptKind::ReadSelf)).await;
        assert_eq!(payload(&h.jobs.try_recv().unwrap())["state"], "ReadSelf");
    }

    #[tokio::test]
    async fn played_receipt_is_dropped_entirely() {
        let mut h = harness("All", "http://hooks.local/in").await;
        h.router.handle(receipt(ReceiptKind::Played)).await;
        h.router.handle(receipt(ReceiptKind::Other("server-error".into()))).await;
        assert!(h.jobs.try_recv().is_err());
        assert!(!h.dir.path().join(format!("user_{}", h.user_id)).exists());
    }

    #[tokio::test]
    async fn message_subscription_only_gets_messages() {
        let mut h = harness("Message", "http://hooks.local/in").await;
        h.router.handle(presence(false)).await;
        h.router.handle(receipt(ReceiptKind::Read)).await;
        assert!(h.jobs.try_recv().is_err());

        h.router.handle(message("M2", vec![])).await;
        let job = h.jobs.try_recv().unwrap();
        assert_eq!(payload(&job)["type"], "Message");
        assert!(job.file.is_none());
    }

    #[tokio::test]
    async fn all_subscription_gets_every_eligible_event() {
        let mut h = harness("All", "http://hooks.local/in").await;
        h.router.handle(presence(true)).await;
        h.router.handle(message("M3", vec![])).await;
        h.router
            .handle(InboundEvent::HistorySync(HistorySyncEvent {
                data: json!({"conversations": []}),
            }))
            .await;
        h.router.handle(InboundEvent::StreamReplaced).await;

        let presence_job = h.jobs.try_recv().unwrap();
        assert_eq!(payload(&presence_job)["state"], "offline");
        assert_eq!(payload(&h.jobs.try_recv().unwrap())["type"], "Message");
        assert_eq!(payload(&h.jobs.try_recv().unwrap())["type"], "HistorySync");
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_webhook_skips_delivery() {
        let mut h = harness("All", "").await;
        h.router.handle(presence(false)).await;
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_attachment_travels_with_the_webhook() {
        let mut h = harness("All", "http://hooks.local/in").await;
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xD9];
        h.client.put_media("/m/1", jpeg.clone());

        h.router.handle(message("IMG1", vec![image("/m/1")])).await;

        let expected = h
            .dir
            .path()
            .join(format!("user_{}", h.user_id))
            .join("IMG1.jpg");
        assert_eq!(std::fs::read(&expected).unwrap(), jpeg);
        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.file.as_deref(), Some(expected.as_path()));
    }

    #[tokio::test]
    async fn failed_download_still_notifies_without_file() {
        let mut h = harness("All", "http://hooks.local/in").await;
        h.router.handle(message("IMG2", vec![image("/m/missing")])).await;
        let job = h.jobs.try_recv().unwrap();
        assert!(job.file.is_none());
    }

    #[tokio::test]
    async fn connected_with_push_name_marks_available() {
        let h = harness("All", "http://hooks.local/in").await;
        h.client.connect().await.unwrap();
        h.router.handle(InboundEvent::Connected).await;

        assert_eq!(h.client.presences(), vec![Presence::Available]);
        assert!(h.store.get_user(h.user_id).await.unwrap().connected);
    }

    #[tokio::test]
    async fn pair_success_persists_jid_and_refreshes_cache() {
        let h = harness("All", "http://hooks.local/in").await;
        h.router
            .handle(InboundEvent::PairSuccess(PairSuccessEvent {
                id: Jid::new("5577", "s.whatsapp.net"),
                business_name: String::new(),
                platform: "android".into(),
            }))
            .await;

        assert_eq!(
            h.store.get_user(h.user_id).await.unwrap().jid,
            "5577@s.whatsapp.net"
        );
        assert_eq!(
            h.router.manager.cache().get(TOKEN).unwrap().jid,
            "5577@s.whatsapp.net"
        );
    }

    #[tokio::test]
    async fn logout_signals_own_session() {
        let h = harness("All", "http://hooks.local/in").await;
        h.router
            .handle(InboundEvent::LoggedOut {
                reason: "device removed".into(),
            })
            .await;
        assert!(h.session.is_cancelled());
        assert_eq!(h.session.exit_reason(), SessionExit::LoggedOut);
    }

    #[test]
    fn only_read_and_delivery_receipts_carry_state() {
        assert_eq!(receipt_state(&ReceiptKind::Read), Some("Read"));
        assert_eq!(receipt_state(&ReceiptKind::ReadSelf), Some("ReadSelf"));
        assert_eq!(receipt_state(&ReceiptKind::Delivered), Some("Delivered"));
        for kind in [
            ReceiptKind::Played,
            ReceiptKind::PlayedSelf,
            ReceiptKind::Sender,
            ReceiptKind::Retry,
            ReceiptKind::Inactive,
            ReceiptKind::Other("server-error".into()),
        ] {
            assert_eq!(receipt_state(&kind), None, "{kind:?}");
        }
    }

    #[test]
    fn payload_omits_absent_state() {
        let n = Notification::new(EventLabel::Message, json!({"id": "x"}));
        assert_eq!(n.payload(), json!({"type": "Message", "event": {"id": "x"}}));
        let n = n.with_state("online");
        assert_eq!(n.payload()["state"], "online");
    }
}
