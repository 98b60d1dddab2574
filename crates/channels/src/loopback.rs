//! In-process backend whose clients are driven by the caller.
//!
//! Nothing leaves the process: pairing events, inbound events and media
//! payloads are injected through [`LoopbackClient`]. The gateway binary wires
//! this backend when no network backend is linked in, and the test suites use
//! it to script sessions.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    dashmap::DashMap,
    tokio::sync::{Notify, mpsc, watch},
    tracing::{debug, info},
};

use crate::{
    error::ChannelError,
    events::{InboundEvent, MediaRef, PairingEvent},
    jid::Jid,
    plugin::{DeviceProps, EventHandler, MessagingBackend, MessagingClient, Presence},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct LoopbackClient {
    props: DeviceProps,
    jid: Mutex<Option<Jid>>,
    push_name: Mutex<Option<String>>,
    connected: watch::Sender<bool>,
    handlers: Mutex<Vec<(u32, EventHandler)>>,
    next_handler_id: AtomicU32,
    pairing: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    media: DashMap<String, Bytes>,
    presences: Mutex<Vec<Presence>>,
    connect_error: Mutex<Option<ChannelError>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl LoopbackClient {
    fn new(props: DeviceProps, jid: Option<Jid>, push_name: Option<String>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            props,
            jid: Mutex::new(jid),
            push_name: Mutex::new(push_name),
            connected,
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU32::new(1),
            pairing: Mutex::new(None),
            media: DashMap::new(),
            presences: Mutex::new(Vec::new()),
            connect_error: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn props(&self) -> &DeviceProps {
        &self.props
    }

    pub fn jid(&self) -> Option<Jid> {
        lock(&self.jid).clone()
    }

    pub fn set_push_name(&self, name: &str) {
        *lock(&self.push_name) = Some(name.to_string());
    }

    /// Make the next `connect` calls fail with `err`.
    pub fn fail_connect(&self, err: ChannelError) {
        *lock(&self.connect_error) = Some(err);
    }

    /// Stage a payload returned by `download` for this direct path.
    pub fn put_media(&self, direct_path: &str, data: impl Into<Bytes>) {
        self.media.insert(direct_path.to_string(), data.into());
    }

    /// Deliver an event to every registered handler. Returns how many ran.
    pub fn emit(&self, event: InboundEvent) -> usize {
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in &handlers {
            handler(event.clone());
        }
        handlers.len()
    }

    /// Push an item onto the open pairing stream. A terminal item closes the
    /// stream; `Paired` also stores the identity. Returns false if no stream
    /// is open or the receiver is gone.
    pub async fn issue_pairing(&self, event: PairingEvent) -> bool {
        let terminal = !matches!(event, PairingEvent::CodeIssued(_));
        let sender = if terminal {
            lock(&self.pairing).take()
        } else {
            lock(&self.pairing).clone()
        };
        let Some(sender) = sender else {
            return false;
        };
        if let PairingEvent::Paired { jid, .. } = &event {
            *lock(&self.jid) = Some(jid.clone());
        }
        sender.send(event).await.is_ok()
    }

    pub fn is_pairing_open(&self) -> bool {
        lock(&self.pairing).is_some()
    }

    /// Resolve once the client reports connected.
    pub async fn wait_connected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    /// Resolve once the client reports disconnected after having connected.
    pub async fn wait_disconnected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|c| !*c).await;
    }

    pub fn presences(&self) -> Vec<Presence> {
        lock(&self.presences).clone()
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for LoopbackClient {
    fn is_logged_in(&self) -> bool {
        lock(&self.jid).is_some()
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn push_name(&self) -> Option<String> {
        lock(&self.push_name).clone()
    }

    fn add_event_handler(&self, handler: EventHandler) -> u32 {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((id, handler));
        id
    }

    fn remove_event_handler(&self, id: u32) -> bool {
        let mut handlers = lock(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    async fn pairing_codes(&self) -> Result<mpsc::Receiver<PairingEvent>, ChannelError> {
        if let Some(jid) = self.jid() {
            return Err(ChannelError::AlreadyPaired(jid));
        }
        let (tx, rx) = mpsc::channel(8);
        *lock(&self.pairing) = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        if let Some(err) = lock(&self.connect_error).clone() {
            return Err(err);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.send_replace(true);
        debug!(jid = ?self.jid(), "loopback client connected");
        if self.is_logged_in() {
            self.emit(InboundEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        lock(&self.pairing).take();
        self.connected.send_replace(false);
        debug!(jid = ?self.jid(), "loopback client disconnected");
    }

    async fn send_presence(&self, presence: Presence) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        lock(&self.presences).push(presence);
        Ok(())
    }

    async fn download(&self, media: &MediaRef) -> Result<Bytes, ChannelError> {
        self.media
            .get(&media.direct_path)
            .map(|b| b.value().clone())
            .ok_or_else(|| ChannelError::Download(format!("no media at {}", media.direct_path)))
    }
}

// ── Backend ─────────────────────────────────────────────────────────────────

/// Device store plus a log of every client handed out.
#[derive(Default)]
pub struct LoopbackBackend {
    /// jid → push name of devices that are already paired.
    devices: DashMap<String, Option<String>>,
    lookup_failures: DashMap<String, String>,
    connect_failures: DashMap<String, ChannelError>,
    clients: Mutex<Vec<Arc<LoopbackClient>>>,
    created: Notify,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a paired device so `load_identity` finds it.
    pub fn register_device(&self, jid: &Jid, push_name: Option<&str>) {
        self.devices
            .insert(jid.to_string(), push_name.map(str::to_string));
    }

    /// Make `load_identity` for this jid fail.
    pub fn fail_lookup(&self, jid: &Jid, message: &str) {
        self.lookup_failures
            .insert(jid.to_string(), message.to_string());
    }

    /// Make clients loaded for this jid fail to connect.
    pub fn fail_connect(&self, jid: &Jid, err: ChannelError) {
        self.connect_failures.insert(jid.to_string(), err);
    }

    /// Every client created so far, oldest first.
    pub fn clients(&self) -> Vec<Arc<LoopbackClient>> {
        lock(&self.clients).clone()
    }

    /// Wait until at least `n` clients exist.
    pub async fn wait_for_clients(&self, n: usize) -> Vec<Arc<LoopbackClient>> {
        loop {
            let notified = self.created.notified();
            let clients = self.clients();
            if clients.len() >= n {
                return clients;
            }
            notified.await;
        }
    }

    fn track(&self, client: LoopbackClient) -> Arc<LoopbackClient> {
        let client = Arc::new(client);
        lock(&self.clients).push(Arc::clone(&client));
        self.created.notify_waiters();
        client
    }
}

#[async_trait]
impl MessagingBackend for LoopbackBackend {
    fn id(&self) -> &str {
        "loopback"
    }

    async fn new_identity(
        &self,
        props: &DeviceProps,
    ) -> Result<Arc<dyn MessagingClient>, ChannelError> {
        info!(platform = %props.platform, os = %props.os_name, "loopback: new device");
        let client: Arc<dyn MessagingClient> =
            self.track(LoopbackClient::new(props.clone(), None, None));
        Ok(client)
    }

    async fn load_identity(
        &self,
        jid: &Jid,
        props: &DeviceProps,
    ) -> Result<Option<Arc<dyn MessagingClient>>, ChannelError> {
        let key = jid.to_string();
        if let Some(msg) = self.lookup_failures.get(&key) {
            return Err(ChannelError::IdentityStore(msg.value().clone()));
        }
        let Some(push_name) = self.devices.get(&key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let client = LoopbackClient::new(props.clone(), Some(jid.clone()), push_name);
        if let Some(err) = self.connect_failures.get(&key) {
            client.fail_connect(err.value().clone());
        }
        let client: Arc<dyn MessagingClient> = self.track(client);
        Ok(Some(client))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::platform::PlatformType};

    fn props() -> DeviceProps {
        DeviceProps {
            os_name: "Mac OS 10".into(),
            platform: PlatformType::Chrome,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn unknown_device_loads_as_none() {
        let backend = LoopbackBackend::new();
        let jid = Jid::new("1", "s.whatsapp.net");
        assert!(backend.load_identity(&jid, &props()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_failure_is_reported() {
        let backend = LoopbackBackend::new();
        let jid = Jid::new("1", "s.whatsapp.net");
        backend.fail_lookup(&jid, "disk on fire");
        let err = backend.load_identity(&jid, &props()).await.err().unwrap();
        assert_eq!(err, ChannelError::IdentityStore("disk on fire".into()));
    }

    #[tokio::test]
    async fn paired_device_refuses_pairing_stream() {
        let backend = LoopbackBackend::new();
        let jid = Jid::new("1", "s.whatsapp.net");
        backend.register_device(&jid, Some("Ana"));
        let client = backend.load_identity(&jid, &props()).await.unwrap().unwrap();
        assert!(client.is_logged_in());
        assert_eq!(client.push_name().as_deref(), Some("Ana"));
        assert!(matches!(
            client.pairing_codes().await,
            Err(ChannelError::AlreadyPaired(_))
        ));
    }

    #[tokio::test]
    async fn pairing_stream_closes_after_terminal_event() {
        let backend = LoopbackBackend::new();
        backend.new_identity(&props()).await.unwrap();
        let client = backend.wait_for_clients(1).await.remove(0);

        let mut codes = client.pairing_codes().await.unwrap();
        assert!(client.issue_pairing(PairingEvent::CodeIssued("c1".into())).await);
        let jid = Jid::new("99", "s.whatsapp.net");
        assert!(
            client
                .issue_pairing(PairingEvent::Paired {
                    jid: jid.clone(),
                    business_name: String::new(),
                    platform: "android".into(),
                })
                .await
        );

        assert_eq!(codes.recv().await, Some(PairingEvent::CodeIssued("c1".into())));
        assert!(matches!(codes.recv().await, Some(PairingEvent::Paired { .. })));
        assert_eq!(codes.recv().await, None);
        assert_eq!(client.jid(), Some(jid));
        assert!(!client.issue_pairing(PairingEvent::TimedOut).await);
    }

    #[tokio::test]
    async fn handlers_receive_events_until_removed() {
        let client = LoopbackClient::new(props(), None, None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = client.add_event_handler(Arc::new(move |evt| {
            let _ = tx.send(evt);
        }));

        assert_eq!(client.emit(InboundEvent::StreamReplaced), 1);
        assert!(matches!(rx.recv().await, Some(InboundEvent::StreamReplaced)));

        assert!(client.remove_event_handler(id));
        assert_eq!(client.emit(InboundEvent::StreamReplaced), 0);
    }

    #[tokio::test]
    async fn presence_requires_connection() {
        let client = LoopbackClient::new(props(), None, None);
        assert_eq!(
            client.send_presence(Presence::Available).await,
            Err(ChannelError::NotConnected)
        );
        client.connect().await.unwrap();
        client.send_presence(Presence::Available).await.unwrap();
        assert_eq!(client.presences(), vec![Presence::Available]);
    }
}
