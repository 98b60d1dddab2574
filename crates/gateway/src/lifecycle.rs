//! The task behind each session: establish, idle until signalled, tear down.

use std::sync::Arc;

use {
    hookgate_channels::{
        DeviceProps, EventHandler, Jid, MessagingBackend, MessagingClient, PlatformType,
        platform::DEFAULT_OS_NAME,
    },
    hookgate_common::UserId,
    hookgate_config::ProtocolLogLevel,
    tokio::sync::mpsc,
    tracing::{error, info, warn},
};

use crate::{
    error::StartupError,
    manager::{ConnectRequest, SessionManager},
    pairing::{self, PairingOutcome, PairingState},
    router::EventRouter,
    session::{Session, SessionExit, SessionPhase},
    webhook::{self, RetryPolicy, WebhookDispatcher},
};

/// Device properties announced for this user. Blank fields take defaults.
pub fn device_props(req: &ConnectRequest, protocol: ProtocolLogLevel) -> DeviceProps {
    let os_name = req.os_name.trim();
    DeviceProps {
        os_name: if os_name.is_empty() {
            DEFAULT_OS_NAME.to_string()
        } else {
            os_name.to_string()
        },
        platform: PlatformType::resolve(&req.platform),
        verbose: protocol.is_enabled(),
    }
}

/// Load the stored identity, or provision a fresh one when there is none.
async fn open_client(
    backend: &dyn MessagingBackend,
    user_id: UserId,
    jid: &str,
    props: &DeviceProps,
) -> Result<Arc<dyn MessagingClient>, StartupError> {
    if jid.is_empty() {
        info!(user_id = %user_id, "no stored identity, provisioning a new device");
        return backend
            .new_identity(props)
            .await
            .map_err(StartupError::NewIdentity);
    }

    let parsed = Jid::parse_user_input(jid).map_err(StartupError::InvalidJid)?;
    match backend
        .load_identity(&parsed, props)
        .await
        .map_err(StartupError::IdentityLookup)?
    {
        Some(client) => Ok(client),
        None => {
            warn!(user_id = %user_id, jid = %parsed, "stored identity not found, provisioning a new device");
            backend
                .new_identity(props)
                .await
                .map_err(StartupError::NewIdentity)
        },
    }
}

pub(crate) async fn run_session(
    manager: Arc<SessionManager>,
    session: Arc<Session>,
    req: ConnectRequest,
) {
    let established = tokio::select! {
        biased;
        () = session.cancelled() => None,
        result = establish(&manager, &session, &req) => Some(result),
    };
    if let Some(Err(e)) = established {
        error!(user_id = %session.user_id, error = %e, "session startup failed");
        session.terminate(SessionExit::Failed(e));
    }

    session.cancelled().await;
    teardown(&manager, &session).await;
}

async fn establish(
    manager: &Arc<SessionManager>,
    session: &Arc<Session>,
    req: &ConnectRequest,
) -> Result<(), StartupError> {
    let user_id = session.user_id;
    let options = manager.options();
    let props = device_props(req, options.protocol);

    let client = open_client(manager.backend().as_ref(), user_id, &req.jid, &props).await?;
    session.attach_client(Arc::clone(&client));

    let http = webhook::build_http_client(&options.webhook, options.protocol.verbose_http())
        .map_err(|e| StartupError::HttpClient(e.to_string()))?;

    let (dispatcher, jobs) = WebhookDispatcher::channel(user_id, options.webhook.queue_capacity);
    manager.tasks().spawn(WebhookDispatcher::run_worker(
        user_id,
        jobs,
        http,
        RetryPolicy::from_config(&options.webhook),
        session.cancel_token(),
    ));

    // The handler must be in place before connect: the first events arrive
    // during the handshake.
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: EventHandler = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    session.attach_handler(client.add_event_handler(handler));
    let router = EventRouter::new(
        Arc::clone(manager),
        Arc::clone(session),
        Arc::clone(&client),
        dispatcher,
    );
    manager.tasks().spawn(router.run(rx, session.cancel_token()));

    if client.is_logged_in() {
        client.connect().await.map_err(StartupError::Connect)?;
    } else {
        session.set_phase(SessionPhase::Pairing);
        let state = PairingState::NoIdentity
            .subscribe()
            .map_err(StartupError::Pairing)?;
        let codes = client
            .pairing_codes()
            .await
            .map_err(StartupError::PairingChannel)?;
        client.connect().await.map_err(StartupError::Connect)?;
        match pairing::drive(manager, session, state, codes).await {
            PairingOutcome::Paired(_) => {},
            PairingOutcome::TimedOut | PairingOutcome::Abandoned => {
                session.terminate(SessionExit::PairingTimedOut);
                return Ok(());
            },
        }
    }

    session.set_phase(SessionPhase::Connected);
    info!(
        user_id = %user_id,
        platform = %props.platform,
        os = %props.os_name,
        "session connected"
    );
    Ok(())
}

async fn teardown(manager: &SessionManager, session: &Session) {
    let user_id = session.user_id;
    let reason = session.exit_reason();

    if let Some(client) = session.client() {
        if let Some(id) = session.handler_id() {
            client.remove_event_handler(id);
        }
        client.disconnect().await;
    }

    // Killed mid-pairing: the code on the row is dead now.
    if session.take_pairing_code_stored() && manager.is_current(session) {
        pairing::clear_qrcode(manager, user_id).await;
    }

    // A newer session may already own the user; leave its flag alone.
    if reason.clears_connected()
        && manager.is_current(session)
        && let Err(e) = manager.store().set_connected(user_id, false).await
    {
        error!(user_id = %user_id, error = %e, "failed to persist disconnected state");
    }

    manager.finish(session, reason.clone());
    session.set_phase(SessionPhase::Closed);
    info!(user_id = %user_id, reason = %reason, "session closed");
}
