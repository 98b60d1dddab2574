//! Relaunch sessions for users that were connected when the process stopped.

use std::sync::Arc;

use {
    hookgate_common::UserId,
    tracing::{error, info},
};

use crate::manager::{ConnectDisposition, ConnectRequest, SessionManager};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<UserId>,
    /// Users whose session was already running.
    pub skipped: Vec<UserId>,
    /// The store could not be read; nothing was started.
    pub store_failed: bool,
}

/// Issue a connect request for every user persisted as connected.
///
/// A store failure is logged and leaves the process running with no
/// sessions started.
pub async fn reconcile(manager: &Arc<SessionManager>) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let users = match manager.store().list_connected().await {
        Ok(users) => users,
        Err(e) => {
            error!(error = %e, "could not list connected users");
            report.store_failed = true;
            return report;
        },
    };

    for user in &users {
        let req = ConnectRequest::from_user(user);
        match manager.request_connect(req) {
            ConnectDisposition::Started => report.started.push(user.id),
            ConnectDisposition::AlreadyActive | ConnectDisposition::ShuttingDown => {
                report.skipped.push(user.id)
            },
        }
    }
    info!(
        started = report.started.len(),
        skipped = report.skipped.len(),
        "reconciled previously connected users"
    );
    report
}
