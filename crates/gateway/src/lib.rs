//! Session lifecycle, pairing, event routing and webhook delivery.
//!
//! A [`SessionManager`] owns one long-lived session per user. Each session
//! links (or reloads) a device through the messaging backend, streams inbound
//! events through an [`router::EventRouter`] and hands webhook jobs to its own
//! [`webhook::WebhookDispatcher`].

pub mod cache;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod media;
pub mod pairing;
pub mod qr;
pub mod reconcile;
pub mod router;
pub mod server;
pub mod session;
pub mod webhook;

pub use {
    cache::{CachedUserInfo, UserInfoCache},
    error::{DeliveryError, MediaError, StartupError},
    manager::{ConnectDisposition, ConnectRequest, SessionManager, SessionOptions},
    reconcile::{ReconcileReport, reconcile},
    session::{SessionExit, SessionPhase},
};
