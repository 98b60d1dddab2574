//! Shared types used across the hookgate crates: user ids, webhook
//! subscription labels and token validation.

pub mod error;
pub mod types;

pub use {
    error::ValidationError,
    types::{EventLabel, UserId, parse_subscriptions, subscriptions_to_string, validate_token},
};
