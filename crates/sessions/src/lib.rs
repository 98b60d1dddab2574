//! User persistence.
//!
//! The gateway only ever reads a user row by id, lists the rows marked
//! connected, and performs point updates of `qrcode`, `connected` and `jid`.
//! [`UserStore`] is that seam; [`SqliteUserStore`] backs it with a single
//! `users` table.

pub mod store;

pub use store::{NewUser, SqliteUserStore, StoreError, User, UserStore};
