//! Token-keyed cache of per-user routing config.
//!
//! Entries are written when a session starts (or is reconciled) and patched
//! when pairing assigns a jid. Nothing expires them.

use {
    dashmap::DashMap,
    hookgate_common::{EventLabel, UserId},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUserInfo {
    pub id: UserId,
    pub jid: String,
    pub webhook: String,
    pub token: String,
    pub events: Vec<EventLabel>,
    pub os_name: String,
    pub platform_type: String,
}

#[derive(Debug, Default)]
pub struct UserInfoCache {
    entries: DashMap<String, CachedUserInfo>,
}

impl UserInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<CachedUserInfo> {
        self.entries.get(token).map(|e| e.value().clone())
    }

    /// Insert or replace the entry for `info.token`.
    pub fn insert(&self, info: CachedUserInfo) {
        self.entries.insert(info.token.clone(), info);
    }

    /// Patch the jid of an existing entry. Returns false if the token is
    /// not cached.
    pub fn update_jid(&self, token: &str, jid: &str) -> bool {
        match self.entries.get_mut(token) {
            Some(mut entry) => {
                entry.jid = jid.to_string();
                true
            },
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
