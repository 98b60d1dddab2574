use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ChannelError;

/// Server used for plain phone numbers.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Account/device address: `user@server` or `user:device@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub device: Option<u16>,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    /// Parse user input: a leading `+` is ignored and a bare number gets the
    /// default user server. Input containing `@` must name a user.
    pub fn parse_user_input(arg: &str) -> Result<Self, ChannelError> {
        let arg = arg.trim();
        let arg = arg.strip_prefix('+').unwrap_or(arg);
        if arg.is_empty() {
            return Err(ChannelError::InvalidJid(arg.to_string()));
        }
        if !arg.contains('@') {
            return Ok(Self::new(arg, DEFAULT_USER_SERVER));
        }
        arg.parse()
    }
}

impl FromStr for Jid {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChannelError::InvalidJid(s.to_string());
        let (local, server) = s.split_once('@').ok_or_else(invalid)?;
        if server.is_empty() || server.contains('@') {
            return Err(invalid());
        }
        let (user, device) = match local.split_once(':') {
            Some((user, device)) => (user, Some(device.parse::<u16>().map_err(|_| invalid())?)),
            None => (local, None),
        };
        if user.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}:{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
