//! User entity and subscription delta helpers.

use super::{ChannelId, UserId};
use crate::flags::{self, UserType};
use std::time::Instant;

/// One user seen on the remote server, including the bot itself.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    pub username: String,
    pub user_type: UserType,
    pub ip: String,
    pub client_name: String,
    pub version: String,
    pub status_mode: i64,
    pub status_msg: String,
    /// What this client receives from the user.
    pub sub_local: u32,
    /// What the user receives from this client.
    pub sub_remote: u32,
    /// Current channel, if any. The matching forward reference lives in
    /// the channel's member set.
    pub channel: Option<ChannelId>,
    connected_at: Option<Instant>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Name used in event log lines: the nickname, or `#<id> <username>`
    /// when the nickname is empty.
    pub fn log_name(&self) -> String {
        if !self.nickname.is_empty() {
            return self.nickname.clone();
        }
        if self.username.is_empty() {
            format!("#{}", self.id)
        } else {
            format!("#{} {}", self.id, self.username)
        }
    }

    /// Record the connection time. Set at most once per session.
    pub fn mark_connected(&mut self) {
        if self.connected_at.is_none() {
            self.connected_at = Some(Instant::now());
        }
    }

    pub fn connected_for(&self) -> Option<std::time::Duration> {
        self.connected_at.map(|t| t.elapsed())
    }

    pub fn status_mode_str(&self) -> String {
        flags::status_mode_str(self.status_mode)
    }
}

/// Bits present in `current` but not in `old`.
pub fn subs_added(current: u32, old: u32) -> u32 {
    current & !old
}

/// Bits present in `old` but not in `current`.
pub fn subs_removed(current: u32, old: u32) -> u32 {
    old & !current
}
