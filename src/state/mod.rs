//! In-memory mirror of one remote server's channels and users.
//!
//! The whole mirror lives behind a single lock owned by the session;
//! composite mutations (attaching a user to a channel) happen inside one
//! critical section so the bidirectional link is never observed half-made.
//! Cross-references between users and channels are ids, not pointers,
//! which makes the reconnect teardown a plain `clear()`.

pub mod admin;
mod channel;
mod user;

pub use channel::{Channel, File};
pub use user::{User, subs_added, subs_removed};

use std::collections::HashMap;

pub type ChannelId = i64;
pub type UserId = i64;
pub type FileId = i64;

/// The mirrored state of one server.
#[derive(Debug, Default)]
pub struct Model {
    channels: HashMap<ChannelId, Channel>,
    users: HashMap<UserId, User>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything. Used on session teardown; the mirror is rebuilt
    /// from scratch on reconnect.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.users.clear();
    }

    // ----- channels -------------------------------------------------------

    /// Create a channel. Returns `false` when the id already exists.
    pub fn add_channel(&mut self, id: ChannelId, parent_id: ChannelId) -> bool {
        if self.channels.contains_key(&id) {
            return false;
        }
        self.channels.insert(id, Channel::new(id, parent_id));
        true
    }

    /// Remove a channel, detaching any members still linked to it.
    pub fn remove_channel(&mut self, id: ChannelId) -> Option<Channel> {
        let removed = self.channels.remove(&id)?;
        for uid in &removed.users {
            if let Some(user) = self.users.get_mut(uid)
                && user.channel == Some(id)
            {
                user.channel = None;
            }
        }
        Some(removed)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels_sorted(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self.channels.values().collect();
        channels.sort_by_key(|ch| ch.id);
        channels
    }

    /// Root-to-node path, each segment terminated by `/`. Walks the parent
    /// chain collecting names, so the output does not depend on how the
    /// server assigned ids. A broken chain terminates at its deepest
    /// reachable ancestor.
    pub fn path(&self, id: ChannelId) -> String {
        let mut names = Vec::new();
        let mut current = id;
        let mut hops = 0usize;
        while let Some(ch) = self.channels.get(&current) {
            names.push(ch.name.as_str());
            if ch.parent_id == 0 {
                break;
            }
            current = ch.parent_id;
            hops += 1;
            if hops > self.channels.len() {
                // parent cycle from a misbehaving server
                break;
            }
        }
        if names.is_empty() {
            return String::new();
        }
        names.reverse();
        let mut path = String::new();
        for name in names {
            path.push_str(name);
            path.push('/');
        }
        path
    }

    // ----- users ----------------------------------------------------------

    /// Create a user. Returns `false` when the id already exists.
    pub fn add_user(&mut self, id: UserId) -> bool {
        if self.users.contains_key(&id) {
            return false;
        }
        self.users.insert(id, User::new(id));
        true
    }

    /// Remove a user entirely, detaching it from its channel first.
    pub fn remove_user(&mut self, id: UserId) -> Option<User> {
        let channel = self.users.get(&id)?.channel;
        if let Some(cid) = channel
            && let Some(ch) = self.channels.get_mut(&cid)
        {
            ch.users.remove(&id);
        }
        self.users.remove(&id)
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn users_sorted(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    // ----- membership -----------------------------------------------------

    /// Link a user into a channel, updating both sides in this critical
    /// section. A user already elsewhere is moved. Returns `false` when
    /// either id is unknown or the user is already a member.
    pub fn attach_user(&mut self, uid: UserId, cid: ChannelId) -> bool {
        if !self.channels.contains_key(&cid) {
            return false;
        }
        let old = match self.users.get(&uid) {
            Some(user) if user.channel == Some(cid) => return false,
            Some(user) => user.channel,
            None => return false,
        };
        if let Some(old_cid) = old
            && let Some(old_ch) = self.channels.get_mut(&old_cid)
        {
            old_ch.users.remove(&uid);
        }
        if let Some(ch) = self.channels.get_mut(&cid) {
            ch.users.insert(uid);
        }
        if let Some(user) = self.users.get_mut(&uid) {
            user.channel = Some(cid);
        }
        true
    }

    /// Unlink a user from a channel. The user survives; only the
    /// membership link goes away.
    pub fn detach_user(&mut self, uid: UserId, cid: ChannelId) -> bool {
        let Some(ch) = self.channels.get_mut(&cid) else {
            return false;
        };
        if !ch.users.remove(&uid) {
            return false;
        }
        if let Some(user) = self.users.get_mut(&uid)
            && user.channel == Some(cid)
        {
            user.channel = None;
        }
        true
    }
}
