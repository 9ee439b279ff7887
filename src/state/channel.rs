//! Channel and file entities.

use super::{ChannelId, FileId, UserId};
use crate::flags;
use std::collections::{BTreeSet, HashMap};

/// Metadata of one file offered in a channel. Payloads are never
/// transferred; only the listing is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub id: FileId,
    pub name: String,
    pub size: i64,
    pub owner: String,
}

/// One channel of the remote tree.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub id: ChannelId,
    pub parent_id: ChannelId,
    pub name: String,
    pub topic: String,
    pub password: String,
    pub op_password: String,
    pub protected: bool,
    pub operators: Vec<UserId>,
    pub disk_quota: i64,
    pub max_users: i64,
    pub options: u32,
    pub audio_codec: Vec<i64>,
    pub audio_config: Vec<i64>,
    pub files: HashMap<FileId, File>,
    /// Members, by user id. The matching back-reference lives on the user.
    pub users: BTreeSet<UserId>,
}

impl Channel {
    pub fn new(id: ChannelId, parent_id: ChannelId) -> Self {
        Self {
            id,
            parent_id,
            ..Self::default()
        }
    }

    pub fn options_str(&self) -> String {
        flags::channel_options_str(self.options)
    }

    pub fn quota_str(&self) -> String {
        format!("{} bytes", self.disk_quota)
    }

    /// Track a new file. Returns `false` when the id is already present.
    pub fn add_file(&mut self, file: File) -> bool {
        if self.files.contains_key(&file.id) {
            return false;
        }
        self.files.insert(file.id, file);
        true
    }

    /// Drop a file by name, the key `removefile` frames carry.
    pub fn remove_file_by_name(&mut self, name: &str) -> Option<File> {
        let id = self
            .files
            .values()
            .find(|f| f.name == name)
            .map(|f| f.id)?;
        self.files.remove(&id)
    }

    /// Files ordered by id for stable listings.
    pub fn files_sorted(&self) -> Vec<&File> {
        let mut files: Vec<&File> = self.files.values().collect();
        files.sort_by_key(|f| f.id);
        files
    }
}
