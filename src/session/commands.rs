//! Outbound command surface of one session.
//!
//! Every command checks its preconditions, formats a frame, and runs it
//! through `send_and_wait`. Failures are logged as events and surfaced to
//! the caller; server-reported errors are never retried.

use super::{Session, SessionState};
use crate::error::CommandError;
use crate::flags::{self, UserType};
use crate::proto::format_cmd;
use crate::state::admin::{self, Table};
use crate::state::{ChannelId, UserId, subs_added, subs_removed};
use crate::{CLIENT_NAME, CLIENT_VERSION, PROTOCOL_VERSION};
use std::sync::Arc;
use tracing::info;

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

impl Session {
    /// Common preconditions: connected, logged in, own user mirrored.
    fn cmd_can_send(&self, failed: &str) -> Result<(), CommandError> {
        if !self.is_connected() {
            self.logbook
                .write(&format!("{failed} Not connected to server."), true);
            return Err(CommandError::NotConnected);
        }
        if !self.is_logged_in() {
            self.logbook
                .write(&format!("{failed} Not logged in to server."), true);
            return Err(CommandError::NotLoggedIn);
        }
        if self.model.read().user(self.uid()).is_none() {
            self.logbook
                .write(&format!("{failed} Unable to find current user."), true);
            return Err(CommandError::OwnUserMissing);
        }
        Ok(())
    }

    fn reject(&self, message: String) -> CommandError {
        self.logbook.write(&message, true);
        CommandError::Rejected(message)
    }

    // ----- handshake ------------------------------------------------------

    /// Send the reserved-id login command. Spawned when the server
    /// greeting arrives; the post-login summary is emitted by the
    /// dispatcher when `end id=1` comes back clean.
    pub(crate) async fn login(self: Arc<Self>) {
        if !self.is_connected() {
            self.logbook
                .write("Failed to log in. Not connected to server.", true);
            return;
        }
        if self.is_logged_in() {
            self.logbook
                .write("Failed to log in to server. Already logged in.", true);
            return;
        }
        self.set_state(SessionState::LoggingIn);
        let line = format_cmd(
            "login",
            &[
                ("username", self.cfg.username.clone()),
                ("password", self.cfg.password.clone()),
                ("nickname", self.login_nickname()),
                ("clientname", CLIENT_NAME.to_string()),
                ("protocol", PROTOCOL_VERSION.to_string()),
                ("version", CLIENT_VERSION.to_string()),
                ("id", super::correlator::CMD_LOGIN.to_string()),
            ],
        );
        match self.send_and_wait(&line, false).await {
            Ok(()) => {}
            Err(e) if e.is_server_error() => {
                self.logbook.write(&format!("Login failed: {e}"), true);
            }
            Err(e) => {
                self.logbook.write(&format!("Login error: {e}"), true);
                self.shutdown().await;
            }
        }
    }

    /// Post-login summary: server version plus user and channel counts.
    pub(crate) fn login_info(&self) {
        if !self.is_connected() {
            return;
        }
        let version = self.runtime.lock().version.clone();
        let (users, channels) = {
            let model = self.model.read();
            (model.user_count(), model.channel_count())
        };
        let user_part = match users {
            1 => "is 1 user".to_string(),
            n => format!("are {n} users"),
        };
        let msg = format!(
            "Server version: {version}\r\nThere {user_part} currently connected, \
             and {channels} channel{} on this server.",
            plural(channels)
        );
        self.logbook.console(&msg, false, false);
        info!(server = %self.display_name(), users, channels, "logged in");
    }

    /// Unauthenticated logout; no bracket follows, so this writes directly.
    pub async fn logout(&self) -> Result<(), CommandError> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }
        self.write_line("logout").await
    }

    // ----- basic commands -------------------------------------------------

    pub async fn cmd_ping(&self) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to ping server.")?;
        self.send_and_wait("ping", true).await.map_err(|e| {
            if !e.is_server_error() {
                self.logbook
                    .write(&format!("Failed to ping server: {e}"), true);
            }
            e
        })
    }

    pub async fn cmd_change_nick(&self, nickname: &str) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to change nickname.")?;
        let current = self
            .model
            .read()
            .user(self.uid())
            .map(|u| u.nickname.clone())
            .unwrap_or_default();
        if current == nickname {
            return Err(self.reject(
                "Failed to change nickname: nicknames identical.".to_string(),
            ));
        }
        let line = format_cmd("changenick", &[("nickname", nickname.to_string())]);
        self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to change nickname")
    }

    pub async fn cmd_change_status(&self, mode: i64, msg: &str) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to change status.")?;
        let same = {
            let model = self.model.read();
            let user = model.user(self.uid());
            user.map(|u| u.status_mode == mode && u.status_msg == msg)
                .unwrap_or(false)
        };
        if same {
            return Err(self.reject("Failed to change status: status identical.".to_string()));
        }
        let line = format_cmd(
            "changestatus",
            &[
                ("statusmode", mode.to_string()),
                ("statusmsg", msg.to_string()),
            ],
        );
        self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to change status")
    }

    // ----- messaging ------------------------------------------------------

    pub async fn cmd_message_user(&self, uid: UserId, message: &str) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to send message.")?;
        if uid == self.uid() {
            return Err(self.reject("Failed to send message: user ID is the bot.".to_string()));
        }
        if message.is_empty() {
            return Err(self.reject("Failed to send message: message empty.".to_string()));
        }
        let line = format_cmd(
            "message",
            &[
                ("type", flags::msg::USER.to_string()),
                ("destuserid", uid.to_string()),
                ("content", message.to_string()),
            ],
        );
        let res =
            self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to send message");
        if res.is_ok() {
            self.message_info(flags::msg::USER, self.uid(), uid, 0, message);
        }
        res
    }

    pub async fn cmd_message_channel(
        &self,
        cid: ChannelId,
        message: &str,
    ) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to send message.")?;
        if self.model.read().channel(cid).is_none() {
            return Err(self.reject("Failed to send message: invalid channel.".to_string()));
        }
        if message.is_empty() {
            return Err(self.reject("Failed to send message: message empty.".to_string()));
        }
        let line = format_cmd(
            "message",
            &[
                ("type", flags::msg::CHANNEL.to_string()),
                ("chanid", cid.to_string()),
                ("content", message.to_string()),
            ],
        );
        let res =
            self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to send message");
        if res.is_ok() {
            self.message_info(flags::msg::CHANNEL, self.uid(), 0, cid, message);
        }
        res
    }

    pub async fn cmd_message_broadcast(&self, message: &str) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to send message.")?;
        if message.is_empty() {
            return Err(self.reject("Failed to send message: message empty.".to_string()));
        }
        let line = format_cmd(
            "message",
            &[
                ("type", flags::msg::BROADCAST.to_string()),
                ("content", message.to_string()),
            ],
        );
        let res =
            self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to send message");
        if res.is_ok() {
            self.message_info(flags::msg::BROADCAST, self.uid(), 0, 0, message);
        }
        res
    }

    // ----- channel membership --------------------------------------------

    pub async fn cmd_join(&self, cid: ChannelId, password: &str) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to join channel.")?;
        let (channel_exists, already_in) = {
            let model = self.model.read();
            (
                model.channel(cid).is_some(),
                model
                    .user(self.uid())
                    .map(|u| u.channel == Some(cid))
                    .unwrap_or(false),
            )
        };
        if !channel_exists {
            return Err(self.reject("Failed to join channel: invalid channel id.".to_string()));
        }
        if already_in {
            return Err(self.reject(format!(
                "Failed to join channel: already in channel {cid}."
            )));
        }
        let line = format_cmd(
            "join",
            &[
                ("chanid", cid.to_string()),
                ("password", password.to_string()),
            ],
        );
        self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to join channel")
    }

    pub async fn cmd_leave(&self) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to leave channel.")?;
        let in_channel = self
            .model
            .read()
            .user(self.uid())
            .map(|u| u.channel.is_some())
            .unwrap_or(false);
        if !in_channel {
            return Err(self.reject("Failed to leave channel: not in a channel.".to_string()));
        }
        self.log_on_failure(self.send_and_wait("leave", true).await, "Failed to leave channel")
    }

    pub async fn cmd_move_user(&self, uid: UserId, cid: ChannelId) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to move user.")?;
        {
            let model = self.model.read();
            if model.user(uid).is_none() {
                drop(model);
                return Err(self.reject("Failed to move user: invalid user ID.".to_string()));
            }
            if model.channel(cid).is_none() {
                drop(model);
                return Err(self.reject("Failed to move user: invalid channel ID.".to_string()));
            }
        }
        let line = format_cmd(
            "moveuser",
            &[("userid", uid.to_string()), ("chanid", cid.to_string())],
        );
        self.log_on_failure(self.send_and_wait(&line, true).await, "Failed to move user")
    }

    // ----- subscriptions --------------------------------------------------

    /// Drive the user's local subscriptions to `subs` with a disjoint
    /// subscribe/unsubscribe pair. A zero-mask side is skipped and counts
    /// as success; both sent commands must succeed.
    pub async fn cmd_change_subscriptions(
        &self,
        uid: UserId,
        subs: u32,
    ) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to change subscriptions.")?;
        let current = match self.model.read().user(uid) {
            Some(user) => user.sub_local,
            None => {
                return Err(self.reject(
                    "Failed to change user subscriptions: invalid user ID.".to_string(),
                ));
            }
        };
        if current == subs {
            return Err(self.reject(
                "Failed to change user subscriptions: local subscriptions already match given subscriptions."
                    .to_string(),
            ));
        }
        let to_subscribe = subs_added(subs, current);
        let to_unsubscribe = subs_removed(subs, current);
        let mut outcome = Ok(());
        if to_subscribe != 0 {
            let line = format_cmd(
                "subscribe",
                &[
                    ("userid", uid.to_string()),
                    ("sublocal", to_subscribe.to_string()),
                ],
            );
            if let Err(e) = self.send_and_wait(&line, true).await {
                if !e.is_server_error() {
                    self.logbook
                        .write(&format!("Subscription error: {e}"), true);
                }
                outcome = Err(e);
            }
        }
        if to_unsubscribe != 0 {
            let line = format_cmd(
                "unsubscribe",
                &[
                    ("userid", uid.to_string()),
                    ("sublocal", to_unsubscribe.to_string()),
                ],
            );
            if let Err(e) = self.send_and_wait(&line, true).await {
                if !e.is_server_error() {
                    self.logbook
                        .write(&format!("Unsubscription error: {e}"), true);
                }
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    // ----- admin ----------------------------------------------------------

    /// List all user accounts (reserved id 2), rotate the cache, and log
    /// a human-readable diff against the previous snapshot.
    pub async fn cmd_list_accounts(&self) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to list user accounts.")?;
        let (user_type, _) = self.rights_snapshot();
        if user_type != UserType::Admin {
            return Err(self.reject(
                "Unable to list user accounts. Insufficient permission.".to_string(),
            ));
        }
        let line = format_cmd(
            "listaccounts",
            &[
                ("index", "0".to_string()),
                ("count", "100000".to_string()),
                ("id", super::correlator::CMD_LIST_ACCOUNTS.to_string()),
            ],
        );
        if let Err(e) = self.send_and_wait(&line, false).await {
            if !e.is_server_error() {
                self.logbook
                    .write(&format!("Failed to list user accounts: {e}"), true);
            }
            return Err(e);
        }

        let snapshot = std::mem::take(&mut *self.accounts_cached.lock());
        let previous = self.accounts.lock().replace(snapshot.clone());
        let Some(previous) = previous else {
            return Ok(());
        };
        let diff = admin::diff(&snapshot, &previous);
        if diff.is_empty() {
            return Ok(());
        }
        self.logbook
            .write(&account_changes_msg(&diff, &previous), true);
        Ok(())
    }

    /// List all bans (reserved id 3), rotate the cache, and log added or
    /// lifted addresses.
    pub async fn cmd_list_bans(&self) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to list user bans.")?;
        let (user_type, rights) = self.rights_snapshot();
        if !flags::has_right(rights, user_type, flags::right::BAN_USERS) {
            return Err(
                self.reject("Unable to list user bans. Insufficient permission.".to_string())
            );
        }
        let line = format_cmd(
            "listbans",
            &[
                ("index", "0".to_string()),
                ("count", "1000000".to_string()),
                ("id", super::correlator::CMD_LIST_BANS.to_string()),
            ],
        );
        if let Err(e) = self.send_and_wait(&line, false).await {
            if !e.is_server_error() {
                self.logbook
                    .write(&format!("Failed to list user bans: {e}"), true);
            }
            return Err(e);
        }

        let snapshot = std::mem::take(&mut *self.bans_cached.lock());
        let previous = self.bans.lock().replace(snapshot.clone());
        let Some(previous) = previous else {
            return Ok(());
        };
        let diff = admin::diff(&snapshot, &previous);
        if diff.added.is_empty() && diff.removed.is_empty() {
            return Ok(());
        }
        self.logbook.write(&ban_changes_msg(&diff), true);
        Ok(())
    }

    /// Create an account, then refresh the accounts snapshot.
    pub async fn cmd_new_account(
        &self,
        username: &str,
        password: &str,
        user_type: UserType,
        rights: u32,
    ) -> Result<(), CommandError> {
        self.cmd_can_send("Unable to add user account.")?;
        let (own_type, _) = self.rights_snapshot();
        if own_type != UserType::Admin {
            return Err(
                self.reject("Unable to add user account. Insufficient permission.".to_string())
            );
        }
        let line = format_cmd(
            "newaccount",
            &[
                ("username", username.to_string()),
                ("password", password.to_string()),
                ("usertype", user_type.as_raw().to_string()),
                ("userrights", rights.to_string()),
            ],
        );
        if let Err(e) = self.send_and_wait(&line, true).await {
            if !e.is_server_error() {
                self.logbook
                    .write(&format!("Failed to add user account: {e}"), true);
            }
            return Err(e);
        }
        let _ = self.cmd_list_accounts().await;
        Ok(())
    }

    fn log_on_failure(
        &self,
        res: Result<(), CommandError>,
        what: &str,
    ) -> Result<(), CommandError> {
        if let Err(e) = &res
            && !e.is_server_error()
        {
            self.logbook.write(&format!("{what}: {e}"), true);
        }
        res
    }
}

type StringDiff = admin::TableDiff<String, String, String>;

fn names_line(table: &Table) -> String {
    table.keys().cloned().collect::<Vec<_>>().join(", ")
}

fn account_changes_msg(diff: &StringDiff, previous: &Table) -> String {
    let mut msg = String::from("User account changes.\r\n");
    if !diff.added.is_empty() {
        let has = if diff.added.len() == 1 { "has" } else { "have" };
        msg.push_str(&format!(
            "The following user account{} {has} been added:\r\n{}\r\n",
            plural(diff.added.len()),
            names_line(&diff.added)
        ));
    }
    if !diff.changed.is_empty() {
        let has = if diff.changed.len() == 1 { "has" } else { "have" };
        msg.push_str(&format!(
            "The following account{} {has} been changed:\r\n",
            plural(diff.changed.len())
        ));
        for (name, delta) in &diff.changed {
            msg.push_str(name);
            msg.push_str("\r\n");
            let old = previous.get(name);
            if let Some(password) = delta.get("password") {
                match old.and_then(|row| row.get("password")).filter(|p| !p.is_empty()) {
                    Some(old_password) => msg.push_str(&format!(
                        "Old password: {old_password}\r\nNew password: {password}\r\n"
                    )),
                    None => msg.push_str(&format!("Password added: {password}\r\n")),
                }
            }
            if let Some(user_type) = delta.get("usertype") {
                let old_type = old
                    .and_then(|row| row.get("usertype"))
                    .cloned()
                    .unwrap_or_default();
                msg.push_str(&format!(
                    "Old user type: {old_type}\r\nNew user type: {user_type}\r\n"
                ));
            }
            if let Some(rights) = delta.get("userrights").filter(|r| !r.is_empty()) {
                match old
                    .and_then(|row| row.get("userrights"))
                    .filter(|r| !r.is_empty())
                {
                    Some(old_rights) => msg.push_str(&format!(
                        "Old user rights: {old_rights}\r\nNew user rights: {rights}\r\n"
                    )),
                    None => msg.push_str(&format!("User rights: {rights}\r\n")),
                }
            }
        }
    }
    if !diff.removed.is_empty() {
        let has = if diff.removed.len() == 1 { "has" } else { "have" };
        msg.push_str(&format!(
            "The following user account{} {has} been removed:\r\n{}\r\n",
            plural(diff.removed.len()),
            names_line(&diff.removed)
        ));
    }
    msg
}

fn ban_changes_msg(diff: &StringDiff) -> String {
    let mut msg = String::from("Ban changes.\r\n");
    if !diff.added.is_empty() {
        let is = if diff.added.len() == 1 { "is" } else { "are" };
        msg.push_str(&format!(
            "The following IP address{} {is} now banned:\r\n",
            if diff.added.len() == 1 { "" } else { "es" }
        ));
        for addr in diff.added.keys() {
            msg.push_str(addr);
            msg.push_str("\r\n");
        }
    }
    if !diff.removed.is_empty() {
        let is = if diff.removed.len() == 1 { "is" } else { "are" };
        msg.push_str(&format!(
            "The following IP address{} {is} no longer banned:\r\n",
            if diff.removed.len() == 1 { "" } else { "es" }
        ));
        for addr in diff.removed.keys() {
            msg.push_str(addr);
            msg.push_str("\r\n");
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn account_change_message_names_old_and_new_values() {
        let mut previous = Table::new();
        previous.insert("bob".into(), row(&[("password", "old"), ("usertype", "default")]));
        previous.insert("gone".into(), row(&[("password", "x")]));
        let mut snapshot = Table::new();
        snapshot.insert("bob".into(), row(&[("password", "new"), ("usertype", "default")]));
        snapshot.insert("carol".into(), row(&[("password", "c")]));

        let diff = admin::diff(&snapshot, &previous);
        let msg = account_changes_msg(&diff, &previous);
        assert!(msg.contains("has been added:\r\ncarol"));
        assert!(msg.contains("has been removed:\r\ngone"));
        assert!(msg.contains("Old password: old"));
        assert!(msg.contains("New password: new"));
    }

    #[test]
    fn ban_change_message_lists_addresses() {
        let mut previous = Table::new();
        previous.insert("10.0.0.1".into(), row(&[("nickname", "x")]));
        let mut snapshot = Table::new();
        snapshot.insert("10.0.0.2".into(), row(&[("nickname", "y")]));

        let diff = admin::diff(&snapshot, &previous);
        let msg = ban_changes_msg(&diff);
        assert!(msg.contains("now banned:\r\n10.0.0.2"));
        assert!(msg.contains("no longer banned:\r\n10.0.0.1"));
    }
}
