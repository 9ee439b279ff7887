//! Event dispatcher: advances the mirrored model from incoming frames.
//!
//! Exactly one dispatcher reads a session's connection. It never returns
//! errors upward: a frame either mutates state (and emits events through
//! the logbook) or the returned [`Flow`] tells the lifecycle loop to tear
//! the session down.

use super::correlator::{CMD_LOGIN, CMD_NONE};
use super::{Flow, Session, SessionState};
use crate::flags::{self, UserType};
use crate::logbook::duration_str;
use crate::proto::{Frame, Params};
use crate::state::{File, subs_added, subs_removed};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

impl Session {
    /// Advance the model from one frame.
    pub(crate) fn handle_frame(self: &Arc<Self>, frame: Frame, raw: &str) -> Flow {
        let Frame { cmd, params } = frame;
        match cmd.as_str() {
            "teamtalk" => self.on_greeting(&params),
            "accepted" => self.on_accepted(&params),
            "serverupdate" => self.on_server_update(&params),
            "addchannel" => self.on_add_channel(&params),
            "updatechannel" => self.on_update_channel(&params),
            "removechannel" => self.on_remove_channel(&params),
            "addfile" => self.on_add_file(&params),
            "removefile" => self.on_remove_file(&params),
            "loggedin" => self.on_logged_in(&params),
            "updateuser" => self.on_update_user(&params),
            "adduser" => self.on_add_user(&params),
            "joined" => self.on_joined(&params),
            "left" => self.on_left(&params),
            "removeuser" => self.on_remove_user(&params),
            "loggedout" => return self.on_logged_out(&params),
            "messagedeliver" => self.on_message_deliver(&params),
            "useraccount" => self.on_user_account(&params),
            "userbanned" => self.on_user_banned(params),
            "kicked" => self.on_kicked(&params),
            "error" => {
                let mut msg = params.text("message");
                let missing = params.text("param");
                if !missing.is_empty() {
                    msg.push_str(&format!(" Missing parameter: {missing}"));
                }
                self.correlator.on_error(msg);
            }
            "begin" => self.correlator.on_begin(params.int_or_zero("id")),
            "ok" => self.correlator.on_ok(),
            "end" => {
                let id = params.int_or_zero("id");
                let outcome = self.correlator.on_end();
                if id == CMD_LOGIN && outcome.is_ok() {
                    self.set_state(SessionState::LoggedIn);
                    self.login_info();
                }
            }
            "pong" => {}
            _ => {
                warn!(server = %self.display_name(), cmd = %cmd, "unrecognized command");
                self.logbook.write(
                    &format!("Error: unrecognized command received.\r\nCommand:\r\n{raw}"),
                    true,
                );
            }
        }
        Flow::Continue
    }

    fn in_login(&self) -> bool {
        self.correlator.in_login()
    }

    fn in_bracket(&self) -> bool {
        self.correlator.bracket_id() != CMD_NONE
    }

    // ----- handshake ------------------------------------------------------

    /// Server greeting: capture identity, arm the keepalive, start login.
    fn on_greeting(self: &Arc<Self>, params: &Params) {
        let secs = params.int_or_zero("usertimeout");
        {
            let mut rt = self.runtime.lock();
            rt.server_name = params.text("servername");
            rt.max_users = params.int_or_zero("maxusers");
            rt.protocol = params.text("protocol");
            if let Some(uid) = params.int("userid") {
                rt.uid = uid;
            }
        }
        if secs != self.user_timeout() {
            if secs < 10 {
                self.logbook.write(
                    &format!("User timeout may be too low. Current value in seconds: {secs}."),
                    true,
                );
            }
            self.arm_keepalive(secs);
        }
        let session = Arc::clone(self);
        tokio::spawn(session.login());
    }

    /// Login acknowledged: synthesize the bot's own user record from this
    /// frame and start the event-check timer.
    fn on_accepted(self: &Arc<Self>, params: &Params) {
        let rights = params.int_or_zero("userrights") as u32;
        let user_type = UserType::from_raw(params.int_or_zero("usertype"));
        let uid = params.int_or_zero("userid");
        {
            let mut rt = self.runtime.lock();
            rt.logged_in = true;
            rt.rights = rights;
            rt.user_type = user_type;
            if uid != 0 {
                rt.uid = uid;
            }
        }
        {
            let mut model = self.model.write();
            model.add_user(uid);
            if let Some(user) = model.user_mut(uid) {
                user.mark_connected();
                user.nickname = params.text("nickname");
                user.username = params.text("username");
                user.user_type = user_type;
                user.status_mode = params.int_or_zero("statusmode");
                user.status_msg = params.text("statusmsg");
                user.ip = params.text("ipaddr");
                user.version = crate::CLIENT_VERSION.to_string();
                user.client_name = crate::CLIENT_NAME.to_string();
            }
        }

        let mut msg = String::from("Logged in.\r\n");
        if !flags::has_right(rights, user_type, flags::right::MULTI_LOGIN) {
            msg.push_str(
                "Warning: Unable to log in multiple times. You must log out of this user \
                 account before you can log in with a TeamTalk client.\r\n",
            );
        }
        if !flags::has_right(rights, user_type, flags::right::VIEW_ALL_USERS) {
            msg.push_str(
                "Warning: you cannot view any users unless you have joined a channel, and \
                 you will see only those users in the channel you have joined. Insufficient \
                 information about user login and logouts will be sent to the bot, which may \
                 cause problems and errors.\r\n",
            );
        }
        if self.automove_enabled() {
            msg.push_str("Automatic moving of users enabled.\r\n");
        }
        self.logbook.write(&msg, true);
        self.arm_check_events(super::CHECK_EVENTS_SECS);
    }

    fn on_server_update(self: &Arc<Self>, params: &Params) {
        let mut msg = String::new();
        let version = params.text("version");
        {
            let mut rt = self.runtime.lock();
            if version != rt.version {
                rt.version = version.clone();
                msg.push_str(&format!("Server version: {version}\r\n"));
            }
        }
        let secs = params.int_or_zero("usertimeout");
        if secs != self.user_timeout() {
            if secs < 10 {
                self.logbook.write(
                    &format!("User timeout may be too low. Current value in seconds: {secs}."),
                    true,
                );
            } else {
                msg.push_str(&format!("User timeout in seconds: {secs}.\r\n"));
            }
            self.arm_keepalive(secs);
        }
        let motd = params.text("motd");
        {
            let mut rt = self.runtime.lock();
            if motd != rt.motd {
                rt.motd = motd.clone();
                msg.push_str(&format!("Message of the day updated:\r\n{motd}"));
            }
        }
        if !self.in_login() {
            self.logbook.buffer_line(msg.trim_end_matches("\r\n"));
        }
    }

    // ----- channels -------------------------------------------------------

    fn on_add_channel(&self, params: &Params) {
        let cid = params.int_or_zero("chanid");
        let pid = params.int_or_zero("parentid");
        let mut model = self.model.write();
        if !model.add_channel(cid, pid) {
            drop(model);
            self.logbook.write(
                &format!("Error adding channel {cid}. Channel already exists."),
                true,
            );
            return;
        }
        let operators = params.list("operators");
        let options = params.int_or_zero("type") as u32;
        let protected = params.int_or_zero("protected") != 0;
        let topic = params.text("topic");
        let name = params.text("name");
        let password = params.text("password");
        let op_password = params.text("oppassword");
        let max_users = params.int_or_zero("maxusers");
        if let Some(ch) = model.channel_mut(cid) {
            ch.name = name.clone();
            ch.password = password.clone();
            ch.op_password = op_password.clone();
            ch.protected = protected;
            ch.topic = topic.clone();
            ch.operators = operators.clone();
            ch.disk_quota = params.int_or_zero("diskquota");
            ch.max_users = max_users;
            ch.options = options;
            ch.audio_codec = params.list("audiocodec");
            ch.audio_config = params.list("audiocfg");
        }
        if self.in_login() {
            return;
        }
        self.logbook.buffer_line("Channel added.");
        self.logbook.buffer_line(&format!("Name: {name}"));
        self.logbook.buffer_line(&format!("ID: {cid}"));
        self.logbook.buffer_line(&format!("Parent ID: {pid}"));
        if !topic.is_empty() {
            self.logbook.buffer_line(&format!("Topic: {topic}"));
        }
        self.logbook.buffer_line(if protected {
            "Password protected: yes"
        } else {
            "Password protected: no"
        });
        if !password.is_empty() {
            self.logbook.buffer_line(&format!("Password: {password}"));
        }
        if !op_password.is_empty() {
            self.logbook
                .buffer_line(&format!("Operator password: {op_password}"));
        }
        let ops = operators_str(&model, &operators);
        if !ops.is_empty() {
            self.logbook.buffer_line(&format!("Operators: {ops}"));
        }
        if let Some(ch) = model.channel(cid) {
            let options = ch.options_str();
            if !options.is_empty() {
                self.logbook.buffer_line(&format!("Options: {options}"));
            }
            self.logbook
                .buffer_line(&format!("Disk quota: {}", ch.quota_str()));
        }
        self.logbook
            .buffer_line(&format!("Maximum users: {max_users}"));
    }

    fn on_update_channel(&self, params: &Params) {
        let cid = params.int_or_zero("chanid");
        let mut model = self.model.write();
        if model.channel(cid).is_none() {
            drop(model);
            self.logbook.write(
                &format!("Error: failed to update channel {cid}. Channel doesn't exist."),
                true,
            );
            return;
        }
        let old_path = model.path(cid);
        let mut msg = String::new();

        let name = params.text("name");
        let renamed = model.channel(cid).map(|ch| ch.name != name).unwrap_or(false);
        if renamed {
            if let Some(ch) = model.channel_mut(cid) {
                ch.name = name.clone();
            }
            msg.push_str(&format!("New name: {name}\r\nPath: {}\r\n", model.path(cid)));
        }

        if let Some(ch) = model.channel_mut(cid) {
            let options = params.int_or_zero("type") as u32;
            if ch.options != options {
                ch.options = options;
                msg.push_str(&format!("New options: {}\r\n", ch.options_str()));
            }
            let protected = params.int_or_zero("protected") != 0;
            if ch.protected != protected {
                ch.protected = protected;
                if protected {
                    msg.push_str("Channel password protected.\r\n");
                } else {
                    msg.push_str("Channel no longer password protected.\r\n");
                }
            }
            let password = params.text("password");
            if ch.password != password {
                ch.password = password.clone();
                msg.push_str(&format!("New password: {password}\r\n"));
            }
            let op_password = params.text("oppassword");
            if ch.op_password != op_password {
                ch.op_password = op_password.clone();
                msg.push_str(&format!("New operator password: {op_password}\r\n"));
            }
            let topic = params.text("topic");
            if ch.topic != topic {
                ch.topic = topic.clone();
                msg.push_str(&format!("New topic: {topic}\r\n"));
            }
            let max_users = params.int_or_zero("maxusers");
            if ch.max_users != max_users {
                ch.max_users = max_users;
                msg.push_str(&format!("New maximum users: {max_users}\r\n"));
            }
            let quota = params.int_or_zero("diskquota");
            if ch.disk_quota != quota {
                ch.disk_quota = quota;
                msg.push_str(&format!("New disk quota: {}\r\n", ch.quota_str()));
            }
        }

        let operators = params.list("operators");
        let ops_changed = model
            .channel(cid)
            .map(|ch| ch.operators != operators)
            .unwrap_or(false);
        if ops_changed {
            if let Some(ch) = model.channel_mut(cid) {
                ch.operators = operators.clone();
            }
            msg.push_str(&format!(
                "New operators: {}\r\n",
                operators_str(&model, &operators)
            ));
        }

        if !msg.is_empty() {
            self.logbook
                .buffer_line(&format!("Channel {old_path} updated.\r\n{}", msg.trim_end_matches("\r\n")));
        }
    }

    fn on_remove_channel(&self, params: &Params) {
        let cid = params.int_or_zero("chanid");
        let mut model = self.model.write();
        if model.channel(cid).is_none() {
            drop(model);
            self.logbook.write(
                &format!("Error: failed to remove channel {cid}. Channel doesn't exist."),
                true,
            );
            return;
        }
        let path = model.path(cid);
        model.remove_channel(cid);
        drop(model);
        self.logbook
            .buffer_line(&format!("Channel removed.\r\nChannel path: {path}"));
    }

    // ----- files ----------------------------------------------------------

    fn on_add_file(&self, params: &Params) {
        let cid = params.int_or_zero("chanid");
        let file = File {
            id: params.int_or_zero("fileid"),
            name: params.text("filename"),
            size: params.int_or_zero("filesize"),
            owner: params.text("owner"),
        };
        let name = file.name.clone();
        let owner = file.owner.clone();
        let mut model = self.model.write();
        let added = match model.channel_mut(cid) {
            Some(ch) => ch.add_file(file),
            None => {
                drop(model);
                self.logbook.write(
                    &format!(
                        "Error: failed to add file to channel {cid}. Channel doesn't exist."
                    ),
                    true,
                );
                return;
            }
        };
        if added && !self.in_login() {
            let path = model.path(cid);
            self.logbook.set_account(&owner);
            self.logbook.buffer_line(&format!(
                "File added to {path}.\r\nFilename: {name}\r\nFile owner: {owner}"
            ));
        }
    }

    fn on_remove_file(&self, params: &Params) {
        let cid = params.int_or_zero("chanid");
        let name = params.text("filename");
        let mut model = self.model.write();
        let removed = match model.channel_mut(cid) {
            Some(ch) => ch.remove_file_by_name(&name).is_some(),
            None => {
                drop(model);
                self.logbook.write(
                    &format!(
                        "Error: failed to remove file from channel {cid}. Channel doesn't exist."
                    ),
                    true,
                );
                return;
            }
        };
        if removed {
            let path = model.path(cid);
            self.logbook
                .buffer_line(&format!("File removed from {path}.\r\nFilename: {name}"));
        }
    }

    // ----- users ----------------------------------------------------------

    fn populate_user(params: &Params, user: &mut crate::state::User) {
        user.nickname = params.text("nickname");
        user.username = params.text("username");
        user.sub_remote = params.int_or_zero("subpeer") as u32;
        user.sub_local = params.int_or_zero("sublocal") as u32;
        user.status_mode = params.int_or_zero("statusmode");
        user.status_msg = params.text("statusmsg");
        user.ip = params.text("ipaddr");
        user.version = params.text("version");
        user.client_name = params.text("clientname");
        user.user_type = UserType::from_raw(params.int_or_zero("usertype"));
    }

    /// A user logged in (or is being enumerated during our own login).
    fn on_logged_in(self: &Arc<Self>, params: &Params) {
        let uid = params.int_or_zero("userid");
        let in_login = self.in_login();
        let (conn_msg, extended, sub_msg, status_msg, username) = {
            let mut model = self.model.write();
            model.add_user(uid);
            let Some(user) = model.user_mut(uid) else {
                return;
            };
            if !in_login {
                user.mark_connected();
            }
            Self::populate_user(params, user);

            let mut conn_msg = user.log_name();
            conn_msg.push_str(if in_login { " is" } else { " has" });
            conn_msg.push_str(" connected.\r\n");

            let mut extended = format!("User ID: {uid}\r\n");
            if !user.ip.is_empty() {
                extended.push_str(&format!("IP: {}\r\n", user.ip));
            }
            if !user.version.is_empty() {
                extended.push_str(&format!("Client version: {}\r\n", user.version));
            }
            if !user.client_name.is_empty() {
                extended.push_str(&format!("Client name: {}\r\n", user.client_name));
            }
            if !user.username.is_empty() {
                extended.push_str(&format!("Username: {}\r\n", user.username));
            }
            extended.push_str(&format!("User type: {}\r\n", user.user_type.as_str()));

            let local = flags::subscriptions_str(user.sub_local);
            let remote = flags::subscriptions_str(user.sub_remote);
            let mut sub_msg = String::new();
            if !local.is_empty() && !remote.is_empty() {
                if local == remote {
                    sub_msg
                        .push_str(&format!("Current local and remote subscriptions: {local}\r\n"));
                } else {
                    sub_msg.push_str(&format!("Current local subscriptions: {local}\r\n"));
                    sub_msg.push_str(&format!("Current remote subscriptions: {remote}\r\n"));
                }
            } else {
                if !local.is_empty() {
                    sub_msg.push_str(&format!("Current local subscriptions: {local}\r\n"));
                }
                if !remote.is_empty() {
                    sub_msg.push_str(&format!("Current remote subscriptions: {remote}\r\n"));
                }
            }

            let mut status_msg = String::new();
            let mode = user.status_mode_str();
            if !mode.is_empty() {
                status_msg.push_str(&format!("Current status mode: {mode}\r\n"));
            }
            if !user.status_msg.is_empty() {
                status_msg.push_str(&format!("Current status message: {}\r\n", user.status_msg));
            }

            (conn_msg, extended, sub_msg, status_msg, user.username.clone())
        };

        self.logbook.set_account(&username);
        self.logbook
            .write_files(&format!("{conn_msg}{extended}{sub_msg}{status_msg}"));
        let mut console_msg = conn_msg;
        if self.cfg.display_extended_conn_info {
            console_msg.push_str(&extended);
        }
        if self.cfg.display_subscription_updates {
            console_msg.push_str(&sub_msg);
        }
        if self.cfg.display_status_updates {
            console_msg.push_str(&status_msg);
        }
        self.logbook.console(&console_msg, false, self.in_bracket());

        let session = Arc::clone(self);
        tokio::spawn(session.autosubscribe(uid));
        if !in_login {
            let session = Arc::clone(self);
            tokio::spawn(session.automove(uid));
        }
    }

    fn on_update_user(&self, params: &Params) {
        let uid = params.int_or_zero("userid");
        let (nick_msg, status_msg, sub_local_msg, sub_remote_msg, username) = {
            let mut model = self.model.write();
            let Some(user) = model.user_mut(uid) else {
                return;
            };
            let username = user.username.clone();
            let mut nick = user.log_name();

            let mut nick_msg = String::new();
            let nickname = params.text("nickname");
            if nickname != user.nickname {
                nick_msg.push_str(&format!("{nick} changed nickname"));
                user.nickname = nickname.clone();
                nick = user.log_name();
                if nick != nickname {
                    nick_msg.push_str(&format!(
                        ".\r\nThe nickname to identify this user for logging will be {nick}\r\n"
                    ));
                } else {
                    nick_msg.push_str(&format!(" to {nickname}.\r\n"));
                }
            }

            let mut sub_local_msg = String::new();
            let sub_local = params.int_or_zero("sublocal") as u32;
            if user.sub_local != sub_local {
                let old = user.sub_local;
                user.sub_local = sub_local;
                sub_local_msg.push_str(&format!("{nick}: local subscription change.\r\n"));
                let added = flags::subscriptions_str(subs_added(sub_local, old));
                if !added.is_empty() {
                    sub_local_msg.push_str(&format!("Subscriptions added: {added}\r\n"));
                }
                let removed = flags::subscriptions_str(subs_removed(sub_local, old));
                if !removed.is_empty() {
                    sub_local_msg.push_str(&format!("Subscriptions removed: {removed}\r\n"));
                }
            }

            let mut sub_remote_msg = String::new();
            let sub_remote = params.int_or_zero("subpeer") as u32;
            if user.sub_remote != sub_remote {
                let old = user.sub_remote;
                user.sub_remote = sub_remote;
                sub_remote_msg.push_str(&format!("{nick}: remote subscription change.\r\n"));
                let added = flags::subscriptions_str(subs_added(sub_remote, old));
                if !added.is_empty() {
                    sub_remote_msg.push_str(&format!("Subscriptions added: {added}\r\n"));
                }
                let removed = flags::subscriptions_str(subs_removed(sub_remote, old));
                if !removed.is_empty() {
                    sub_remote_msg.push_str(&format!("Subscriptions removed: {removed}\r\n"));
                }
            }

            let mut status_msg = String::new();
            let mode = params.int_or_zero("statusmode");
            let message = params.text("statusmsg");
            if user.status_mode != mode || user.status_msg != message {
                let old_mode_str = user.status_mode_str();
                let old_message = user.status_msg.clone();
                user.status_mode = mode;
                user.status_msg = message.clone();
                let mode_str = user.status_mode_str();
                if old_mode_str != mode_str {
                    status_msg.push_str(&format!("Mode: {mode_str}\r\n"));
                }
                if old_message != message {
                    if !message.is_empty() {
                        status_msg.push_str(&format!("Message: {message}\r\n"));
                    } else {
                        status_msg.push_str("No status message provided.\r\n");
                    }
                }
                if !status_msg.is_empty() {
                    status_msg = format!("{nick}: status change.\r\n{status_msg}");
                }
            }

            (nick_msg, status_msg, sub_local_msg, sub_remote_msg, username)
        };

        self.logbook.set_account(&username);
        self.logbook.write_files(&format!(
            "{nick_msg}{status_msg}{sub_local_msg}{sub_remote_msg}"
        ));
        let mut console_msg = nick_msg;
        if self.cfg.display_subscription_updates {
            console_msg.push_str(&sub_local_msg);
            console_msg.push_str(&sub_remote_msg);
        }
        if self.cfg.display_status_updates {
            console_msg.push_str(&status_msg);
        }
        if !console_msg.is_empty() {
            self.logbook.console(&console_msg, false, self.in_bracket());
        }
    }

    /// A user appeared in a channel. Creates the user when this is the
    /// first sighting (servers without VIEW_ALL_USERS rights skip
    /// `loggedin`).
    fn on_add_user(self: &Arc<Self>, params: &Params) {
        let uid = params.int_or_zero("userid");
        let cid = params.int_or_zero("chanid");
        let in_login = self.in_login();
        let (nick, username, attach) = {
            let mut model = self.model.write();
            if model.user(uid).is_none() {
                model.add_user(uid);
                if let Some(user) = model.user_mut(uid) {
                    Self::populate_user(params, user);
                }
            }
            let Some(user) = model.user(uid) else { return };
            let nick = user.log_name();
            let username = user.username.clone();
            if model.channel(cid).is_none() {
                drop(model);
                self.logbook.write(
                    &format!(
                        "Error: failed to add {nick} to channel {cid}. Channel doesn't exist."
                    ),
                    true,
                );
                return;
            }
            let path = model.path(cid);
            let attached = model.attach_user(uid, cid);
            (nick, username, attached.then_some(path))
        };
        self.logbook.set_account(&username);
        if let Some(path) = attach {
            let verb = if in_login { "is in" } else { "has joined" };
            self.logbook.buffer_line(&format!("{nick} {verb} {path}"));
        }
        let session = Arc::clone(self);
        tokio::spawn(session.automove(uid));
    }

    /// The bot itself entered a channel.
    fn on_joined(&self, params: &Params) {
        self.set_kicked(false);
        let cid = params.int_or_zero("chanid");
        let uid = self.uid();
        let (path, nick, username, attached) = {
            let mut model = self.model.write();
            if model.channel(cid).is_none() {
                drop(model);
                self.logbook.write(
                    &format!("Error: failed to join channel {cid}. Channel doesn't exist."),
                    true,
                );
                return;
            }
            let Some(user) = model.user(uid) else { return };
            let nick = user.log_name();
            let username = user.username.clone();
            let path = model.path(cid);
            let attached = model.attach_user(uid, cid);
            (path, nick, username, attached)
        };
        if attached {
            self.logbook.console(&format!("Entered {path}"), false, false);
            self.logbook.set_account(&username);
            self.logbook.write_files(&format!("{nick} has joined {path}"));
        }
    }

    /// The bot itself left a channel.
    fn on_left(&self, params: &Params) {
        let cid = params.int_or_zero("chanid");
        let uid = self.uid();
        let (path, nick, username, detached) = {
            let mut model = self.model.write();
            if model.channel(cid).is_none() {
                drop(model);
                self.logbook.write(
                    &format!("Error: failed to leave channel {cid}. Channel doesn't exist."),
                    true,
                );
                return;
            }
            let Some(user) = model.user(uid) else { return };
            let nick = user.log_name();
            let username = user.username.clone();
            let path = model.path(cid);
            let detached = model.detach_user(uid, cid);
            (path, nick, username, detached)
        };
        if detached {
            self.logbook.console(&format!("Left {path}"), false, false);
            self.logbook.set_account(&username);
            self.logbook.write_files(&format!("{nick} has left {path}"));
        }
    }

    /// A user left a channel; the user record itself survives.
    fn on_remove_user(&self, params: &Params) {
        let uid = params.int_or_zero("userid");
        let cid = params.int_or_zero("chanid");
        let (nick, username, detached) = {
            let mut model = self.model.write();
            let Some(user) = model.user(uid) else { return };
            let nick = user.log_name();
            let username = user.username.clone();
            if model.channel(cid).is_none() {
                drop(model);
                self.logbook.write(
                    &format!(
                        "Error: failed to remove {nick} from channel, {cid}. The channel \
                         doesn't exist."
                    ),
                    true,
                );
                return;
            }
            let path = model.path(cid);
            let detached = model.detach_user(uid, cid).then_some(path);
            (nick, username, detached)
        };
        self.logbook.set_account(&username);
        if let Some(path) = detached {
            self.logbook.buffer_line(&format!("{nick} has left {path}"));
        }
    }

    /// Global logout. Without a userid the server ended this session;
    /// with one, a peer disconnected.
    fn on_logged_out(&self, params: &Params) -> Flow {
        if params.is_empty() {
            self.logbook.write("Logged out.", true);
            self.model.write().clear();
            return Flow::ForcedLogout;
        }
        let uid = params.int_or_zero("userid");
        let (msg, username) = {
            let mut model = self.model.write();
            let Some(user) = model.user(uid) else {
                return Flow::Continue;
            };
            let nick = user.log_name();
            let username = user.username.clone();
            let mut msg = format!("{nick} has disconnected");
            match user.connected_for() {
                Some(duration) => {
                    msg.push_str(&format!(", and was connected for {}", duration_str(duration)));
                }
                None => msg.push_str(". Connection time unknown"),
            }
            model.remove_user(uid);
            (msg, username)
        };
        self.logbook.set_account(&username);
        self.logbook.buffer_line(&format!("{msg}."));
        Flow::Continue
    }

    fn on_kicked(&self, params: &Params) {
        let kicker = params.int_or_zero("kickerid");
        let (nick, username) = {
            let model = self.model.read();
            match model.user(kicker) {
                Some(user) => (user.log_name(), user.username.clone()),
                None => (format!("#{kicker}"), String::new()),
            }
        };
        self.logbook.set_account(&username);
        let channel = params
            .int("chanid")
            .filter(|cid| self.model.read().channel(*cid).is_some());
        match channel {
            None => {
                self.logbook
                    .write(&format!("Kicked from server by {nick}."), true);
                self.set_kicked(true);
                self.set_state(SessionState::Kicked);
            }
            Some(cid) => {
                let path = self.model.read().path(cid);
                self.logbook
                    .write(&format!("Kicked from {path} by {nick}."), false);
            }
        }
    }

    // ----- admin tables ---------------------------------------------------

    fn on_user_account(&self, params: &Params) {
        let username = params.text("username");
        let mut row = BTreeMap::new();
        row.insert("password".to_string(), params.text("password"));
        row.insert(
            "usertype".to_string(),
            UserType::from_raw(params.int_or_zero("usertype"))
                .as_str()
                .to_string(),
        );
        row.insert(
            "userrights".to_string(),
            flags::user_rights_str(params.int_or_zero("userrights") as u32),
        );
        self.accounts_cached.lock().insert(username, row);
    }

    fn on_user_banned(&self, mut params: Params) {
        let Some(ip) = params.remove("ipaddr") else {
            return;
        };
        let row: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.bans_cached.lock().insert(ip, row);
    }

    // ----- messaging ------------------------------------------------------

    fn on_message_deliver(&self, params: &Params) {
        self.message_info(
            params.int_or_zero("type"),
            params.int_or_zero("srcuserid"),
            params.int_or_zero("destuserid"),
            params.int_or_zero("chanid"),
            &params.text("content"),
        );
    }

    /// Route one text message to the console, the server log, and the
    /// per-account logs of its endpoints. Suppressed inside command
    /// brackets; messages echoed there are replays, not fresh traffic.
    pub(crate) fn message_info(
        &self,
        kind: i64,
        src: crate::state::UserId,
        dest: crate::state::UserId,
        cid: crate::state::ChannelId,
        content: &str,
    ) {
        if self.in_bracket() {
            return;
        }
        let kind_str = flags::message_type_str(kind);
        let own = self.uid();
        let model = self.model.read();
        let lookup = |uid: crate::state::UserId| -> (String, String) {
            match model.user(uid) {
                Some(user) => (user.log_name(), user.username.clone()),
                None => (format!("#{uid}"), String::new()),
            }
        };
        let (src_nick, src_username) = lookup(src);

        match kind {
            t if t == flags::msg::BROADCAST => {
                let log_to = format!("{kind_str} message sent.\r\n{content}");
                if own == src {
                    self.logbook.set_account(&src_username);
                    self.logbook.write_files(&format!("{src_nick}: {log_to}"));
                    self.logbook.console(&log_to, true, false);
                } else {
                    let log_from =
                        format!("{kind_str} message received from {src_nick}:\r\n{content}");
                    self.logbook.write(&log_from, true);
                    self.logbook.set_account(&src_username);
                    self.logbook
                        .write_account_only(&format!("{src_nick}: {log_to}"));
                }
            }
            t if t == flags::msg::CHANNEL => {
                let path = model.path(cid);
                let own_channel = model.user(own).and_then(|u| u.channel);
                if own == src {
                    let log_to = if own_channel == Some(cid) {
                        format!("{kind_str} message sent.\r\n{content}")
                    } else {
                        format!("{kind_str} message sent to {path}:\r\n{content}")
                    };
                    self.logbook.set_account(&src_username);
                    self.logbook.write_files(&format!("{src_nick}: {log_to}"));
                    self.logbook.console(&log_to, false, false);
                } else {
                    let log_from = if own_channel == Some(cid) {
                        format!("{kind_str} message received from {src_nick}:\r\n{content}")
                    } else {
                        format!(
                            "{kind_str} message received from {src_nick} to {path}:\r\n{content}"
                        )
                    };
                    self.logbook.write(&log_from, false);
                    self.logbook.set_account(&src_username);
                    self.logbook.write_account_only(&format!(
                        "{src_nick}: {kind_str} message sent to {path}:\r\n{content}"
                    ));
                }
            }
            t if t == flags::msg::USER || t == flags::msg::CUSTOM => {
                let (dest_nick, dest_username) = lookup(dest);
                let log_to = format!("{kind_str} message sent to {dest_nick}:\r\n{content}");
                let log_from = format!("{kind_str} message received from {src_nick}:\r\n{content}");
                if dest == own || src == own {
                    // one endpoint is the bot
                    let console_line = if dest == own { &log_from } else { &log_to };
                    self.logbook.console(console_line, true, false);
                    self.logbook.set_account(&src_username);
                    self.logbook.write_files(&format!("{src_nick}: {log_to}"));
                    if src_username != dest_username {
                        self.logbook.set_account(&dest_username);
                        self.logbook
                            .write_account_only(&format!("{dest_nick}: {log_from}"));
                    }
                } else {
                    // intercepted private traffic between two other users
                    let log_intercept = format!(
                        "{kind_str} message from {src_nick} to {dest_nick}:\r\n{content}"
                    );
                    if src_username == dest_username {
                        self.logbook.set_account(&src_username);
                        self.logbook.write_files(&format!("{src_nick}: {log_to}"));
                        self.logbook.console(&log_intercept, false, false);
                    } else {
                        self.logbook.set_account(&src_username);
                        self.logbook
                            .write_account_only(&format!("{src_nick}: {log_to}"));
                        self.logbook.set_account(&dest_username);
                        self.logbook
                            .write_account_only(&format!("{dest_nick}: {log_from}"));
                        self.logbook.write(&log_intercept, false);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Comma-separated operator nicknames; empty when any id is unknown.
fn operators_str(model: &crate::state::Model, operators: &[crate::state::UserId]) -> String {
    let mut names = Vec::with_capacity(operators.len());
    for uid in operators {
        match model.user(*uid) {
            Some(user) => names.push(user.log_name()),
            None => return String::new(),
        }
    }
    names.join(", ")
}
