//! Autonomous policy actions: auto-subscribe and auto-move.

use super::Session;
use crate::flags;
use crate::state::{ChannelId, UserId, subs_added, subs_removed};
use std::sync::Arc;
use std::time::Duration;

/// Grace period before moving a user the server has not placed yet.
const UNPLACED_GRACE: Duration = Duration::from_millis(500);

impl Session {
    /// Drive a newly observed user's local subscriptions toward the
    /// configured mask. Model state is only updated when the matching
    /// `updateuser` arrives.
    pub(crate) async fn autosubscribe(self: Arc<Self>, uid: UserId) {
        let target = self.cfg.automatic.subscriptions;
        if target == 0 {
            return;
        }
        let Some(before) = self.model.read().user(uid).map(|u| u.sub_local) else {
            return;
        };
        if before == target {
            return;
        }
        if self.cmd_change_subscriptions(uid, target).await.is_err() {
            return;
        }
        if !self.cfg.display_subscription_updates || uid == self.uid() {
            return;
        }
        // Echo what changed, if the confirming update already landed.
        let (after, nick) = {
            let model = self.model.read();
            match model.user(uid) {
                Some(user) => (user.sub_local, user.log_name()),
                None => return,
            }
        };
        if after == before {
            return;
        }
        let mut msg = String::new();
        let added = flags::subscriptions_str(subs_added(after, before));
        if !added.is_empty() {
            msg.push_str(&format!("Subscriptions added: {added}\r\n"));
        }
        let removed = flags::subscriptions_str(subs_removed(after, before));
        if !removed.is_empty() {
            msg.push_str(&format!("Subscriptions removed: {removed}\r\n"));
        }
        if !msg.is_empty() {
            self.logbook.console(
                &format!("{nick}: local subscription change.\r\n{msg}"),
                false,
                false,
            );
        }
    }

    /// Copy the configured auto-move endpoints into the runtime slots if
    /// they have not been set (or cleared) yet.
    fn automove_config(&self) {
        let mut rt = self.runtime.lock();
        if rt.auto_from == 0 && rt.cfg_from != 0 {
            rt.auto_from = rt.cfg_from;
        }
        if rt.auto_to == 0 && rt.cfg_to != 0 {
            rt.auto_to = rt.cfg_to;
        }
    }

    fn automove_endpoints(&self) -> (ChannelId, ChannelId) {
        self.automove_config();
        let rt = self.runtime.lock();
        (rt.auto_from, rt.auto_to)
    }

    /// Disable auto-move entirely, runtime and configured copies both.
    fn automove_clear(&self) {
        let mut rt = self.runtime.lock();
        rt.auto_from = 0;
        rt.auto_to = 0;
        rt.cfg_from = 0;
        rt.cfg_to = 0;
    }

    /// Whether auto-move is active. A source without a destination is
    /// invalid and clears the policy.
    pub(crate) fn automove_enabled(&self) -> bool {
        let (from, to) = self.automove_endpoints();
        if to != 0 {
            return true;
        }
        if from != 0 {
            self.logbook.write(
                "Incorrect automove settings found. Disabling automatic user moving.",
                true,
            );
            self.automove_clear();
        }
        false
    }

    /// Apply the auto-move policy to one observed user. The bot never
    /// moves itself.
    pub(crate) async fn automove(self: Arc<Self>, uid: UserId) {
        if uid == self.uid() {
            return;
        }
        let (from, to) = self.automove_endpoints();
        if from == 0 && to == 0 {
            return;
        }
        if to == 0 {
            self.logbook.write(
                "Incorrect automove settings found. Disabling automatic user moving.",
                true,
            );
            self.automove_clear();
            return;
        }
        let (user_type, rights) = self.rights_snapshot();
        if !flags::has_right(rights, user_type, flags::right::MOVE_USERS) {
            self.logbook.write(
                "Insufficient user rights. Disabling automatic user moving.",
                true,
            );
            self.automove_clear();
            return;
        }

        let (dest_path, nick, current) = {
            let model = self.model.read();
            let dest_path = model.channel(to).map(|_| model.path(to));
            let nick = model
                .user(uid)
                .map(|u| u.log_name())
                .unwrap_or_else(|| format!("#{uid}"));
            let current = model.user(uid).and_then(|u| u.channel);
            (dest_path, nick, current)
        };
        let Some(dest_path) = dest_path else {
            self.logbook.write(
                "Unable to find destination channel. Disabling automatic moving.",
                true,
            );
            self.automove_clear();
            return;
        };

        if from == 0 {
            // destination-only mode: catch users the server leaves unplaced
            if current.is_some() {
                return;
            }
            tokio::time::sleep(UNPLACED_GRACE).await;
            let current = self.model.read().user(uid).and_then(|u| u.channel);
            if current.is_some() {
                return;
            }
            if self.cmd_move_user(uid, to).await.is_err() {
                self.logbook
                    .console(&format!("Automatic user move for {nick} failed."), true, false);
                return;
            }
            self.logbook.console(
                &format!("{nick} automatically moved to {dest_path}"),
                false,
                false,
            );
            return;
        }

        // source and destination mode
        let src_path = {
            let model = self.model.read();
            model.channel(from).map(|_| model.path(from))
        };
        let Some(src_path) = src_path else {
            self.logbook.write(
                "Unable to find source channel. Disabling automatic moving.",
                true,
            );
            self.automove_clear();
            return;
        };
        if from == to {
            self.logbook.write(
                "Source and destination channels are the same. Disabling automatic moving.",
                true,
            );
            self.automove_clear();
            return;
        }
        if current == Some(to) || current != Some(from) {
            return;
        }
        if self.cmd_move_user(uid, to).await.is_err() {
            self.logbook
                .console(&format!("Automatic user move for {nick} failed."), true, false);
            return;
        }
        self.logbook.console(
            &format!("{nick} automatically moved from {src_path} to {dest_path}"),
            false,
            false,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Automatic, ServerConfig};
    use crate::session::GlobalSettings;

    fn session_with(automatic: Automatic) -> Session {
        let cfg = ServerConfig {
            name: "policysrv".into(),
            host: "127.0.0.1".into(),
            port: "10333".into(),
            automatic,
            ..ServerConfig::default()
        };
        let global = GlobalSettings {
            working_dir: std::env::temp_dir(),
            ..GlobalSettings::default()
        };
        Session::new(cfg, &global)
    }

    #[test]
    fn destination_only_is_enabled() {
        let session = session_with(Automatic {
            move_to: 5,
            ..Automatic::default()
        });
        assert!(session.automove_enabled());
    }

    #[test]
    fn source_without_destination_clears_itself() {
        let session = session_with(Automatic {
            move_from: 3,
            ..Automatic::default()
        });
        assert!(!session.automove_enabled());
        // the configured copies are gone too; re-checking stays disabled
        assert!(!session.automove_enabled());
        let rt = {
            let guard = session.runtime.lock();
            (guard.cfg_from, guard.cfg_to)
        };
        assert_eq!(rt, (0, 0));
    }

    #[test]
    fn fully_configured_is_enabled() {
        let session = session_with(Automatic {
            move_from: 3,
            move_to: 5,
            ..Automatic::default()
        });
        assert!(session.automove_enabled());
    }

    #[test]
    fn unconfigured_is_disabled_quietly() {
        let session = session_with(Automatic::default());
        assert!(!session.automove_enabled());
    }
}
