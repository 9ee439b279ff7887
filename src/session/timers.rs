//! Keepalive and event-check tickers.
//!
//! Each timer owns a stop channel; re-arming fires the previous task's
//! stop before starting the replacement, so at most one ticker of each
//! kind runs per session.

use super::Session;
use crate::flags::{self, UserType};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Cadence of the admin table listing pass, in seconds.
pub const CHECK_EVENTS_SECS: i64 = 10;

/// Half of `secs` in milliseconds, with a 200 ms floor. A zero or missing
/// timeout ticks at the floor.
pub fn tick_millis(secs: i64) -> u64 {
    let ms = if secs <= 0 { 400 } else { secs as u64 * 1000 };
    (ms / 2).max(200)
}

/// Holder for one ticker task's stop handle.
#[derive(Default)]
pub struct TimerSlot {
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl TimerSlot {
    /// Stop the running ticker, if any.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }

    fn replace(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Some(prev) = self.stop.lock().replace(tx) {
            let _ = prev.send(());
        }
        rx
    }
}

impl Session {
    /// (Re)arm the keepalive ticker for the given server user-timeout.
    pub fn arm_keepalive(self: &Arc<Self>, secs: i64) {
        self.set_user_timeout(secs);
        let period = Duration::from_millis(tick_millis(secs));
        let mut stop = self.keepalive.replace();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = session.cmd_ping().await {
                            debug!(server = %session.display_name(), error = %e, "keepalive ping failed");
                        }
                    }
                    _ = &mut stop => return,
                }
            }
        });
    }

    /// Start the periodic admin listing pass. Only armed after a
    /// successful login.
    pub fn arm_check_events(self: &Arc<Self>, secs: i64) {
        let period = Duration::from_millis(tick_millis(secs));
        let mut stop = self.check_events.replace();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let (user_type, rights) = session.rights_snapshot();
                        if user_type == UserType::Admin {
                            let _ = session.cmd_list_accounts().await;
                        }
                        if flags::has_right(rights, user_type, flags::right::BAN_USERS) {
                            let _ = session.cmd_list_bans().await;
                        }
                    }
                    _ = &mut stop => return,
                }
            }
        });
    }

    /// Stop both tickers. Safe to call repeatedly.
    pub fn stop_timers(&self) {
        self.keepalive.stop();
        self.check_events.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_half_the_timeout() {
        assert_eq!(tick_millis(60), 30_000);
        assert_eq!(tick_millis(10), 5_000);
    }

    #[test]
    fn tick_floor_is_200ms() {
        assert_eq!(tick_millis(0), 200);
        assert_eq!(tick_millis(-1), 200);
    }

    #[test]
    fn replacing_a_slot_stops_the_previous_task() {
        let slot = TimerSlot::default();
        let mut first = slot.replace();
        let _second = slot.replace();
        assert!(first.try_recv().is_ok());
    }

    #[test]
    fn stop_is_idempotent() {
        let slot = TimerSlot::default();
        let _rx = slot.replace();
        slot.stop();
        slot.stop();
    }
}
