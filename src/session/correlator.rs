//! Request/response correlation.
//!
//! Outgoing commands carry `id=<n>`; the server brackets each command's
//! effects with `begin id=<n>` … `end id=<n>`. Ids 1–3 are reserved for
//! login and the admin listings; everything else allocates from a
//! monotonically increasing per-session counter. Only one command is
//! outstanding at a time: the command lane serializes senders, and a
//! single-slot handoff hands the bracket outcome back to the waiter.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::oneshot;

pub const CMD_NONE: i64 = 0;
pub const CMD_LOGIN: i64 = 1;
pub const CMD_LIST_ACCOUNTS: i64 = 2;
pub const CMD_LIST_BANS: i64 = 3;
pub const CMD_MIN_ID: i64 = 4;

/// Outcome of one bracket: `Err` carries the recorded server error text.
pub type Outcome = Result<(), String>;

pub struct Correlator {
    /// Serializes outbound requests; held for send → wait → receive.
    lane: tokio::sync::Mutex<()>,
    /// The single waiter slot, filled while a command is outstanding.
    pending: Mutex<Option<oneshot::Sender<Outcome>>>,
    next_id: AtomicI64,
    /// Id of the currently open bracket, `CMD_NONE` outside one.
    bracket: AtomicI64,
    error: Mutex<Option<String>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            lane: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            next_id: AtomicI64::new(CMD_MIN_ID),
            bracket: AtomicI64::new(CMD_NONE),
            error: Mutex::new(None),
        }
    }

    /// Reset per-session state for a fresh connection.
    pub fn reset(&self) {
        self.next_id.store(CMD_MIN_ID, Ordering::SeqCst);
        self.bracket.store(CMD_NONE, Ordering::SeqCst);
        self.error.lock().take();
        self.release(CommandAbort::Disconnected);
    }

    pub fn lane(&self) -> &tokio::sync::Mutex<()> {
        &self.lane
    }

    /// Allocate the next non-reserved command id.
    pub fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register the waiter for the command about to be sent. The lane must
    /// be held.
    pub fn register_waiter(&self) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);
        rx
    }

    /// Drop the waiter slot without completing it (send failed, timed out).
    pub fn clear_waiter(&self) {
        self.pending.lock().take();
    }

    /// Id of the open bracket, `CMD_NONE` when outside one.
    pub fn bracket_id(&self) -> i64 {
        self.bracket.load(Ordering::SeqCst)
    }

    /// True while the initial login bracket is open; used to keep the
    /// enumeration that follows `login` silent.
    pub fn in_login(&self) -> bool {
        self.bracket_id() == CMD_LOGIN
    }

    pub fn on_begin(&self, id: i64) {
        if id != CMD_NONE {
            self.bracket.store(id, Ordering::SeqCst);
        }
    }

    pub fn on_error(&self, message: String) {
        if !message.is_empty() {
            *self.error.lock() = Some(message);
        }
    }

    pub fn on_ok(&self) {
        self.error.lock().take();
    }

    /// Close the bracket and release the waiter, if any. Returns the
    /// bracket outcome so the dispatcher can react to reserved ids.
    pub fn on_end(&self) -> Outcome {
        self.bracket.store(CMD_NONE, Ordering::SeqCst);
        let outcome = match self.error.lock().take() {
            Some(message) => Err(message),
            None => Ok(()),
        };
        if let Some(waiter) = self.pending.lock().take() {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    /// Release a blocked waiter on connection teardown.
    pub fn release(&self, _reason: CommandAbort) {
        // dropping the sender wakes the waiter with a channel-closed error
        self.pending.lock().take();
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a waiter was released without a bracket outcome.
#[derive(Debug, Clone, Copy)]
pub enum CommandAbort {
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_above_reserved_and_increase() {
        let c = Correlator::new();
        let first = c.allocate_id();
        let second = c.allocate_id();
        assert!(first > CMD_LIST_BANS);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn reset_restarts_the_counter() {
        let c = Correlator::new();
        c.allocate_id();
        c.allocate_id();
        c.reset();
        assert_eq!(c.allocate_id(), CMD_MIN_ID + 1);
    }

    #[tokio::test]
    async fn end_without_error_releases_ok() {
        let c = Correlator::new();
        let rx = c.register_waiter();
        c.on_begin(5);
        assert_eq!(c.bracket_id(), 5);
        c.on_end();
        assert_eq!(c.bracket_id(), CMD_NONE);
        assert_eq!(rx.await.expect("outcome"), Ok(()));
    }

    #[tokio::test]
    async fn recorded_error_reaches_the_waiter() {
        let c = Correlator::new();
        let rx = c.register_waiter();
        c.on_begin(5);
        c.on_error("Invalid channel".into());
        c.on_end();
        assert_eq!(rx.await.expect("outcome"), Err("Invalid channel".into()));
    }

    #[tokio::test]
    async fn ok_clears_a_recorded_error() {
        let c = Correlator::new();
        let rx = c.register_waiter();
        c.on_begin(5);
        c.on_error("transient".into());
        c.on_ok();
        c.on_end();
        assert_eq!(rx.await.expect("outcome"), Ok(()));
    }

    #[tokio::test]
    async fn release_wakes_waiter_with_closed_channel() {
        let c = Correlator::new();
        let rx = c.register_waiter();
        c.release(CommandAbort::Disconnected);
        assert!(rx.await.is_err());
    }

    #[test]
    fn login_window_tracks_bracket_one() {
        let c = Correlator::new();
        assert!(!c.in_login());
        c.on_begin(CMD_LOGIN);
        assert!(c.in_login());
        c.on_end();
        assert!(!c.in_login());
    }
}
