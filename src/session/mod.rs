//! Per-server protocol engine.
//!
//! One [`Session`] owns the TCP connection to a remote server, the mirrored
//! entity model, the command correlator, and the keepalive/event-check
//! timers. The session task runs the dispatcher read loop and drives the
//! lifecycle state machine:
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED → LOGGING_IN → LOGGED_IN
//!        ↑                                                  │
//!        └──────── reconnect policy ← DISCONNECTING ←───────┘
//! ```

pub mod correlator;
mod commands;
mod dispatcher;
mod policy;
mod timers;

pub use correlator::Correlator;
pub use timers::CHECK_EVENTS_SECS;

use crate::config::ServerConfig;
use crate::error::{CommandError, ConnectError};
use crate::flags::UserType;
use crate::logbook::{LogSettings, Logbook};
use crate::proto::Frame;
use crate::proto::transport::{self, LineReader, LineWriter};
use crate::state::admin::Table;
use crate::state::{ChannelId, Model, UserId};
use parking_lot::{Mutex, RwLock};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use timers::TimerSlot;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Process-wide settings a session inherits from the top-level config.
#[derive(Debug, Clone, Default)]
pub struct GlobalSettings {
    pub nickname: Option<String>,
    pub display_timestamp: bool,
    pub working_dir: PathBuf,
}

/// Remote-reported identity of the server, for status displays.
#[derive(Debug, Clone, Default)]
pub struct RemoteInfo {
    pub name: String,
    pub protocol: String,
    pub version: String,
    pub motd: String,
    pub max_users: i64,
    pub user_timeout: i64,
}

/// Lifecycle states of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    LoggingIn,
    LoggedIn,
    Disconnecting,
    Kicked,
}

/// Why the dispatcher loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Read failure or EOF.
    Lost,
    /// `loggedout` without a userid: the server ended this login.
    ForcedLogout,
    Shutdown,
}

/// Mutable per-session runtime state, guarded by one mutex.
#[derive(Debug, Default)]
struct Runtime {
    state: SessionState,
    /// Last known remote address, cached across reconnects.
    ip: String,
    uid: UserId,
    rights: u32,
    user_type: UserType,
    logged_in: bool,
    kicked: bool,
    server_name: String,
    protocol: String,
    motd: String,
    version: String,
    max_users: i64,
    user_timeout: i64,
    /// Runtime copies of the auto-move endpoints; cleared when the policy
    /// invalidates itself.
    auto_from: ChannelId,
    auto_to: ChannelId,
    /// Configured copies, consulted lazily by `automove_config`.
    cfg_from: ChannelId,
    cfg_to: ChannelId,
}

pub struct Session {
    pub(crate) cfg: ServerConfig,
    global_nickname: Option<String>,
    pub logbook: Logbook,
    pub model: RwLock<Model>,
    runtime: Mutex<Runtime>,
    pub(crate) correlator: Correlator,
    writer: tokio::sync::Mutex<Option<LineWriter>>,
    connected: AtomicBool,
    keepalive: TimerSlot,
    check_events: TimerSlot,
    pub(crate) accounts: Mutex<Option<Table>>,
    pub(crate) accounts_cached: Mutex<Table>,
    pub(crate) bans: Mutex<Option<Table>>,
    pub(crate) bans_cached: Mutex<Table>,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    pub fn new(cfg: ServerConfig, global: &GlobalSettings) -> Self {
        let settings = LogSettings {
            display_name: cfg.name.clone(),
            log_events: cfg.log_server_events,
            log_events_account: cfg.log_server_events_account,
            display_events: cfg.display_server_events,
            beep_on_critical: cfg.beep_on_critical,
            display_timestamp: global.display_timestamp,
            root: LogSettings::log_root(&global.working_dir, &cfg.name),
        };
        let (shutdown_tx, _) = watch::channel(false);
        let runtime = Runtime {
            cfg_from: cfg.automatic.move_from,
            cfg_to: cfg.automatic.move_to,
            ..Runtime::default()
        };
        Self {
            global_nickname: global.nickname.clone(),
            logbook: Logbook::new(settings),
            model: RwLock::new(Model::new()),
            runtime: Mutex::new(runtime),
            correlator: Correlator::new(),
            writer: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            keepalive: TimerSlot::default(),
            check_events: TimerSlot::default(),
            accounts: Mutex::new(None),
            accounts_cached: Mutex::new(Table::new()),
            bans: Mutex::new(None),
            bans_cached: Mutex::new(Table::new()),
            shutdown_tx,
            cfg,
        }
    }

    // ----- lifecycle ------------------------------------------------------

    /// Run the session until it permanently disconnects or is shut down.
    /// This is the dispatcher task; everything else the session spawns is
    /// subordinate to it.
    pub async fn run(self: Arc<Self>) {
        let mut reader = match self.connect().await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(server = %self.display_name(), error = %e, "connection failure");
                if self.cfg.debug {
                    self.logbook.write(
                        &format!(
                            "Error connecting to {}:{}: {e}.\r\nConnection failure.",
                            self.cfg.host, self.cfg.port
                        ),
                        true,
                    );
                }
                self.set_state(SessionState::Disconnected);
                return;
            }
        };
        loop {
            let flow = self.drive(&mut reader).await;
            self.teardown().await;
            if flow == Flow::Shutdown || self.is_shutdown() {
                break;
            }
            let kicked = self.runtime.lock().kicked;
            let retry = if kicked {
                self.cfg.auto_connect_on_kick
            } else {
                self.cfg.auto_connect_on_disconnect
            };
            if !retry {
                break;
            }
            match self.reconnect().await {
                Some(next) => reader = next,
                None => break,
            }
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Resolve (IPv6 first, IPv4 fallback), dial with the connect timeout,
    /// and prepare per-connection state.
    async fn connect(&self) -> Result<LineReader, ConnectError> {
        self.set_state(SessionState::Connecting);
        let port = self
            .cfg
            .port_number()
            .ok_or_else(|| ConnectError::NoAddress(self.cfg.host.clone()))?;
        let cached = self.runtime.lock().ip.clone();
        let ip = match cached.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => transport::resolve(&self.cfg.host, port).await?,
        };
        let (reader, writer, peer) = transport::dial(SocketAddr::new(ip, port)).await?;

        self.init_vars();
        self.correlator.reset();
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        {
            let mut rt = self.runtime.lock();
            rt.state = SessionState::Connected;
            rt.kicked = false;
            rt.user_timeout = -1;
            rt.ip = peer.ip().to_string();
        }
        if !cached.is_empty() && cached != peer.ip().to_string() {
            self.logbook.write(
                &format!("Warning: Connected to {}, but resolved to {cached}.", peer.ip()),
                true,
            );
        }
        info!(server = %self.display_name(), peer = %peer, "connected");
        self.logbook.write("Connected.", true);
        Ok(reader)
    }

    /// Reconnect loop: retry without delay until success or shutdown.
    async fn reconnect(&self) -> Option<LineReader> {
        loop {
            if self.is_shutdown() {
                return None;
            }
            match self.connect().await {
                Ok(reader) => return Some(reader),
                Err(e) => {
                    debug!(server = %self.display_name(), error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Discard per-connection mirrored state. The model is rebuilt from
    /// the enumeration that follows the next login.
    fn init_vars(&self) {
        self.logbook.reset();
        self.model.write().clear();
        let mut rt = self.runtime.lock();
        rt.logged_in = false;
        rt.uid = 0;
        rt.rights = 0;
        rt.user_type = UserType::None;
    }

    /// Dispatcher read loop for one connection epoch.
    async fn drive(self: &Arc<Self>, reader: &mut LineReader) -> Flow {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return Flow::Shutdown,
                line = reader.read_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => return Flow::Lost,
                        Err(e) => {
                            if !self.is_shutdown() {
                                debug!(server = %self.display_name(), error = %e, "read failed");
                            }
                            return Flow::Lost;
                        }
                    };
                    if self.cfg.debug {
                        debug!(server = %self.display_name(),
                            raw = %line.trim_end_matches(['\r', '\n']), "received");
                    }
                    let Some(frame) = Frame::parse(&line) else { continue };
                    self.logbook.reset();
                    let flow = self.handle_frame(frame, line.trim_end_matches(['\r', '\n']));
                    self.logbook
                        .flush_buffer(self.correlator.bracket_id() != correlator::CMD_NONE);
                    if flow != Flow::Continue {
                        return flow;
                    }
                }
            }
        }
    }

    /// Tear down the current connection epoch: stop timers, drop the
    /// writer, release any blocked command waiter.
    async fn teardown(&self) {
        self.set_state(SessionState::Disconnecting);
        self.stop_timers();
        *self.writer.lock().await = None;
        self.correlator.release(correlator::CommandAbort::Disconnected);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        {
            let mut rt = self.runtime.lock();
            rt.logged_in = false;
            rt.state = SessionState::Disconnected;
        }
        if was_connected {
            self.logbook.reset();
            self.logbook.write("Disconnected.", true);
        }
    }

    /// Idempotent external shutdown: flips the flag, sends `quit`, and
    /// lets the dispatcher task unwind.
    pub async fn shutdown(&self) {
        if self.is_shutdown() {
            return;
        }
        self.shutdown_tx.send_replace(true);
        if self.connected.load(Ordering::SeqCst) {
            let _lane = self.correlator.lane().lock().await;
            if let Some(writer) = self.writer.lock().await.as_mut() {
                let _ = writer.write_line("quit").await;
            }
        }
        self.stop_timers();
    }

    // ----- I/O ------------------------------------------------------------

    /// Write one line to the connection. Failures drop the writer; the
    /// dispatcher notices on its next read.
    pub(crate) async fn write_line(&self, line: &str) -> Result<(), CommandError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(CommandError::NotConnected);
        };
        if self.cfg.debug {
            debug!(server = %self.display_name(), raw = %line, "sent");
        }
        match writer.write_line(line).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(CommandError::Io(e))
            }
        }
    }

    /// Send one command and block until its `end` bracket arrives.
    ///
    /// Takes the command lane for the whole exchange, which serializes
    /// commands per session and makes each `error`/`ok`/`end` attributable
    /// to exactly one request.
    pub(crate) async fn send_and_wait(
        &self,
        cmd: &str,
        assign_id: bool,
    ) -> Result<(), CommandError> {
        let line = if assign_id {
            format!("{cmd} id={}", self.correlator.allocate_id())
        } else {
            cmd.to_string()
        };
        let _lane = self.correlator.lane().lock().await;
        let rx = self.correlator.register_waiter();
        if let Err(e) = self.write_line(&line).await {
            self.correlator.clear_waiter();
            return Err(e);
        }
        match tokio::time::timeout(self.command_timeout(), rx).await {
            Err(_) => {
                self.correlator.clear_waiter();
                Err(CommandError::Timeout)
            }
            Ok(Err(_closed)) => Err(CommandError::Disconnected),
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(CommandError::Server(message)),
        }
    }

    /// Command waits are bounded by twice the server's user timeout, with
    /// a 30 second floor.
    fn command_timeout(&self) -> Duration {
        let secs = self.runtime.lock().user_timeout.max(0) as u64;
        Duration::from_secs((secs * 2).max(30))
    }

    // ----- accessors ------------------------------------------------------

    pub fn display_name(&self) -> &str {
        &self.cfg.name
    }

    pub fn autostart(&self) -> bool {
        self.cfg.auto_connect_on_start
    }

    pub fn state(&self) -> SessionState {
        self.runtime.lock().state
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.runtime.lock().state = state;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.runtime.lock().logged_in
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn uid(&self) -> UserId {
        self.runtime.lock().uid
    }

    pub fn kicked(&self) -> bool {
        self.runtime.lock().kicked
    }

    pub(crate) fn set_kicked(&self, kicked: bool) {
        self.runtime.lock().kicked = kicked;
    }

    pub fn rights_snapshot(&self) -> (UserType, u32) {
        let rt = self.runtime.lock();
        (rt.user_type, rt.rights)
    }

    pub fn user_timeout(&self) -> i64 {
        self.runtime.lock().user_timeout
    }

    pub(crate) fn set_user_timeout(&self, secs: i64) {
        self.runtime.lock().user_timeout = secs;
    }

    /// What the remote has told us about itself so far.
    pub fn remote_info(&self) -> RemoteInfo {
        let rt = self.runtime.lock();
        RemoteInfo {
            name: rt.server_name.clone(),
            protocol: rt.protocol.clone(),
            version: rt.version.clone(),
            motd: rt.motd.clone(),
            max_users: rt.max_users,
            user_timeout: rt.user_timeout,
        }
    }

    /// The nickname presented at login.
    pub(crate) fn login_nickname(&self) -> String {
        self.cfg
            .effective_nickname(self.global_nickname.as_deref())
    }

    /// Formatted settings block for status displays.
    pub fn info_str(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let mut out = format!(
            "Name: {}\r\nHost: {}\r\nTCP port: {}\r\n",
            self.cfg.name, self.cfg.host, self.cfg.port
        );
        let nickname = self.login_nickname();
        if !nickname.is_empty() {
            out.push_str(&format!("Nickname: {nickname}\r\n"));
        }
        if !self.cfg.username.is_empty() {
            out.push_str(&format!("Username: {}\r\n", self.cfg.username));
        }
        out.push_str(&format!(
            "Automatically connect on start: {}\r\n",
            yes_no(self.cfg.auto_connect_on_start)
        ));
        out.push_str(&format!(
            "Automatically reconnect on disconnect: {}\r\n",
            yes_no(self.cfg.auto_connect_on_disconnect)
        ));
        out.push_str(&format!(
            "Automatically reconnect when kicked: {}\r\n",
            yes_no(self.cfg.auto_connect_on_kick)
        ));
        let subs = crate::flags::subscriptions_str(self.cfg.automatic.subscriptions);
        if !subs.is_empty() {
            out.push_str(&format!("Automatic local subscriptions: {subs}\r\n"));
        }
        out.push_str(&format!(
            "Display extended connection info: {}\r\n",
            yes_no(self.cfg.display_extended_conn_info)
        ));
        out.push_str(&format!(
            "Display status updates: {}\r\n",
            yes_no(self.cfg.display_status_updates)
        ));
        out.push_str(&format!(
            "Display subscription updates: {}\r\n",
            yes_no(self.cfg.display_subscription_updates)
        ));
        out.push_str(&format!(
            "Display server events if inactive: {}\r\n",
            yes_no(self.cfg.display_server_events)
        ));
        out.push_str(&format!(
            "Beep on critical server events: {}\r\n",
            yes_no(self.cfg.beep_on_critical)
        ));
        out.push_str(&format!(
            "Log server events: {}\r\n",
            yes_no(self.cfg.log_server_events)
        ));
        if self.cfg.log_server_events {
            out.push_str(&format!(
                "Log events per user account: {}\r\n",
                yes_no(self.cfg.log_server_events_account)
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn test_session() -> Session {
        let cfg = ServerConfig {
            name: "testsrv".into(),
            host: "127.0.0.1".into(),
            port: "10333".into(),
            ..ServerConfig::default()
        };
        let global = GlobalSettings {
            working_dir: std::env::temp_dir(),
            ..GlobalSettings::default()
        };
        Session::new(cfg, &global)
    }

    #[test]
    fn fresh_session_is_disconnected() {
        let session = test_session();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        assert!(!session.is_logged_in());
        assert!(!session.is_shutdown());
    }

    #[test]
    fn command_timeout_has_a_floor() {
        let session = test_session();
        session.set_user_timeout(-1);
        assert_eq!(session.command_timeout(), Duration::from_secs(30));
        session.set_user_timeout(60);
        assert_eq!(session.command_timeout(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let session = test_session();
        session.shutdown().await;
        assert!(session.is_shutdown());
        session.shutdown().await;
        assert!(session.is_shutdown());
    }

    #[test]
    fn info_block_mentions_the_essentials() {
        let session = test_session();
        let info = session.info_str();
        assert!(info.contains("Name: testsrv"));
        assert!(info.contains("TCP port: 10333"));
        assert!(info.contains("Automatically reconnect on disconnect: no"));
    }
}
