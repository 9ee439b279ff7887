//! ttbot - a multi-server TeamTalk 5 administration bot.
//!
//! Maintains one persistent session per configured server, mirrors the
//! server's channel/user tree locally, and performs policy actions
//! (auto-reconnect, auto-subscribe, auto-move, admin table diffing).

pub mod config;
pub mod error;
pub mod flags;
pub mod fleet;
pub mod logbook;
pub mod proto;
pub mod session;
pub mod state;

/// Client name announced in the `login` handshake and echoed to peers.
pub const CLIENT_NAME: &str = "ttbot";

/// Protocol revision announced in the `login` handshake.
pub const PROTOCOL_VERSION: &str = "5.6";

/// Client version announced in the `login` handshake.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
