//! Integration test common infrastructure.
//!
//! Provides a scripted mock TeamTalk server and helpers for spawning
//! sessions against it.

pub mod server;

#[allow(unused_imports)]
pub use server::{MockServer, Peer};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ttbot::config::ServerConfig;
use ttbot::session::{GlobalSettings, Session};

/// Build a session pointed at the mock server. `tweak` adjusts the config
/// before the session is created.
#[allow(dead_code)]
pub fn session_for(addr: SocketAddr, tweak: impl FnOnce(&mut ServerConfig)) -> Arc<Session> {
    session_with_global(addr, tweak, |_| {})
}

/// Like [`session_for`] but also adjusting the process-wide settings.
#[allow(dead_code)]
pub fn session_with_global(
    addr: SocketAddr,
    tweak: impl FnOnce(&mut ServerConfig),
    global_tweak: impl FnOnce(&mut GlobalSettings),
) -> Arc<Session> {
    let mut cfg = ServerConfig {
        name: "mock".into(),
        host: addr.ip().to_string(),
        port: addr.port().to_string(),
        auto_connect_on_start: true,
        ..ServerConfig::default()
    };
    tweak(&mut cfg);
    let mut global = GlobalSettings {
        nickname: None,
        display_timestamp: false,
        working_dir: std::env::temp_dir(),
    };
    global_tweak(&mut global);
    Arc::new(Session::new(cfg, &global))
}

/// Poll a condition for up to five seconds.
#[allow(dead_code)]
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
