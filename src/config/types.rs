//! Configuration type definitions.
//!
//! The persisted store is XML with a `<config>` root. Unknown elements are
//! ignored on read; the file is rewritten whole on every change.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename = "config")]
pub struct Config {
    /// Global nickname, used by servers with `useGlobalNickName`.
    #[serde(rename = "NickName", skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Prefix console output with timestamp lines.
    #[serde(rename = "displayEventTimestamp")]
    pub display_event_timestamp: bool,
    /// Display name of the server the console last interacted with.
    #[serde(rename = "ActiveServer", skip_serializing_if = "Option::is_none")]
    pub active_server: Option<String>,
    pub defaults: Defaults,
    pub servers: Servers,
}

/// Wrapper for the repeated `<servers><server>…</server></servers>` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Servers {
    #[serde(rename = "server")]
    pub server: Vec<ServerConfig>,
}

/// Defaults applied when creating new server entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    #[serde(rename = "autoConnectOnStart")]
    pub auto_connect_on_start: bool,
    #[serde(rename = "autoConnectOnDisconnect")]
    pub auto_connect_on_disconnect: bool,
    #[serde(rename = "autoConnectOnKick")]
    pub auto_connect_on_kick: bool,
    #[serde(rename = "automaticSubscriptions")]
    pub automatic_subscriptions: u32,
    #[serde(rename = "displayExtendedConnInfo")]
    pub display_extended_conn_info: bool,
    #[serde(rename = "displayStatusUpdates")]
    pub display_status_updates: bool,
    #[serde(rename = "displaySubscriptionUpdates")]
    pub display_subscription_updates: bool,
    #[serde(rename = "displayServerEventsIfInactive")]
    pub display_server_events: bool,
    #[serde(rename = "beepOnCriticalServerEvents")]
    pub beep_on_critical: bool,
    #[serde(rename = "logServerEvents")]
    pub log_server_events: bool,
    #[serde(rename = "logServerEventsPerUserAccount")]
    pub log_server_events_account: bool,
    #[serde(rename = "useGlobalNickName")]
    pub use_global_nickname: bool,
    #[serde(rename = "useOnServerCreate")]
    pub use_on_server_create: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            auto_connect_on_start: true,
            auto_connect_on_disconnect: true,
            auto_connect_on_kick: false,
            automatic_subscriptions: 0,
            display_extended_conn_info: false,
            display_status_updates: false,
            display_subscription_updates: false,
            display_server_events: true,
            beep_on_critical: false,
            log_server_events: false,
            log_server_events_account: false,
            use_global_nickname: false,
            use_on_server_create: false,
        }
    }
}

/// Automatic policy block of one server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Automatic {
    /// Subscription mask applied to every newly observed user.
    pub subscriptions: u32,
    /// Auto-move source channel id; 0 disables the source condition.
    #[serde(rename = "moveFrom")]
    pub move_from: i64,
    /// Auto-move destination channel id; 0 disables auto-move.
    #[serde(rename = "moveTo")]
    pub move_to: i64,
}

/// One configured remote server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name, unique across the whole config (case-insensitive).
    pub name: String,
    pub host: String,
    /// TCP port, kept textual so a bad value is a validation error rather
    /// than a parse failure of the whole file.
    pub port: String,
    pub username: String,
    pub password: String,
    pub nickname: String,
    #[serde(rename = "useGlobalNickName")]
    pub use_global_nickname: bool,
    #[serde(rename = "autoConnectOnStart")]
    pub auto_connect_on_start: bool,
    #[serde(rename = "autoConnectOnDisconnect")]
    pub auto_connect_on_disconnect: bool,
    #[serde(rename = "autoConnectOnKick")]
    pub auto_connect_on_kick: bool,
    pub automatic: Automatic,
    #[serde(rename = "displayExtendedConnInfo")]
    pub display_extended_conn_info: bool,
    #[serde(rename = "displayStatusUpdates")]
    pub display_status_updates: bool,
    #[serde(rename = "displaySubscriptionUpdates")]
    pub display_subscription_updates: bool,
    #[serde(rename = "displayServerEventsIfInactive")]
    pub display_server_events: bool,
    #[serde(rename = "beepOnCriticalServerEvents")]
    pub beep_on_critical: bool,
    #[serde(rename = "logServerEvents")]
    pub log_server_events: bool,
    #[serde(rename = "logServerEventsPerUserAccount")]
    pub log_server_events_account: bool,
    /// Log raw sent/received lines for this server.
    pub debug: bool,
}

impl ServerConfig {
    /// Parsed TCP port, `None` when unset or malformed.
    pub fn port_number(&self) -> Option<u16> {
        match self.port.parse::<u16>() {
            Ok(0) | Err(_) => None,
            Ok(port) => Some(port),
        }
    }

    /// The nickname used at login: the server-local one, else the global
    /// one when `useGlobalNickName` is set.
    pub fn effective_nickname(&self, global: Option<&str>) -> String {
        if self.nickname.is_empty() && self.use_global_nickname {
            return global.unwrap_or_default().to_string();
        }
        self.nickname.clone()
    }

    /// Seed a new entry from the configured defaults.
    pub fn from_defaults(defaults: &Defaults) -> Self {
        if !defaults.use_on_server_create {
            return Self::default();
        }
        Self {
            auto_connect_on_start: defaults.auto_connect_on_start,
            auto_connect_on_disconnect: defaults.auto_connect_on_disconnect,
            auto_connect_on_kick: defaults.auto_connect_on_kick,
            automatic: Automatic {
                subscriptions: defaults.automatic_subscriptions,
                ..Automatic::default()
            },
            display_extended_conn_info: defaults.display_extended_conn_info,
            display_status_updates: defaults.display_status_updates,
            display_subscription_updates: defaults.display_subscription_updates,
            display_server_events: defaults.display_server_events,
            beep_on_critical: defaults.beep_on_critical,
            log_server_events: defaults.log_server_events,
            log_server_events_account: defaults.log_server_events_account,
            use_global_nickname: defaults.use_global_nickname,
            ..Self::default()
        }
    }
}
