//! Event log sink for one server: console echo, the per-server
//! `server.log`, and per-account log files.
//!
//! Each file entry is preceded by a timestamp line, written only when it
//! differs from the previous entry's timestamp in the same file. Console
//! output carries a `[display name]:` header and an optional bell on
//! critical events. The last ten event lines are kept in a ring for status
//! displays.

use chrono::Local;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const HISTORY_LEN: usize = 10;
const BEEP: &str = "\u{7}";

/// Per-server logging and display toggles, resolved from config.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub display_name: String,
    /// Write events to `server.log`.
    pub log_events: bool,
    /// Also route events to per-account files.
    pub log_events_account: bool,
    /// Echo non-critical events to the console.
    pub display_events: bool,
    pub beep_on_critical: bool,
    /// Prefix console output with timestamp lines.
    pub display_timestamp: bool,
    /// `<working-dir>/logs/<display-name>/`
    pub root: PathBuf,
}

impl LogSettings {
    pub fn log_root(working_dir: &Path, display_name: &str) -> PathBuf {
        working_dir.join("logs").join(display_name)
    }
}

/// The sink itself. All methods take `&self`; internal slots are mutexed.
pub struct Logbook {
    settings: LogSettings,
    /// Username routing slot for the next per-account write.
    account: Mutex<String>,
    /// Non-critical lines accumulated while one frame is handled.
    buffer: Mutex<String>,
    last_stamp_main: Mutex<String>,
    last_stamp_account: Mutex<HashMap<String, String>>,
    last_stamp_console: Mutex<String>,
    history: Mutex<VecDeque<String>>,
}

fn timestamp_line() -> String {
    Local::now().format("%Y-%m-%d  %H:%M:%S (%z %Z)").to_string()
}

impl Logbook {
    pub fn new(settings: LogSettings) -> Self {
        Self {
            settings,
            account: Mutex::new(String::new()),
            buffer: Mutex::new(String::new()),
            last_stamp_main: Mutex::new(String::new()),
            last_stamp_account: Mutex::new(HashMap::new()),
            last_stamp_console: Mutex::new(String::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// Route the next per-account write to this username's log file.
    pub fn set_account(&self, username: &str) {
        *self.account.lock() = username.to_string();
    }

    /// Log an event everywhere: files plus console.
    pub fn write(&self, data: &str, critical: bool) {
        let data = data.trim_matches(['\r', '\n']);
        if data.is_empty() {
            return;
        }
        self.write_files(data);
        self.console(data, critical, false);
    }

    /// Log an event to the file sinks only.
    pub fn write_files(&self, data: &str) {
        let data = data.trim_matches(['\r', '\n']);
        if data.is_empty() {
            return;
        }
        self.write_main(data);
        self.write_account(data);
    }

    fn write_main(&self, data: &str) {
        if !self.settings.log_events {
            return;
        }
        let path = self.settings.root.join("server.log");
        let stamp = timestamp_line();
        let header = {
            let mut last = self.last_stamp_main.lock();
            if *last == stamp {
                None
            } else {
                *last = stamp.clone();
                Some(stamp)
            }
        };
        if let Err(e) = append_entry(&path, header.as_deref(), data) {
            warn!(server = %self.settings.display_name, error = %e, "failed to write server log");
        }
    }

    fn write_account(&self, data: &str) {
        if !self.settings.log_events || !self.settings.log_events_account {
            return;
        }
        let username = std::mem::take(&mut *self.account.lock());
        if username.is_empty() {
            return;
        }
        let path = self
            .settings
            .root
            .join("account_logs")
            .join(format!("{username}.log"));
        let stamp = timestamp_line();
        let header = {
            let mut last = self.last_stamp_account.lock();
            let slot = last.entry(username.clone()).or_default();
            if *slot == stamp {
                None
            } else {
                *slot = stamp.clone();
                Some(stamp)
            }
        };
        if let Err(e) = append_entry(&path, header.as_deref(), data) {
            warn!(server = %self.settings.display_name, account = %username, error = %e,
                "failed to write account log");
        }
    }

    /// Per-account write without touching `server.log`, used by message
    /// routing. The routing slot must be set first.
    pub fn write_account_only(&self, data: &str) {
        let data = data.trim_matches(['\r', '\n']);
        if data.is_empty() {
            return;
        }
        self.write_account(data);
    }

    /// Echo an event to the console and store it in the ring.
    ///
    /// Non-critical output is suppressed while a command bracket is open
    /// (`in_bracket`), which is what keeps the initial login enumeration
    /// silent.
    pub fn console(&self, data: &str, critical: bool, in_bracket: bool) {
        let data = data.trim_matches(['\r', '\n']);
        if data.is_empty() {
            return;
        }
        let date = self.console_timestamp();
        if (critical || self.settings.display_events) && (critical || !in_bracket) {
            let beep = if critical && self.settings.beep_on_critical {
                BEEP
            } else {
                ""
            };
            println!(
                "{date}{beep}[{}]: {data}",
                self.settings.display_name
            );
        }
        self.store_history(&format!("{date}{data}"));
    }

    fn console_timestamp(&self) -> String {
        if !self.settings.display_timestamp {
            return String::new();
        }
        let stamp = timestamp_line();
        let mut last = self.last_stamp_console.lock();
        if *last == stamp {
            return String::new();
        }
        *last = stamp.clone();
        format!("{stamp}\r\n")
    }

    /// Accumulate a non-critical event line for the frame in flight.
    pub fn buffer_line(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        let mut buffer = self.buffer.lock();
        buffer.push_str(data);
        buffer.push_str("\r\n");
    }

    /// Flush the frame buffer as one non-critical event.
    pub fn flush_buffer(&self, in_bracket: bool) {
        let data = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        let data = data.trim_end_matches("\r\n");
        if data.is_empty() {
            return;
        }
        self.write_files(data);
        self.console(data, false, in_bracket);
    }

    /// Drop any buffered lines and the account routing slot.
    pub fn reset(&self) {
        self.buffer.lock().clear();
        self.account.lock().clear();
    }

    fn store_history(&self, data: &str) {
        let data = data.trim_matches(['\r', '\n']);
        if data.is_empty() {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(data.to_string());
    }

    /// The last ten event lines, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().iter().cloned().collect()
    }
}

fn append_entry(path: &Path, stamp: Option<&str>, data: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if let Some(stamp) = stamp {
        write!(file, "{stamp}\r\n")?;
    }
    write!(file, "{data}\r\n\r\n")
}

/// Human rendering of a connection duration, e.g. "2 hours 5 minutes
/// 3 seconds". A zero duration renders as "0 seconds".
pub fn duration_str(duration: std::time::Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let mut parts = Vec::new();
    let mut push = |value: u64, unit: &str| {
        if value > 0 {
            let plural = if value == 1 { "" } else { "s" };
            parts.push(format!("{value} {unit}{plural}"));
        }
    };
    push(days, "day");
    push(hours, "hour");
    push(minutes, "minute");
    push(seconds, "second");
    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    parts.join(" ")
}
