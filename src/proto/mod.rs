//! Wire codec: frame split, parameter grammar, line transport.

mod params;
pub mod transport;

pub use params::{Params, format_cmd, format_list};

/// One parsed CRLF-terminated line of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: String,
    pub params: Params,
}

impl Frame {
    /// Parse a raw line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_matches(['\r', '\n', ' ']);
        if line.is_empty() {
            return None;
        }
        let (cmd, rest) = match line.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest),
            None => (line, ""),
        };
        Some(Self {
            cmd: cmd.to_string(),
            params: Params::parse(rest),
        })
    }
}
