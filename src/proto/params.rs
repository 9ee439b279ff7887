//! Parameter grammar of the wire protocol.
//!
//! A frame is `cmd key1=val1 key2=val2 …`. Values come in three syntactic
//! forms keyed on the parameter name: bare integers, bracketed integer
//! lists, and quoted strings with `\\ \" \r \n` escapes. The parser walks
//! left to right consuming one `key=value` at a time; bytes that match no
//! parameter are skipped silently. A parameter present with an empty string
//! value is distinct from an absent parameter.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([A-Za-z0-9._-]+)=(\[(?:-?\d+(?:,-?\d+)*)?\]|-?\d+|"(?:[^"\\]|\\.)*")"#)
        .expect("parameter grammar")
});

/// Decoded parameters of one frame.
///
/// Values are stored in decoded string form; typed accessors interpret
/// them on demand, mirroring how the wire carries them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    /// Parse everything after the command token.
    pub fn parse(rest: &str) -> Self {
        let mut map = HashMap::new();
        let mut input = rest;
        while !input.is_empty() {
            if let Some(caps) = PARAM_RE.captures(input) {
                let whole = caps.get(0).expect("group 0").end();
                let name = caps.get(1).expect("name").as_str();
                let raw = caps.get(2).expect("value").as_str();
                let value = if let Some(quoted) = raw
                    .strip_prefix('"')
                    .and_then(|r| r.strip_suffix('"'))
                {
                    unescape(quoted)
                } else {
                    raw.to_string()
                };
                map.insert(name.to_string(), value);
                input = &input[whole..];
            } else {
                let next = input
                    .char_indices()
                    .nth(1)
                    .map(|(i, _)| i)
                    .unwrap_or(input.len());
                input = &input[next..];
            }
        }
        Self { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// The raw decoded value, distinguishing absent from empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// String value, empty when absent.
    pub fn text(&self, name: &str) -> String {
        self.map.get(name).cloned().unwrap_or_default()
    }

    /// Integer value, `None` when absent or malformed.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.map.get(name)?.parse().ok()
    }

    /// Integer value, zero when absent or malformed.
    pub fn int_or_zero(&self, name: &str) -> i64 {
        self.int(name).unwrap_or(0)
    }

    /// Bracketed integer list, empty when absent or not a list. Malformed
    /// entries are dropped.
    pub fn list(&self, name: &str) -> Vec<i64> {
        let Some(raw) = self.map.get(name) else {
            return Vec::new();
        };
        let Some(inner) = raw
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
        else {
            return Vec::new();
        };
        inner
            .split(',')
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect()
    }

    /// Remove and discard a parameter (used when a key doubles as a
    /// table key elsewhere).
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.map.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Encode a command line from name/value pairs.
///
/// Values that parse as integers or look like bracketed lists are emitted
/// bare; everything else is emitted as a quoted string with `\ " CR LF`
/// escaped.
pub fn format_cmd(cmd: &str, args: &[(&str, String)]) -> String {
    let mut out = String::from(cmd);
    for (name, value) in args {
        out.push(' ');
        out.push_str(name);
        out.push('=');
        if value.parse::<i64>().is_ok()
            || (value.starts_with('[') && value.ends_with(']'))
        {
            out.push_str(value);
        } else {
            out.push('"');
            out.push_str(&escape(value));
            out.push('"');
        }
    }
    out
}

/// Render an integer list in wire form, `[]` when empty.
pub fn format_list(ints: &[i64]) -> String {
    let parts: Vec<String> = ints.iter().map(|n| n.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(rest: &str) -> Params {
        Params::parse(rest)
    }

    #[test]
    fn parses_integers_strings_and_lists() {
        let p = parse_line(r#"userid=42 nickname="bot" operators=[1,2,3]"#);
        assert_eq!(p.int("userid"), Some(42));
        assert_eq!(p.get("nickname"), Some("bot"));
        assert_eq!(p.list("operators"), vec![1, 2, 3]);
    }

    #[test]
    fn negative_integers_and_empty_lists() {
        let p = parse_line(r#"offset=-7 codec=[]"#);
        assert_eq!(p.int("offset"), Some(-7));
        assert_eq!(p.list("codec"), Vec::<i64>::new());
        assert!(p.contains("codec"));
    }

    #[test]
    fn absent_is_distinct_from_empty() {
        let p = parse_line(r#"statusmsg="""#);
        assert!(p.contains("statusmsg"));
        assert_eq!(p.get("statusmsg"), Some(""));
        assert_eq!(p.get("nickname"), None);
        assert_eq!(p.text("nickname"), "");
    }

    #[test]
    fn quoted_escapes_decode() {
        let p = parse_line(r#"motd="line1\r\nline2 \"quoted\" back\\slash""#);
        assert_eq!(
            p.get("motd"),
            Some("line1\r\nline2 \"quoted\" back\\slash")
        );
    }

    #[test]
    fn unknown_bytes_are_skipped() {
        let p = parse_line(r#"?? userid=5 !junk! name="x""#);
        assert_eq!(p.int("userid"), Some(5));
        assert_eq!(p.get("name"), Some("x"));
    }

    #[test]
    fn encoder_sniffs_value_forms() {
        let line = format_cmd(
            "join",
            &[
                ("chanid", "5".to_string()),
                ("password", "secret pass".to_string()),
                ("operators", "[1,2]".to_string()),
            ],
        );
        assert_eq!(line, r#"join chanid=5 password="secret pass" operators=[1,2]"#);
    }

    #[test]
    fn round_trip_equals_original_map() {
        let args = [
            ("userid", "42".to_string()),
            ("nickname", "bot \"one\"\r\n".to_string()),
            ("codec", "[1,-2,3]".to_string()),
            ("statusmsg", String::new()),
        ];
        let line = format_cmd("loggedin", &args);
        let (cmd, rest) = line.split_once(' ').expect("has params");
        assert_eq!(cmd, "loggedin");
        let p = Params::parse(rest);
        assert_eq!(p.int("userid"), Some(42));
        assert_eq!(p.get("nickname"), Some("bot \"one\"\r\n"));
        assert_eq!(p.list("codec"), vec![1, -2, 3]);
        assert_eq!(p.get("statusmsg"), Some(""));
    }

    #[test]
    fn format_list_wire_form() {
        assert_eq!(format_list(&[]), "[]");
        assert_eq!(format_list(&[1, -2, 3]), "[1,-2,3]");
    }
}
