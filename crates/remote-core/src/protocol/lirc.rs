//! Parser for the lircd event-socket line protocol.
//!
//! lircd reports every decoded button press as one text line on its Unix
//! socket:
//!
//! ```text
//! <scan-code-hex> <repeat-count-hex> <key-name> [<remote-name>]
//! ```
//!
//! A repeat count of zero marks a fresh press; non-zero counts are the
//! decoder's own auto-repeat ticks.  The remote name is optional and
//! ignored by this subsystem.

use std::time::Duration;

use thiserror::Error;

/// Debounce window: a fresh event repeating the previous key name inside
/// this window is treated as contact bounce and dropped.
pub const KEYPRESS_DEBOUNCE: Duration = Duration::from_millis(150);

/// Repeat-confirmation window: repeat ticks arriving before the key has
/// been held this long are ignored; after it, repeats are forwarded.
pub const REPEAT_CONFIRM: Duration = Duration::from_millis(350);

/// Interval between reconnection attempts after the socket breaks.
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Receive buffer size; lircd lines are far shorter.
pub const LINE_BUFFER_SIZE: usize = 128;

/// Longest accepted key name; anything longer is not a key event.
pub const MAX_KEY_NAME: usize = 29;

/// One decoded lircd event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LircLine {
    /// Raw scan code as reported by the decoder; informational only.
    pub scan_code: u64,
    /// 0 for a fresh press, incrementing for held-key repeat ticks.
    pub repeat: u32,
    /// Symbolic key name, at most [`MAX_KEY_NAME`] bytes.
    pub key: String,
}

/// Errors produced when an event line cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineParseError {
    /// Fewer than three whitespace-separated fields.
    #[error("expected at least 3 fields, got {0}")]
    MissingFields(usize),

    /// A numeric field was not valid hexadecimal.
    #[error("invalid hex in field '{0}'")]
    BadHex(String),

    /// The key name exceeds [`MAX_KEY_NAME`] bytes.
    #[error("key name too long ({0} bytes)")]
    KeyNameTooLong(usize),
}

/// Decodes one event line.
///
/// # Errors
///
/// Returns [`LineParseError`] if the line does not have the
/// `<hex> <hex> <name>` shape.
///
/// # Examples
///
/// ```rust
/// use remote_core::protocol::lirc::parse_event_line;
///
/// let line = parse_event_line("0000000000001795 00 KEY_OK pinnacle").unwrap();
/// assert_eq!(line.scan_code, 0x1795);
/// assert_eq!(line.repeat, 0);
/// assert_eq!(line.key, "KEY_OK");
/// ```
pub fn parse_event_line(line: &str) -> Result<LircLine, LineParseError> {
    let mut fields = line.split_ascii_whitespace();
    let code_field = fields.next();
    let repeat_field = fields.next();
    let key_field = fields.next();

    let (code, repeat, key) = match (code_field, repeat_field, key_field) {
        (Some(c), Some(r), Some(k)) => (c, r, k),
        _ => {
            let n = [code_field, repeat_field, key_field]
                .iter()
                .filter(|f| f.is_some())
                .count();
            return Err(LineParseError::MissingFields(n));
        }
    };

    let scan_code = u64::from_str_radix(code, 16)
        .map_err(|_| LineParseError::BadHex(code.to_string()))?;
    let repeat = u32::from_str_radix(repeat, 16)
        .map_err(|_| LineParseError::BadHex(repeat.to_string()))?;

    if key.len() > MAX_KEY_NAME {
        return Err(LineParseError::KeyNameTooLong(key.len()));
    }

    Ok(LircLine {
        scan_code,
        repeat,
        key: key.to_string(),
    })
}
