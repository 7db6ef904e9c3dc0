//! Normalized key events and the sink contract.
//!
//! Both drivers reduce their transport-specific input to the same shape: a
//! key identity plus repeat/release flags.  The surrounding application
//! provides the queue; this crate only defines the contract.

/// Identity of a pressed key as reported by a transport.
///
/// The socket transport reports symbolic key names (`"OK"`, `"Menu"`); the
/// serial transport reports the 64-bit composite of its address and command
/// words.  Both forms are carried unmodified to the consumer, which owns
/// the mapping to application key codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyId {
    /// Symbolic key name from the line protocol.
    Name(String),
    /// `(address << 32) | command` composite from the serial frame protocol.
    Code(u64),
}

impl KeyId {
    /// Convenience constructor for named keys.
    pub fn name(s: impl Into<String>) -> Self {
        KeyId::Name(s.into())
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyId::Name(n) => write!(f, "{n}"),
            KeyId::Code(c) => write!(f, "{c:#014X}"),
        }
    }
}

/// One event in the normalized key stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub id: KeyId,
    /// The key has been held long enough to auto-repeat.
    pub repeat: bool,
    /// Synthesized release ending a repeat run.
    pub release: bool,
}

impl KeyPress {
    pub fn fresh(id: KeyId) -> Self {
        Self { id, repeat: false, release: false }
    }

    pub fn repeat(id: KeyId) -> Self {
        Self { id, repeat: true, release: false }
    }

    pub fn release(id: KeyId) -> Self {
        Self { id, repeat: false, release: true }
    }
}

/// Sink for the normalized key-event stream.
///
/// Implemented by the application's key queue.  Drivers call `put` from
/// their worker threads, so implementations must be safe to call
/// concurrently with the consumer.
pub trait KeySink: Send + Sync {
    fn put(&self, id: KeyId, repeat: bool, release: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_display_formats_name_verbatim() {
        assert_eq!(KeyId::name("Menu").to_string(), "Menu");
    }

    #[test]
    fn test_key_id_display_formats_code_as_hex() {
        assert_eq!(KeyId::Code(0x0001_0000_4000).to_string(), "0x000100004000");
    }

    #[test]
    fn test_key_press_constructors_set_flags() {
        let fresh = KeyPress::fresh(KeyId::name("OK"));
        assert!(!fresh.repeat && !fresh.release);

        let rep = KeyPress::repeat(KeyId::name("OK"));
        assert!(rep.repeat && !rep.release);

        let rel = KeyPress::release(KeyId::name("OK"));
        assert!(!rel.repeat && rel.release);
    }
}
