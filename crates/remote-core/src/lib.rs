//! # remote-core
//!
//! Shared library for the PVR remote-control input subsystem containing the
//! wire codecs for both remote transports and the key repeat/debounce
//! domain logic.
//!
//! This crate is used by the daemon drivers and by the test suites.
//! It has zero dependencies on OS APIs, threads, or file descriptors.
//!
//! - **`protocol`** – How bytes arrive from the hardware.  The socket
//!   transport speaks a text line format (`<code> <repeat> <key-name>`),
//!   the serial transport a 6-byte binary frame plus a one-byte display
//!   command language.
//!
//! - **`domain`** – Pure press/repeat/release state machines.  Both
//!   trackers take the current `Instant` as an argument, so every timing
//!   rule (debounce, repeat confirmation, release synthesis) is testable
//!   without sleeping.
//!
//! - **`event`** – The normalized key event and the sink trait the
//!   surrounding application implements to consume the stream.

pub mod domain;
pub mod event;
pub mod protocol;

pub use domain::frame_repeat::FrameKeyTracker;
pub use domain::socket_repeat::SocketKeyTracker;
pub use event::{KeyId, KeyPress, KeySink};
pub use protocol::frame::{Frame, FRAME_LEN, FRAME_SENTINEL};
pub use protocol::lirc::{parse_event_line, LineParseError, LircLine};
