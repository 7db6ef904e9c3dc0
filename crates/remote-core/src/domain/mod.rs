//! Press/repeat/release state machines shared by the drivers.
//!
//! Both trackers are pure: the caller passes the current `Instant`, the
//! tracker returns the events to emit.  The driver loops own the I/O and
//! feed these from whatever the transport produced (or didn't) each
//! iteration.

pub mod frame_repeat;
pub mod socket_repeat;
