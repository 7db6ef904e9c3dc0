//! Application layer: what the daemon does with the normalized key
//! stream.  Currently a single use case — the bounded key queue the
//! drivers feed and the main loop drains.

pub mod key_queue;
