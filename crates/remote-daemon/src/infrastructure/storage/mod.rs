//! File-system storage: the daemon's own configuration and the per-remote
//! setup strings (negotiated access codes and the like).

pub mod config;
pub mod setup;
