//! Wire formats for the two remote-control transports.

pub mod display;
pub mod frame;
pub mod lirc;
