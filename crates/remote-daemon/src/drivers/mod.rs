//! The two remote-control transport drivers.
//!
//! Each driver owns one worker thread running a blocking read loop and
//! feeds the shared key-event sink.  The registry of named remote
//! sources lives in the surrounding application; drivers only expose the
//! minimal surface it consumes.

pub mod serial;
pub mod socket;

/// Minimal surface of a named remote source.
pub trait Remote: Send {
    /// Registry name, e.g. `"LIRC"` or `"RCU"`.
    fn name(&self) -> &str;

    /// False when the transport could not be acquired at construction;
    /// such a driver never started its worker and stays unusable.
    fn ready(&self) -> bool;
}

/// Device status notifications consumed from the device layer.
///
/// Variant devices implement capabilities through traits like this one;
/// the serial driver uses them to keep its front display current.
pub trait DeviceStatusListener: Send + Sync {
    /// A channel switch happened on `device`; only the primary playback
    /// device is reflected on the display.
    fn channel_switch(&self, device_is_primary: bool, channel_number: u16);

    /// Recording started or stopped on the device with the given index.
    fn recording_state(&self, device_index: u8, receiving: bool);
}
