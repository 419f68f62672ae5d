//! Client side of the OTA transfer: the session orchestrator and its
//! supporting pieces.

pub mod framer;
pub mod mux;
pub mod progress;
pub mod session;

pub use framer::Framer;
pub use mux::{NotificationMux, SessionPhase};
pub use progress::ProgressTracker;
pub use session::{GattClient, SessionController, SessionTimeouts};

use ble_ota_schema::OtaCharacteristic;

/// Terminal session errors. Every one of these ends the current session;
/// retry is a new session after the device has come back up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaError {
    /// One of the four OTA characteristics is missing from the profile.
    ProfileIncomplete,
    /// A session is already running against this device.
    Busy,
    /// Chunk size outside the range the sequence numbering can carry.
    InvalidChunkSize,
    /// No start ack within the deadline.
    StartTimeout,
    /// The device stopped advancing its reported progress.
    ProgressStall,
    /// Everything was streamed but 100 % was never reported.
    FinalProgressTimeout,
    /// A GATT subscription raised an error outside teardown.
    SubscriptionError(OtaCharacteristic),
    /// A write-with-response was rejected by the link.
    WriteFailed(OtaCharacteristic),
    /// The link dropped mid-session.
    Disconnected,
}
