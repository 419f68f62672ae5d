//! Device side of the OTA transfer: radio-context ingress decoupled from
//! a dedicated flash-writer task by a bounded sector ring.

pub mod boot;
pub mod flash;
pub mod pump;
pub mod receiver;
pub mod writer;

pub use flash::{ImageState, OtaFlash, OtaHost, Partition, PartitionKind, SlotId};
pub use pump::IngressPump;
pub use receiver::{OtaReceiver, ReceiveError};
pub use writer::{FlashWriter, FlashWriterConfig, SectorBuf, TransferState};

/// Fatal transfer errors. Every one of these ends in a delayed reboot;
/// the running partition stays valid, so the device comes back up on the
/// previous image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError {
    NoRunningPartition,
    NotAppPartition,
    StateRead,
    MarkValid,
    /// No start command was seen before the first data arrived.
    ZeroLength,
    OtaBegin,
    OtaWrite,
    OtaEnd,
    SetBoot,
    /// The ring stayed empty past the deadline; the client has stopped.
    RecvTimeout,
    /// The flash gate could not be taken in time.
    FlashGateTimeout,
}

pub(crate) mod err {
    use super::DeviceError;

    pub fn running_partition<E>(_: E) -> DeviceError {
        DeviceError::NoRunningPartition
    }

    pub fn state_read<E>(_: E) -> DeviceError {
        DeviceError::StateRead
    }

    pub fn mark_valid<E>(_: E) -> DeviceError {
        DeviceError::MarkValid
    }

    pub fn ota_begin<E>(_: E) -> DeviceError {
        DeviceError::OtaBegin
    }

    pub fn ota_write<E>(_: E) -> DeviceError {
        DeviceError::OtaWrite
    }

    pub fn ota_end<E>(_: E) -> DeviceError {
        DeviceError::OtaEnd
    }

    pub fn set_boot<E>(_: E) -> DeviceError {
        DeviceError::SetBoot
    }
}
