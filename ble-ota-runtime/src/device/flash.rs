//! Collaborator traits towards the partition table and the host system.

/// The two app slots. Exactly one is running; the other is standby and
/// the target of every OTA write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotId {
    Ota0,
    Ota1,
}

impl SlotId {
    pub const fn other(self) -> SlotId {
        match self {
            SlotId::Ota0 => SlotId::Ota1,
            SlotId::Ota1 => SlotId::Ota0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PartitionKind {
    App,
    Data,
}

/// Boot loader's verdict on the image in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageState {
    New,
    /// Freshly booted, not yet confirmed; the boot loader rolls back on
    /// the next reset unless it is marked valid first.
    PendingVerify,
    Valid,
    Invalid,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Partition {
    pub slot: SlotId,
    pub kind: PartitionKind,
}

/// OTA partition API of the platform. Write calls target the slot handed
/// to [`OtaFlash::begin`] until [`OtaFlash::end`] seals it; the boot slot
/// changes only through [`OtaFlash::set_boot_partition`].
pub trait OtaFlash {
    type Error: core::fmt::Debug;

    fn running_partition(&self) -> Result<Partition, Self::Error>;
    fn image_state(&self, slot: SlotId) -> Result<ImageState, Self::Error>;
    /// Confirms the running image, cancelling the boot loader rollback.
    fn mark_valid_cancel_rollback(&mut self) -> Result<(), Self::Error>;
    async fn begin(&mut self, slot: SlotId) -> Result<(), Self::Error>;
    async fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    async fn end(&mut self) -> Result<(), Self::Error>;
    fn set_boot_partition(&mut self, slot: SlotId) -> Result<(), Self::Error>;
}

/// The rest of the device platform the writer needs.
pub trait OtaHost {
    /// Sends the one-byte percentage notification to the client.
    fn notify_progress(&mut self, pct: u8);
    /// Resets the chip. The running partition is valid whenever this is
    /// reached, so the device always comes back up bootable.
    fn reboot(&mut self);
}
