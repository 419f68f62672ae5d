//! Radio-context entry into the bounded sector ring.

use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::RawMutex;

use super::writer::{SectorBuf, TransferState};

/// Hands completed sectors from the BLE stack context to the flash
/// writer. Never blocks the caller.
pub struct IngressPump<'a, M: RawMutex> {
    transfer: &'a TransferState<M>,
}

impl<'a, M: RawMutex> IngressPump<'a, M> {
    pub fn new(transfer: &'a TransferState<M>) -> Self {
        IngressPump { transfer }
    }

    /// Marks the transfer started; the first call wakes the flash-writer
    /// task.
    pub fn mark_started(&self) {
        if !self.transfer.ota_started.swap(true, Ordering::AcqRel) {
            self.transfer.started.signal(());
        }
    }

    /// Queues a verified sector with zero timeout. A full ring drops the
    /// sector: no overflow signal is sent inline, the client times out on
    /// its next progress wait and aborts the session.
    pub fn push(&self, sector: SectorBuf) {
        if self.transfer.ring.try_send(sector).is_err() {
            error!("ring buffer full, dropping sector");
        }
    }
}
