//! Routes the four characteristic subscriptions into the session state.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use ble_ota_schema::{CommandAck, OtaCharacteristic, ACK_ACCEPTED};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use super::progress::ProgressTracker;
use super::OtaError;

/// Where the running session currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionPhase {
    Idle,
    AwaitingStartAck,
    Streaming { sector: u16, seq: u8 },
    AwaitingFinalProgress,
    Done,
    Failed(OtaError),
}

/// Shared hub between the BLE stack callbacks and the session task.
///
/// The host routes every notification, subscription error and disconnect
/// event here; the session parks on the signal and the progress tracker.
/// Once teardown has begun, late callbacks are dropped.
pub struct NotificationMux<M: RawMutex> {
    pub(crate) progress: ProgressTracker<M>,
    pub(crate) start_ack: Signal<M, Result<(), OtaError>>,
    phase: Mutex<M, Cell<SessionPhase>>,
    cleanup: AtomicBool,
    active: AtomicBool,
    lost: AtomicBool,
}

impl<M: RawMutex> NotificationMux<M> {
    pub const fn new() -> Self {
        NotificationMux {
            progress: ProgressTracker::new(),
            start_ack: Signal::new(),
            phase: Mutex::new(Cell::new(SessionPhase::Idle)),
            // no session yet: stray callbacks are dropped
            cleanup: AtomicBool::new(true),
            active: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        }
    }

    /// Notification arrived on `ch`. Called from the BLE stack context.
    pub fn notify(&self, ch: OtaCharacteristic, payload: &[u8]) {
        if self.cleanup.load(Ordering::Acquire) {
            return;
        }
        match ch {
            OtaCharacteristic::Command => {
                // any first notification here resolves the start ack; a
                // parseable rejected status is only worth a log line
                if let Ok(ack) = CommandAck::parse(payload) {
                    if ack.status != ACK_ACCEPTED {
                        warn!("device rejected command {}, status {}", ack.command, ack.status);
                    }
                }
                self.start_ack.signal(Ok(()));
            }
            OtaCharacteristic::Progress => {
                if let Some(&pct) = payload.first() {
                    self.progress.update(pct);
                }
            }
            OtaCharacteristic::RecvFw => {
                trace!("recv-fw echo, {} bytes", payload.len());
            }
            OtaCharacteristic::Customer => {
                trace!("customer notification, {} bytes", payload.len());
            }
        }
    }

    /// A subscription raised an error. Fatal outside teardown.
    pub fn subscription_error(&self, ch: OtaCharacteristic) {
        if self.cleanup.load(Ordering::Acquire) {
            return;
        }
        warn!("subscription error on {:?}", ch);
        let err = OtaError::SubscriptionError(ch);
        self.start_ack.signal(Err(err));
        self.progress.reject_all(err);
    }

    /// The link dropped. Fatal outside teardown.
    pub fn connection_lost(&self) {
        if self.cleanup.load(Ordering::Acquire) {
            return;
        }
        warn!("link lost during ota session");
        self.lost.store(true, Ordering::Release);
        self.start_ack.signal(Err(OtaError::Disconnected));
        self.progress.reject_all(OtaError::Disconnected);
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.lock(|p| p.get())
    }

    /// Latest device-reported percentage.
    pub fn progress_pct(&self) -> u8 {
        self.progress.current()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn begin_session(&self) -> Result<(), OtaError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(OtaError::Busy);
        }
        self.progress.reset();
        self.start_ack.reset();
        self.lost.store(false, Ordering::Release);
        self.set_phase(SessionPhase::Idle);
        self.cleanup.store(false, Ordering::Release);
        Ok(())
    }

    /// First call wins; a second teardown is a no-op.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.cleanup.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn release(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn link_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.phase.lock(|p| p.set(phase));
    }
}

impl<M: RawMutex> Default for NotificationMux<M> {
    fn default() -> Self {
        Self::new()
    }
}
