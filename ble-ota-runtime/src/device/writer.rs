//! Flash-writer task: consumes the sector ring, writes the standby
//! partition and reports progress.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ble_ota_schema::SECTOR_SIZE;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Timer};
use heapless::Vec;

use super::flash::{OtaFlash, OtaHost};
use super::{boot, err, DeviceError};

/// Ring capacity in bytes; two full sectors.
pub const OTA_RINGBUF_SIZE: usize = 8192;
pub(crate) const RING_DEPTH: usize = OTA_RINGBUF_SIZE / SECTOR_SIZE;

/// One verified sector, full size except possibly the last of the image.
pub type SectorBuf = Vec<u8, SECTOR_SIZE>;

/// State shared between the radio context and the writer task for the
/// lifetime of one transfer: the sector ring, the start wakeup, the
/// firmware length stashed from the start command, and the gate that
/// bounds outstanding flash operations to one. A fresh transfer means a
/// fresh `TransferState` (the device reboots after every attempt).
pub struct TransferState<M: RawMutex> {
    pub(crate) ring: Channel<M, SectorBuf, RING_DEPTH>,
    pub(crate) started: Signal<M, ()>,
    pub(crate) ota_started: AtomicBool,
    pub(crate) fw_length: AtomicU32,
    pub(crate) flash_gate: Mutex<M, ()>,
}

impl<M: RawMutex> TransferState<M> {
    pub const fn new() -> Self {
        TransferState {
            ring: Channel::new(),
            started: Signal::new(),
            ota_started: AtomicBool::new(false),
            fw_length: AtomicU32::new(0),
            flash_gate: Mutex::new(()),
        }
    }

    /// Firmware length announced by the start command; zero until one
    /// arrives.
    pub fn fw_length(&self) -> u32 {
        self.fw_length.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.ota_started.load(Ordering::Acquire)
    }
}

impl<M: RawMutex> Default for TransferState<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FlashWriterConfig {
    /// Ring receive deadline; expiry means the client stopped sending.
    pub recv_timeout: Duration,
    /// Flash gate acquisition deadline.
    pub flash_gate_timeout: Duration,
    /// Pause before the reboot that ends every transfer, success or not.
    pub reboot_delay: Duration,
}

impl Default for FlashWriterConfig {
    fn default() -> Self {
        FlashWriterConfig {
            recv_timeout: Duration::from_millis(10_000),
            flash_gate_timeout: Duration::from_millis(10_000),
            reboot_delay: Duration::from_millis(2000),
        }
    }
}

/// The dedicated flash task. Sleeps until the first firmware write wakes
/// it, runs the transfer to completion or error, then reboots either way.
pub struct FlashWriter<'a, M: RawMutex, F: OtaFlash, H: OtaHost> {
    transfer: &'a TransferState<M>,
    flash: F,
    host: H,
    config: FlashWriterConfig,
}

impl<'a, M: RawMutex, F: OtaFlash, H: OtaHost> FlashWriter<'a, M, F, H> {
    pub fn new(transfer: &'a TransferState<M>, flash: F, host: H) -> Self {
        FlashWriter {
            transfer,
            flash,
            host,
            config: FlashWriterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FlashWriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Task body. The returned error is what was logged before the
    /// reboot; firmware entry points have no use for it, tests do.
    pub async fn run(mut self) -> Result<(), DeviceError> {
        self.transfer.started.wait().await;
        info!("ota task start");

        let result = self.run_transfer().await;
        match &result {
            Ok(()) => info!("ota upload complete, rebooting into new image"),
            Err(e) => error!("ota aborted: {:?}, rebooting", e),
        }

        Timer::after(self.config.reboot_delay).await;
        self.host.reboot();
        result
    }

    async fn run_transfer(&mut self) -> Result<(), DeviceError> {
        let running = boot::ensure_running_valid(&mut self.flash)?;
        let target = running.slot.other();

        let fw_length = self.transfer.fw_length();
        if fw_length == 0 {
            return Err(DeviceError::ZeroLength);
        }
        info!("ota total length {} bytes, target {:?}", fw_length, target);

        self.flash.begin(target).await.map_err(err::ota_begin)?;

        let mut recv_len: u32 = 0;
        loop {
            let sector = with_timeout(self.config.recv_timeout, self.transfer.ring.receive())
                .await
                .map_err(|_| DeviceError::RecvTimeout)?;

            // at most one outstanding flash operation; the guard releases
            // on every exit path
            let _gate = with_timeout(
                self.config.flash_gate_timeout,
                self.transfer.flash_gate.lock(),
            )
            .await
            .map_err(|_| DeviceError::FlashGateTimeout)?;

            self.flash.write(&sector).await.map_err(err::ota_write)?;

            recv_len += sector.len() as u32;
            let progress = (recv_len as u64 * 100 / fw_length as u64).min(100) as u8;
            debug!("recv {} of {} bytes", recv_len, fw_length);
            self.host.notify_progress(progress);

            if recv_len >= fw_length {
                break;
            }
        }

        boot::finalize(&mut self.flash, target).await
    }
}
