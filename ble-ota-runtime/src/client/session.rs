//! End-to-end OTA session driver.

use ble_ota_schema::{OtaCharacteristic, MAX_PACKET_LEN};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{with_timeout, Duration};

use super::framer::Framer;
use super::mux::{NotificationMux, SessionPhase};
use super::OtaError;

/// Connected GATT transport, as provided by the host platform. Services
/// are assumed discovered and the MTU negotiated before a session starts.
///
/// Inbound traffic is not part of this trait: the host must route
/// notifications, subscription errors and the disconnect event for this
/// device into the session's [`NotificationMux`].
pub trait GattClient {
    type Error;

    /// Whether the characteristic handle was resolved during discovery.
    fn has_characteristic(&self, ch: OtaCharacteristic) -> bool;
    async fn subscribe(&mut self, ch: OtaCharacteristic) -> Result<(), Self::Error>;
    async fn unsubscribe(&mut self, ch: OtaCharacteristic) -> Result<(), Self::Error>;
    async fn write_with_response(
        &mut self,
        ch: OtaCharacteristic,
        payload: &[u8],
    ) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug)]
pub struct SessionTimeouts {
    /// Start command written until the ack notification.
    pub start_ack: Duration,
    /// Sector streamed until the device reports the expected percentage.
    pub sector_progress: Duration,
    /// Last sector acknowledged until 100 % is reported.
    pub final_progress: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        SessionTimeouts {
            start_ack: Duration::from_millis(3000),
            sector_progress: Duration::from_millis(5000),
            final_progress: Duration::from_millis(5000),
        }
    }
}

/// Owns one OTA session end to end: subscriptions, the start handshake,
/// the progress-gated sector stream and the unconditional teardown.
///
/// Flow control is the progress feedback alone: sector `s + 1` is not
/// streamed until the device reports sector `s` absorbed. There are no
/// per-packet acks.
pub struct SessionController<'a, L: GattClient, M: RawMutex> {
    link: L,
    mux: &'a NotificationMux<M>,
    timeouts: SessionTimeouts,
}

impl<'a, L: GattClient, M: RawMutex> SessionController<'a, L, M> {
    pub fn new(link: L, mux: &'a NotificationMux<M>) -> Self {
        SessionController {
            link,
            mux,
            timeouts: SessionTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Transfers `image` to the connected device. Terminal on any error;
    /// teardown always runs, including on cancellation at any await
    /// point after the session became active.
    pub async fn run_ota(&mut self, image: &[u8], chunk_size: usize) -> Result<(), OtaError> {
        self.mux.begin_session()?;
        info!("ota session start, {} bytes", image.len());

        let result = self.transfer(image, chunk_size).await;
        self.teardown(&result).await;

        match &result {
            Ok(()) => info!("ota session complete"),
            Err(e) => error!("ota session failed: {:?}", e),
        }
        result
    }

    async fn transfer(&mut self, image: &[u8], chunk_size: usize) -> Result<(), OtaError> {
        for ch in OtaCharacteristic::ALL {
            if !self.link.has_characteristic(ch) {
                return Err(OtaError::ProfileIncomplete);
            }
        }
        let framer = Framer::new(image, chunk_size)?;

        for ch in OtaCharacteristic::ALL {
            self.link
                .subscribe(ch)
                .await
                .map_err(|_| OtaError::SubscriptionError(ch))?;
        }

        self.mux.set_phase(SessionPhase::AwaitingStartAck);
        let start = framer.start_command();
        self.write(OtaCharacteristic::Command, &start).await?;
        with_timeout(self.timeouts.start_ack, self.mux.start_ack.wait())
            .await
            .map_err(|_| OtaError::StartTimeout)??;

        let mut buf = [0u8; MAX_PACKET_LEN];
        for sector in 0..framer.sector_count() {
            for packet in framer.frames(sector) {
                self.mux.set_phase(SessionPhase::Streaming {
                    sector: packet.sector_index,
                    seq: packet.seq,
                });
                let len = packet
                    .encode(&mut buf)
                    .map_err(|_| OtaError::InvalidChunkSize)?;
                self.write(OtaCharacteristic::RecvFw, &buf[..len]).await?;
            }
            let expected = framer.expected_progress(sector);
            debug!("sector {} streamed, waiting for {}%", sector, expected);
            with_timeout(
                self.timeouts.sector_progress,
                self.mux.progress.wait_for(expected),
            )
            .await
            .map_err(|_| OtaError::ProgressStall)??;
        }

        self.mux.set_phase(SessionPhase::AwaitingFinalProgress);
        if framer.sector_count() == 0 {
            // nothing was streamed, so the device never reports progress;
            // this is the stall path, not the post-stream wait
            with_timeout(self.timeouts.sector_progress, self.mux.progress.wait_for(100))
                .await
                .map_err(|_| OtaError::ProgressStall)??;
        } else {
            with_timeout(self.timeouts.final_progress, self.mux.progress.wait_for(100))
                .await
                .map_err(|_| OtaError::FinalProgressTimeout)??;
        }
        Ok(())
    }

    async fn write(&mut self, ch: OtaCharacteristic, payload: &[u8]) -> Result<(), OtaError> {
        self.link.write_with_response(ch, payload).await.map_err(|_| {
            if self.mux.link_lost() {
                OtaError::Disconnected
            } else {
                OtaError::WriteFailed(ch)
            }
        })
    }

    async fn teardown(&mut self, result: &Result<(), OtaError>) {
        if !self.mux.begin_teardown() {
            return;
        }
        for ch in OtaCharacteristic::ALL {
            // errors while tearing down are dropped
            let _ = self.link.unsubscribe(ch).await;
        }
        self.mux.progress.reject_all(match result {
            Err(e) => *e,
            Ok(()) => OtaError::Disconnected,
        });
        self.mux.set_phase(match result {
            Ok(()) => SessionPhase::Done,
            Err(e) => SessionPhase::Failed(*e),
        });
        self.mux.release();
    }
}
