//! GATT-facing decode layer: start command handling and sector
//! reassembly. Runs in the BLE stack context and never blocks.

use core::cell::RefCell;
use core::mem;
use core::sync::atomic::Ordering;

use ble_ota_schema::crc::Crc16;
use ble_ota_schema::{
    CommandAck, DataPacket, StartCommand, WireError, CMD_START, COMMAND_LEN, SEQ_FINAL,
};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::pump::IngressPump;
use super::writer::{SectorBuf, TransferState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveError {
    UnexpectedSector { got: u16, expected: u16 },
    UnexpectedSequence { got: u8, expected: u8 },
    SectorOverflow,
    CrcMismatch,
}

/// Reassembles one sector at a time from arbitrarily chunked packets.
/// The sender's chunk size is irrelevant; only ordering and the sector
/// CRC are enforced. Any violation drops the sector in progress and
/// rewinds to its start.
struct SectorAssembler {
    next_sector: u16,
    next_seq: u8,
    buf: SectorBuf,
    crc: Crc16,
}

impl SectorAssembler {
    const fn new() -> Self {
        SectorAssembler {
            next_sector: 0,
            next_seq: 0,
            buf: SectorBuf::new(),
            crc: Crc16::new(),
        }
    }

    fn rewind(&mut self) {
        self.next_seq = 0;
        self.buf.clear();
        self.crc = Crc16::new();
    }

    fn feed(&mut self, pkt: &DataPacket) -> Result<Option<SectorBuf>, ReceiveError> {
        if pkt.sector_index != self.next_sector {
            let err = ReceiveError::UnexpectedSector {
                got: pkt.sector_index,
                expected: self.next_sector,
            };
            self.rewind();
            return Err(err);
        }
        if pkt.seq != SEQ_FINAL && pkt.seq != self.next_seq {
            let err = ReceiveError::UnexpectedSequence {
                got: pkt.seq,
                expected: self.next_seq,
            };
            self.rewind();
            return Err(err);
        }
        if self.buf.extend_from_slice(pkt.payload).is_err() {
            self.rewind();
            return Err(ReceiveError::SectorOverflow);
        }
        self.crc.update(pkt.payload);

        if pkt.seq == SEQ_FINAL {
            if pkt.sector_crc != Some(self.crc.finish()) {
                self.rewind();
                return Err(ReceiveError::CrcMismatch);
            }
            let sector = mem::take(&mut self.buf);
            self.next_sector += 1;
            self.rewind();
            Ok(Some(sector))
        } else {
            self.next_seq += 1;
            Ok(None)
        }
    }
}

/// Write-callback endpoints for the command and recv-fw characteristics.
pub struct OtaReceiver<'a, M: RawMutex> {
    transfer: &'a TransferState<M>,
    pump: IngressPump<'a, M>,
    assembler: Mutex<M, RefCell<SectorAssembler>>,
}

impl<'a, M: RawMutex> OtaReceiver<'a, M> {
    pub fn new(transfer: &'a TransferState<M>) -> Self {
        OtaReceiver {
            transfer,
            pump: IngressPump::new(transfer),
            assembler: Mutex::new(RefCell::new(SectorAssembler::new())),
        }
    }

    /// Command characteristic write. Stashes the announced firmware
    /// length and returns the ack frame to notify back to the client.
    pub fn on_command_write(&self, data: &[u8]) -> Result<[u8; COMMAND_LEN], WireError> {
        match StartCommand::parse(data) {
            Ok(cmd) => {
                info!("start command, firmware length {}", cmd.firmware_len);
                self.transfer
                    .fw_length
                    .store(cmd.firmware_len, Ordering::Release);
                Ok(CommandAck::accepted(CMD_START).encode())
            }
            Err(WireError::BadCrc) => {
                warn!("start command with bad trailer crc");
                Ok(CommandAck::rejected(CMD_START).encode())
            }
            Err(e) => Err(e),
        }
    }

    /// Recv-fw characteristic write. The first invocation wakes the
    /// flash-writer task; completed sectors go to the ring, violations
    /// are dropped and logged.
    pub fn on_firmware_write(&self, data: &[u8]) {
        self.pump.mark_started();

        let pkt = match DataPacket::parse(data) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("dropping malformed data packet: {:?}", e);
                return;
            }
        };
        match self.assembler.lock(|a| a.borrow_mut().feed(&pkt)) {
            Ok(Some(sector)) => self.pump.push(sector),
            Ok(None) => {}
            Err(e) => warn!("dropping sector {}: {:?}", pkt.sector_index, e),
        }
    }
}
