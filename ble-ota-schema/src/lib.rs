//! Wire contract for the BLE OTA firmware update protocol.
//!
//! Shared by the client orchestrator and the device receiver. All
//! multi-byte integers are little-endian; frames carry a CRC-16 trailer
//! (see [`crc`]). The layouts here are fixed by the deployed device
//! population and must not change.

#![cfg_attr(not(test), no_std)]

pub mod crc;

use crc::crc16;

/// 16-bit alias of the OTA GATT service UUID.
pub const OTA_SERVICE_UUID16: u16 = 0x8018;

/// Firmware stream unit. Each sector carries its own CRC-16.
pub const SECTOR_SIZE: usize = 4096;

/// Chunk size used by the reference client (fits a 512-byte ATT MTU with
/// room for the packet header and CRC trailer).
pub const RECOMMENDED_CHUNK_SIZE: usize = 492;

/// Upper bound on a data packet payload.
pub const MAX_CHUNK_SIZE: usize = 512;

/// Data packet header (sector index + sequence byte).
pub const DATA_HEADER_LEN: usize = 3;

/// Largest possible on-wire data packet.
pub const MAX_PACKET_LEN: usize = DATA_HEADER_LEN + MAX_CHUNK_SIZE + 2;

/// Sequence byte tagging the last packet of a sector. The final packet
/// carries the sector CRC trailer regardless of its numeric position.
pub const SEQ_FINAL: u8 = 0xFF;

/// Command and ack frames are a fixed 20 bytes.
pub const COMMAND_LEN: usize = 20;

pub const CMD_START: u16 = 0x0001;
pub const CMD_ACK: u16 = 0x0003;

pub const ACK_ACCEPTED: u16 = 0x0000;
pub const ACK_REJECTED: u16 = 0x0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WireError {
    TooShort,
    BufferTooSmall,
    BadCrc,
    UnknownCommand,
    PayloadTooLarge,
}

/// The four characteristics of the OTA service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaCharacteristic {
    /// Firmware data packets, client to device. Notify side is unused in
    /// normal operation.
    RecvFw,
    /// One-byte progress percentage, device to client.
    Progress,
    /// Start command (write) and its ack (notify).
    Command,
    /// Reserved; subscribed for error monitoring only.
    Customer,
}

impl OtaCharacteristic {
    pub const ALL: [OtaCharacteristic; 4] = [
        OtaCharacteristic::RecvFw,
        OtaCharacteristic::Progress,
        OtaCharacteristic::Command,
        OtaCharacteristic::Customer,
    ];

    pub const fn uuid16(self) -> u16 {
        match self {
            OtaCharacteristic::RecvFw => 0x8020,
            OtaCharacteristic::Progress => 0x8021,
            OtaCharacteristic::Command => 0x8022,
            OtaCharacteristic::Customer => 0x8023,
        }
    }

    /// Full 128-bit UUID on the Bluetooth base, little-endian, as GATT
    /// tables want it.
    pub const fn uuid128(self) -> [u8; 16] {
        uuid128_from_uuid16(self.uuid16())
    }
}

/// Expands a 16-bit alias onto the Bluetooth base UUID
/// `0000xxxx-0000-1000-8000-00805f9b34fb`, little-endian.
pub const fn uuid128_from_uuid16(uuid16: u16) -> [u8; 16] {
    let [lo, hi] = uuid16.to_le_bytes();
    [
        0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, lo, hi, 0x00,
        0x00,
    ]
}

/// Session start command, written once on [`OtaCharacteristic::Command`].
///
/// Layout: `u16 0x0001 | u32 firmware_len | 12 zero bytes | u16 crc16`
/// where the CRC covers bytes 0..18.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartCommand {
    pub firmware_len: u32,
}

impl StartCommand {
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut buf = [0u8; COMMAND_LEN];
        buf[0..2].copy_from_slice(&CMD_START.to_le_bytes());
        buf[2..6].copy_from_slice(&self.firmware_len.to_le_bytes());
        let crc = crc16(&buf[..COMMAND_LEN - 2]);
        buf[18..20].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < COMMAND_LEN {
            return Err(WireError::TooShort);
        }
        if u16::from_le_bytes([data[0], data[1]]) != CMD_START {
            return Err(WireError::UnknownCommand);
        }
        let trailer = u16::from_le_bytes([data[18], data[19]]);
        if crc16(&data[..COMMAND_LEN - 2]) != trailer {
            return Err(WireError::BadCrc);
        }
        Ok(StartCommand {
            firmware_len: u32::from_le_bytes([data[2], data[3], data[4], data[5]]),
        })
    }
}

/// Device reply to a command, notified on [`OtaCharacteristic::Command`].
/// Same 20-byte shape as the command frames: `u16 0x0003 | u16 echoed
/// command | u16 status | padding | u16 crc16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandAck {
    pub command: u16,
    pub status: u16,
}

impl CommandAck {
    pub fn accepted(command: u16) -> Self {
        CommandAck {
            command,
            status: ACK_ACCEPTED,
        }
    }

    pub fn rejected(command: u16) -> Self {
        CommandAck {
            command,
            status: ACK_REJECTED,
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut buf = [0u8; COMMAND_LEN];
        buf[0..2].copy_from_slice(&CMD_ACK.to_le_bytes());
        buf[2..4].copy_from_slice(&self.command.to_le_bytes());
        buf[4..6].copy_from_slice(&self.status.to_le_bytes());
        let crc = crc16(&buf[..COMMAND_LEN - 2]);
        buf[18..20].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < COMMAND_LEN {
            return Err(WireError::TooShort);
        }
        if u16::from_le_bytes([data[0], data[1]]) != CMD_ACK {
            return Err(WireError::UnknownCommand);
        }
        let trailer = u16::from_le_bytes([data[18], data[19]]);
        if crc16(&data[..COMMAND_LEN - 2]) != trailer {
            return Err(WireError::BadCrc);
        }
        Ok(CommandAck {
            command: u16::from_le_bytes([data[2], data[3]]),
            status: u16::from_le_bytes([data[4], data[5]]),
        })
    }
}

/// One firmware data packet, written on [`OtaCharacteristic::RecvFw`].
///
/// Layout: `u16 sector_index | u8 seq | payload`, with a trailing
/// `u16 sector_crc` present exactly when `seq == SEQ_FINAL`. The CRC
/// covers the whole sector's payload bytes, not just this packet's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub sector_index: u16,
    pub seq: u8,
    pub payload: &'a [u8],
    pub sector_crc: Option<u16>,
}

impl<'a> DataPacket<'a> {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        if self.payload.len() > MAX_CHUNK_SIZE {
            return Err(WireError::PayloadTooLarge);
        }
        let trailer = if self.sector_crc.is_some() { 2 } else { 0 };
        let len = DATA_HEADER_LEN + self.payload.len() + trailer;
        if buf.len() < len {
            return Err(WireError::BufferTooSmall);
        }
        buf[0..2].copy_from_slice(&self.sector_index.to_le_bytes());
        buf[2] = self.seq;
        buf[DATA_HEADER_LEN..DATA_HEADER_LEN + self.payload.len()].copy_from_slice(self.payload);
        if let Some(crc) = self.sector_crc {
            buf[len - 2..len].copy_from_slice(&crc.to_le_bytes());
        }
        Ok(len)
    }

    pub fn parse(data: &'a [u8]) -> Result<Self, WireError> {
        if data.len() < DATA_HEADER_LEN {
            return Err(WireError::TooShort);
        }
        let sector_index = u16::from_le_bytes([data[0], data[1]]);
        let seq = data[2];
        if seq == SEQ_FINAL {
            if data.len() < DATA_HEADER_LEN + 2 {
                return Err(WireError::TooShort);
            }
            let crc_at = data.len() - 2;
            Ok(DataPacket {
                sector_index,
                seq,
                payload: &data[DATA_HEADER_LEN..crc_at],
                sector_crc: Some(u16::from_le_bytes([data[crc_at], data[crc_at + 1]])),
            })
        } else {
            Ok(DataPacket {
                sector_index,
                seq,
                payload: &data[DATA_HEADER_LEN..],
                sector_crc: None,
            })
        }
    }
}
