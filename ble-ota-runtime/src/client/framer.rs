//! Pure image framing: sectors, sequences and the per-sector CRC.

use ble_ota_schema::crc::crc16;
use ble_ota_schema::{DataPacket, StartCommand, COMMAND_LEN, MAX_CHUNK_SIZE, SECTOR_SIZE, SEQ_FINAL};

use super::OtaError;

/// Smallest chunk size that keeps a full sector's numeric sequence bytes
/// below the [`SEQ_FINAL`] tag.
pub const MIN_CHUNK_SIZE: usize = 16;

/// Splits a firmware image into on-wire packets. Deterministic; holds no
/// transfer state.
pub struct Framer<'a> {
    image: &'a [u8],
    chunk_size: usize,
}

impl<'a> Framer<'a> {
    pub fn new(image: &'a [u8], chunk_size: usize) -> Result<Self, OtaError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(OtaError::InvalidChunkSize);
        }
        Ok(Framer { image, chunk_size })
    }

    pub fn image_len(&self) -> u32 {
        self.image.len() as u32
    }

    pub fn sector_count(&self) -> usize {
        self.image.len().div_ceil(SECTOR_SIZE)
    }

    pub fn start_command(&self) -> [u8; COMMAND_LEN] {
        StartCommand {
            firmware_len: self.image_len(),
        }
        .encode()
    }

    fn sector_bytes(&self, sector: usize) -> &'a [u8] {
        let start = sector * SECTOR_SIZE;
        let end = (start + SECTOR_SIZE).min(self.image.len());
        &self.image[start..end]
    }

    /// Packets of one sector, in transmit order. The last one is tagged
    /// [`SEQ_FINAL`] and carries the sector CRC.
    pub fn frames(&self, sector: usize) -> SectorFrames<'a> {
        let bytes = self.sector_bytes(sector);
        SectorFrames {
            sector: sector as u16,
            chunk_size: self.chunk_size,
            remaining: bytes,
            seq: 0,
            crc: crc16(bytes),
            done: false,
        }
    }

    /// Percentage the device must report before the next sector may be
    /// streamed: bytes emitted through `sector`, floored against the
    /// image length.
    pub fn expected_progress(&self, sector: usize) -> u8 {
        if self.image.is_empty() {
            return 100;
        }
        let len = self.image.len() as u64;
        let emitted = ((sector + 1) * SECTOR_SIZE).min(self.image.len()) as u64;
        (emitted * 100 / len) as u8
    }
}

pub struct SectorFrames<'a> {
    sector: u16,
    chunk_size: usize,
    remaining: &'a [u8],
    seq: u8,
    crc: u16,
    done: bool,
}

impl<'a> Iterator for SectorFrames<'a> {
    type Item = DataPacket<'a>;

    fn next(&mut self) -> Option<DataPacket<'a>> {
        if self.done {
            return None;
        }
        if self.remaining.len() <= self.chunk_size {
            self.done = true;
            return Some(DataPacket {
                sector_index: self.sector,
                seq: SEQ_FINAL,
                payload: self.remaining,
                sector_crc: Some(self.crc),
            });
        }
        let (head, tail) = self.remaining.split_at(self.chunk_size);
        self.remaining = tail;
        let seq = self.seq;
        self.seq += 1;
        Some(DataPacket {
            sector_index: self.sector,
            seq,
            payload: head,
            sector_crc: None,
        })
    }
}
