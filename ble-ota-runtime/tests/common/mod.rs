//! In-memory collaborators wiring the two protocol halves together.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use ble_ota_runtime::client::{Framer, GattClient, NotificationMux, SessionTimeouts};
use ble_ota_runtime::device::{
    FlashWriterConfig, ImageState, OtaFlash, OtaHost, OtaReceiver, Partition, PartitionKind,
    SlotId, TransferState,
};
use ble_ota_schema::{CommandAck, OtaCharacteristic, CMD_START, MAX_PACKET_LEN, SEQ_FINAL};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;

pub type Raw = CriticalSectionRawMutex;
pub type Mux = NotificationMux<Raw>;
pub type Transfer = TransferState<Raw>;

pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

pub fn short_timeouts() -> SessionTimeouts {
    SessionTimeouts {
        start_ack: Duration::from_millis(50),
        sector_progress: Duration::from_millis(80),
        final_progress: Duration::from_millis(80),
    }
}

pub fn short_writer_config() -> FlashWriterConfig {
    FlashWriterConfig {
        recv_timeout: Duration::from_millis(100),
        flash_gate_timeout: Duration::from_millis(100),
        reboot_delay: Duration::from_millis(5),
    }
}

/// Encodes and delivers a whole image to the device receiver, the way the
/// radio would.
pub fn feed_receiver(receiver: &OtaReceiver<'_, Raw>, img: &[u8], chunk: usize) {
    let framer = Framer::new(img, chunk).unwrap();
    let mut buf = [0u8; MAX_PACKET_LEN];
    for sector in 0..framer.sector_count() {
        for frame in framer.frames(sector) {
            let len = frame.encode(&mut buf).unwrap();
            receiver.on_firmware_write(&buf[..len]);
        }
    }
}

// ── flash ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashOp {
    MarkValid,
    Begin(SlotId),
    Write(usize),
    End,
    SetBoot(SlotId),
}

pub struct FlashInner {
    pub running: Partition,
    pub states: [ImageState; 2],
    pub boot_slot: SlotId,
    pub written: Vec<u8>,
    pub ops: Vec<FlashOp>,
    pub fail_write: bool,
}

/// Two-slot partition table with an operation journal.
#[derive(Clone)]
pub struct MemFlash(Rc<RefCell<FlashInner>>);

fn slot_index(slot: SlotId) -> usize {
    match slot {
        SlotId::Ota0 => 0,
        SlotId::Ota1 => 1,
    }
}

impl MemFlash {
    pub fn new(running: SlotId, running_state: ImageState) -> Self {
        let mut states = [ImageState::Valid; 2];
        states[slot_index(running)] = running_state;
        MemFlash(Rc::new(RefCell::new(FlashInner {
            running: Partition {
                slot: running,
                kind: PartitionKind::App,
            },
            states,
            boot_slot: running,
            written: Vec::new(),
            ops: Vec::new(),
            fail_write: false,
        })))
    }

    pub fn set_fail_write(&self) {
        self.0.borrow_mut().fail_write = true;
    }

    pub fn set_running_kind_data(&self) {
        self.0.borrow_mut().running.kind = PartitionKind::Data;
    }

    pub fn inner(&self) -> std::cell::Ref<'_, FlashInner> {
        self.0.borrow()
    }

    pub fn op_position(&self, op: FlashOp) -> Option<usize> {
        self.0.borrow().ops.iter().position(|o| *o == op)
    }

    pub fn first_write_position(&self) -> Option<usize> {
        self.0
            .borrow()
            .ops
            .iter()
            .position(|o| matches!(o, FlashOp::Write(_)))
    }
}

impl OtaFlash for MemFlash {
    type Error = ();

    fn running_partition(&self) -> Result<Partition, ()> {
        Ok(self.0.borrow().running)
    }

    fn image_state(&self, slot: SlotId) -> Result<ImageState, ()> {
        Ok(self.0.borrow().states[slot_index(slot)])
    }

    fn mark_valid_cancel_rollback(&mut self) -> Result<(), ()> {
        let mut flash = self.0.borrow_mut();
        let running = flash.running.slot;
        flash.states[slot_index(running)] = ImageState::Valid;
        flash.ops.push(FlashOp::MarkValid);
        Ok(())
    }

    async fn begin(&mut self, slot: SlotId) -> Result<(), ()> {
        let mut flash = self.0.borrow_mut();
        flash.states[slot_index(slot)] = ImageState::New;
        flash.written.clear();
        flash.ops.push(FlashOp::Begin(slot));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), ()> {
        let mut flash = self.0.borrow_mut();
        if flash.fail_write {
            return Err(());
        }
        flash.written.extend_from_slice(data);
        let len = data.len();
        flash.ops.push(FlashOp::Write(len));
        Ok(())
    }

    async fn end(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().ops.push(FlashOp::End);
        Ok(())
    }

    fn set_boot_partition(&mut self, slot: SlotId) -> Result<(), ()> {
        let mut flash = self.0.borrow_mut();
        flash.boot_slot = slot;
        flash.ops.push(FlashOp::SetBoot(slot));
        Ok(())
    }
}

// ── host ─────────────────────────────────────────────────────

/// Records progress and reboots without a client attached.
#[derive(Clone, Default)]
pub struct RecordingHost {
    pub progress: Rc<RefCell<Vec<u8>>>,
    pub reboots: Rc<Cell<u32>>,
}

impl OtaHost for RecordingHost {
    fn notify_progress(&mut self, pct: u8) {
        self.progress.borrow_mut().push(pct);
    }

    fn reboot(&mut self) {
        self.reboots.set(self.reboots.get() + 1);
    }
}

/// Forwards progress notifications into the client mux, like the radio
/// would, and records them.
#[derive(Clone)]
pub struct LoopbackHost<'a> {
    pub mux: &'a Mux,
    pub progress: Rc<RefCell<Vec<u8>>>,
    pub reboots: Rc<Cell<u32>>,
}

impl<'a> LoopbackHost<'a> {
    pub fn new(mux: &'a Mux) -> Self {
        LoopbackHost {
            mux,
            progress: Rc::default(),
            reboots: Rc::default(),
        }
    }
}

impl OtaHost for LoopbackHost<'_> {
    fn notify_progress(&mut self, pct: u8) {
        self.progress.borrow_mut().push(pct);
        self.mux.notify(OtaCharacteristic::Progress, &[pct]);
    }

    fn reboot(&mut self) {
        self.reboots.set(self.reboots.get() + 1);
    }
}

// ── links ────────────────────────────────────────────────────

/// Full-stack link: client writes land in the device receiver, device
/// notifications land in the client mux.
pub struct LoopbackLink<'a> {
    pub receiver: &'a OtaReceiver<'a, Raw>,
    pub mux: &'a Mux,
    pub subscribed: Rc<RefCell<Vec<OtaCharacteristic>>>,
    pub unsubscribed: Rc<RefCell<Vec<OtaCharacteristic>>>,
}

impl<'a> LoopbackLink<'a> {
    pub fn new(receiver: &'a OtaReceiver<'a, Raw>, mux: &'a Mux) -> Self {
        LoopbackLink {
            receiver,
            mux,
            subscribed: Rc::default(),
            unsubscribed: Rc::default(),
        }
    }
}

impl GattClient for LoopbackLink<'_> {
    type Error = ();

    fn has_characteristic(&self, _ch: OtaCharacteristic) -> bool {
        true
    }

    async fn subscribe(&mut self, ch: OtaCharacteristic) -> Result<(), ()> {
        self.subscribed.borrow_mut().push(ch);
        Ok(())
    }

    async fn unsubscribe(&mut self, ch: OtaCharacteristic) -> Result<(), ()> {
        self.unsubscribed.borrow_mut().push(ch);
        Ok(())
    }

    async fn write_with_response(
        &mut self,
        ch: OtaCharacteristic,
        payload: &[u8],
    ) -> Result<(), ()> {
        match ch {
            OtaCharacteristic::Command => {
                if let Ok(ack) = self.receiver.on_command_write(payload) {
                    self.mux.notify(OtaCharacteristic::Command, &ack);
                }
                Ok(())
            }
            OtaCharacteristic::RecvFw => {
                self.receiver.on_firmware_write(payload);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Device stand-in with scripted behavior, for the failure scenarios.
pub struct ScriptedLink<'a> {
    pub mux: &'a Mux,
    pub ack_start: bool,
    pub missing: Option<OtaCharacteristic>,
    /// Progress value notified after each final-sequence packet, until
    /// the script runs dry.
    pub sector_progress: RefCell<VecDeque<u8>>,
    pub subscribed: Rc<RefCell<Vec<OtaCharacteristic>>>,
    pub unsubscribed: Rc<RefCell<Vec<OtaCharacteristic>>>,
}

impl<'a> ScriptedLink<'a> {
    pub fn new(mux: &'a Mux, ack_start: bool) -> Self {
        ScriptedLink {
            mux,
            ack_start,
            missing: None,
            sector_progress: RefCell::new(VecDeque::new()),
            subscribed: Rc::default(),
            unsubscribed: Rc::default(),
        }
    }

    pub fn with_missing(mut self, ch: OtaCharacteristic) -> Self {
        self.missing = Some(ch);
        self
    }

    pub fn with_sector_progress(self, values: &[u8]) -> Self {
        self.sector_progress.borrow_mut().extend(values);
        self
    }
}

impl GattClient for ScriptedLink<'_> {
    type Error = ();

    fn has_characteristic(&self, ch: OtaCharacteristic) -> bool {
        self.missing != Some(ch)
    }

    async fn subscribe(&mut self, ch: OtaCharacteristic) -> Result<(), ()> {
        self.subscribed.borrow_mut().push(ch);
        Ok(())
    }

    async fn unsubscribe(&mut self, ch: OtaCharacteristic) -> Result<(), ()> {
        self.unsubscribed.borrow_mut().push(ch);
        Ok(())
    }

    async fn write_with_response(
        &mut self,
        ch: OtaCharacteristic,
        payload: &[u8],
    ) -> Result<(), ()> {
        match ch {
            OtaCharacteristic::Command => {
                if self.ack_start {
                    let ack = CommandAck::accepted(CMD_START).encode();
                    self.mux.notify(OtaCharacteristic::Command, &ack);
                }
            }
            OtaCharacteristic::RecvFw => {
                if payload.get(2) == Some(&SEQ_FINAL) {
                    if let Some(pct) = self.sector_progress.borrow_mut().pop_front() {
                        self.mux.notify(OtaCharacteristic::Progress, &[pct]);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
