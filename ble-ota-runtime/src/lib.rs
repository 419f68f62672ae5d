//! BLE OTA firmware update protocol engine.
//!
//! Two halves of one transfer protocol:
//!
//! - [`client`] drives a session from the mobile side: frame the image
//!   into sectors and chunks, send the start command, stream data and
//!   gate each sector on the device-reported progress percentage.
//! - [`device`] receives on the embedded side: reassemble and verify
//!   sectors in the radio context, hand them through a bounded ring to a
//!   dedicated flash-writer task, and switch boot allegiance once the
//!   standby partition holds the complete image.
//!
//! Radio, flash and reboot primitives are collaborator traits
//! ([`client::GattClient`], [`device::OtaFlash`], [`device::OtaHost`]);
//! firmware and mobile hosts wire them to their platform stacks.

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// This mod must go first so the others see its macros.
mod fmt;

pub mod client;
pub mod device;

pub use ble_ota_schema as schema;
pub use heapless;
