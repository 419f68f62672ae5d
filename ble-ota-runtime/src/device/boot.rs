//! Boot allegiance: rollback-aware startup and the end-of-stream commit.

use super::flash::{ImageState, OtaFlash, Partition, PartitionKind, SlotId};
use super::{err, DeviceError};

/// Runs before any OTA write. A running image still in
/// [`ImageState::PendingVerify`] is the previous transfer booting for the
/// first time; confirming it here cancels the boot loader's rollback. A
/// boot that never reaches this point stays pending and is rolled back on
/// the next reset.
pub fn ensure_running_valid<F: OtaFlash>(flash: &mut F) -> Result<Partition, DeviceError> {
    let running = flash.running_partition().map_err(err::running_partition)?;
    if running.kind != PartitionKind::App {
        return Err(DeviceError::NotAppPartition);
    }
    let state = flash.image_state(running.slot).map_err(err::state_read)?;
    if state == ImageState::PendingVerify {
        flash
            .mark_valid_cancel_rollback()
            .map_err(err::mark_valid)?;
        info!("marked running image as valid");
    }
    Ok(running)
}

/// End of stream: seal the standby image and switch boot allegiance.
/// The boot slot changes only if the seal succeeded.
pub async fn finalize<F: OtaFlash>(flash: &mut F, target: SlotId) -> Result<(), DeviceError> {
    flash.end().await.map_err(err::ota_end)?;
    flash.set_boot_partition(target).map_err(err::set_boot)?;
    Ok(())
}
