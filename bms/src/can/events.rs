//! On-demand one-shot frames
//!
//! Announcement and diagnostic frames transmitted outside the periodic
//! schedule: the boot message, the die ID, the fatal error report and the
//! reply to a multiplexed message with an unknown selector value. All of
//! them are best effort and never called from interrupt context.

use crate::can::helper::{set_can_data_with_message_data, set_message_data_with_signal_data};
use crate::can::{standard_id, Endianness};
use crate::error::TransmitError;
use crate::version::VersionInfo;
use bms_core::{CanInterface, DeviceIdentity};
use embedded_can::Id;

/// Identifier of the debug response frames (boot, die ID, fatal errors).
const DEBUG_RESPONSE_ID: Id = standard_id(0x227);

/// Identifier of the unsupported-multiplexer reply frame.
const UNSUPPORTED_MULTIPLEXER_VALUE_ID: Id = standard_id(0x201);

/// Largest release distance the boot message can carry.
const MAXIMUM_RELEASE_DISTANCE: u16 = 31;

/// Bit positions within the version control byte of the boot message.
const VERSION_CONTROL_BIT: u8 = 0;
const DIRTY_FLAG_BIT: u8 = 1;
const DISTANCE_OVERFLOW_BIT: u8 = 2;
const DISTANCE_COUNTER_BIT: u8 = 3;

// unsupported-multiplexer reply signal positions
const REPLY_MESSAGE_ID_START_BIT: u8 = 0;
const REPLY_MESSAGE_ID_LENGTH: u8 = 16;
const REPLY_MULTIPLEXER_VALUE_START_BIT: u8 = 16;
const REPLY_MULTIPLEXER_VALUE_LENGTH: u8 = 16;

/// Causes a fatal error frame can report.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalErrorAction {
    /// A task stack overflowed.
    StackOverflow,
}

fn best_effort<E>(result: nb::Result<(), E>) -> Result<(), TransmitError> {
    result.map_err(|_| TransmitError)
}

/// Announces the firmware version and the MCU device ID after boot.
pub fn transmit_boot_message<C: CanInterface, D: DeviceIdentity>(
    can: &mut C,
    identity: &D,
    version: &VersionInfo,
) -> Result<(), TransmitError> {
    let mut data = [0u8; 8];
    data[0] = version.major;
    data[1] = version.minor;
    data[2] = version.patch;

    let mut version_control_byte = 0u8;
    if version.under_version_control {
        version_control_byte |= 1 << VERSION_CONTROL_BIT;
    }
    if version.is_dirty {
        version_control_byte |= 1 << DIRTY_FLAG_BIT;
    }
    if version.distance_from_last_release > MAXIMUM_RELEASE_DISTANCE {
        version_control_byte |= 1 << DISTANCE_OVERFLOW_BIT;
    }
    let distance_capped = version.distance_from_last_release.min(MAXIMUM_RELEASE_DISTANCE) as u8;
    version_control_byte |= distance_capped << DISTANCE_COUNTER_BIT;
    data[3] = version_control_byte;

    data[4..].copy_from_slice(&identity.device_id().to_be_bytes());

    best_effort(can.transmit(DEBUG_RESPONSE_ID, &data))
}

/// Announces the 64-bit die ID, high word first.
pub fn transmit_die_id<C: CanInterface, D: DeviceIdentity>(
    can: &mut C,
    identity: &D,
) -> Result<(), TransmitError> {
    let data = identity.die_id().to_be_bytes();
    best_effort(can.transmit(DEBUG_RESPONSE_ID, &data))
}

/// Reports the cause of a fatal error before the system halts. Best
/// effort; a failed transmission is not retried.
pub fn send_fatal_error<C: CanInterface>(can: &mut C, action: FatalErrorAction) {
    let mut data = [0u8; 8];
    match action {
        FatalErrorAction::StackOverflow => {
            data[0] = 1;
        }
    }
    let _ = can.transmit(DEBUG_RESPONSE_ID, &data);
}

/// Replies to a multiplexed message that carried an unknown selector.
pub fn unsupported_multiplexer_value<C: CanInterface>(
    can: &mut C,
    message_id: u32,
    multiplexer_value: u32,
) {
    let mut message = 0u64;
    set_message_data_with_signal_data(
        &mut message,
        REPLY_MESSAGE_ID_START_BIT,
        REPLY_MESSAGE_ID_LENGTH,
        message_id.into(),
        Endianness::Big,
    );
    set_message_data_with_signal_data(
        &mut message,
        REPLY_MULTIPLEXER_VALUE_START_BIT,
        REPLY_MULTIPLEXER_VALUE_LENGTH,
        multiplexer_value.into(),
        Endianness::Big,
    );
    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, Endianness::Big);
    let _ = can.transmit(UNSUPPORTED_MULTIPLEXER_VALUE_ID, &data);
}
