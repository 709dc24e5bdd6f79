//! CAN message handling
//!
//! Everything the firmware says on the bus goes through this module tree:
//! [`helper`] packs signals into frames at DBC-addressed bit positions,
//! [`tx`] fires the periodic messages from a fixed registry, [`cbs`] holds
//! one encoder per message and [`events`] the on-demand one-shot frames.

pub mod cbs;
pub mod events;
pub mod helper;
pub mod tx;

use bms_core::Duration;
use embedded_can::{Id, StandardId};

/// Byte order of the signals within a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Endianness {
    /// Motorola byte order; the start bit addresses the MSB.
    Big,
    /// Intel byte order; the start bit addresses the LSB.
    Little,
}

/// Definition of a CAN message, without its data.
#[derive(Copy, Clone)]
pub struct MessageProperties {
    /// Message identifier.
    pub id: Id,
    /// Data length code. All messages defined by this firmware use 8.
    pub dlc: u8,
    /// Byte order of the message data.
    pub endianness: Endianness,
}

/// Timing of a periodic transmit message.
#[derive(Copy, Clone)]
pub struct TxTiming {
    /// Message cycle time.
    pub period: Duration,
    /// Startup offset of the first transmission. Spreads the bus load of
    /// messages sharing a period.
    pub phase: Duration,
}

/// One signal of a message: DBC-addressed position plus scaling.
#[derive(Copy, Clone)]
pub struct Signal {
    /// Position of the first bit, DBC convention for the byte order in use.
    pub bit_start: u8,
    /// Number of bits, 1 to 64.
    pub bit_length: u8,
    /// Scaling factor applied after the offset.
    pub factor: f32,
    /// Offset applied to the physical value before scaling.
    pub offset: f32,
    /// Lower clamp of the scaled value.
    pub min: f32,
    /// Upper clamp of the scaled value.
    pub max: f32,
}

impl Signal {
    /// Signal descriptor; parameters in DBC order.
    pub const fn new(
        bit_start: u8,
        bit_length: u8,
        factor: f32,
        offset: f32,
        min: f32,
        max: f32,
    ) -> Self {
        Self {
            bit_start,
            bit_length,
            factor,
            offset,
            min,
            max,
        }
    }
}

/// Builds a standard 11-bit identifier from a compile-time constant.
pub(crate) const fn standard_id(raw: u16) -> Id {
    // Safety: the mask keeps the raw value in the valid 11-bit range.
    Id::Standard(unsafe { StandardId::new_unchecked(raw & 0x7FF) })
}

pub(crate) const fn properties(raw_id: u16, endianness: Endianness) -> MessageProperties {
    MessageProperties {
        id: standard_id(raw_id),
        dlc: 8,
        endianness,
    }
}

pub(crate) const fn timing(period_ms: u32, phase_ms: u32) -> TxTiming {
    TxTiming {
        period: Duration::from_ticks(period_ms),
        phase: Duration::from_ticks(phase_ms),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::config::NR_OF_STRINGS;
    use crate::control::{CurrentFlow, PackState, StringStatus};

    /// Freely configurable stand-in for the pack controller.
    pub(crate) struct FakeStatus {
        pub closed: [bool; NR_OF_STRINGS],
        pub system_state: CurrentFlow,
        pub pack_state: PackState,
    }

    impl FakeStatus {
        pub fn all_open() -> Self {
            Self {
                closed: [false; NR_OF_STRINGS],
                system_state: CurrentFlow::AtRest,
                pack_state: PackState::Standby,
            }
        }

        pub fn all_closed() -> Self {
            Self {
                closed: [true; NR_OF_STRINGS],
                system_state: CurrentFlow::AtRest,
                pack_state: PackState::Normal,
            }
        }
    }

    impl StringStatus for FakeStatus {
        fn is_string_closed(&self, string: usize) -> bool {
            self.closed[string]
        }

        fn number_of_connected_strings(&self) -> u8 {
            self.closed.iter().filter(|&&closed| closed).count() as u8
        }

        fn battery_system_state(&self) -> CurrentFlow {
            self.system_state
        }

        fn pack_state(&self) -> PackState {
            self.pack_state
        }
    }
}
