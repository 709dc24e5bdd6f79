//! Pack state, detail state and per-string state frames
//!
//! The signal layout of these three messages is owned by this firmware
//! (there is no third-party consumer contract); the positions are fixed
//! here and mirrored in the project DBC file.

use crate::blocks::SafetyFlags;
use crate::can::helper::{set_can_data_with_message_data, set_message_data_with_signal_data};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::NR_OF_STRINGS;

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const BMS_STATE: Signal = Signal::new(7, 8, 1.0, 0.0, 0.0, 255.0);
const CONNECTED_STRINGS: Signal = Signal::new(15, 4, 1.0, 0.0, 0.0, 15.0);
const PENDING_REQUEST: Signal = Signal::new(19, 4, 1.0, 0.0, 0.0, 15.0);
const ERROR_FLAGS: Signal = Signal::new(31, 8, 1.0, 0.0, 0.0, 255.0);

const MSL_SUMMARY: Signal = Signal::new(7, 8, 1.0, 0.0, 0.0, 255.0);
const RSL_SUMMARY: Signal = Signal::new(15, 8, 1.0, 0.0, 0.0, 255.0);
const MOL_SUMMARY: Signal = Signal::new(23, 8, 1.0, 0.0, 0.0, 255.0);
const STACK_OVERFLOW: Signal = Signal::new(31, 1, 1.0, 0.0, 0.0, 1.0);

const STRING_MULTIPLEXER: Signal = Signal::new(7, 4, 1.0, 0.0, 0.0, 15.0);
const STRING_CONNECTED: Signal = Signal::new(3, 1, 1.0, 0.0, 0.0, 1.0);
const STRING_BALANCING: Signal = Signal::new(2, 1, 1.0, 0.0, 0.0, 1.0);
const STRING_MSL_FLAGS: Signal = Signal::new(15, 8, 1.0, 0.0, 0.0, 255.0);
const STRING_RSL_FLAGS: Signal = Signal::new(23, 8, 1.0, 0.0, 0.0, 255.0);
const STRING_MOL_FLAGS: Signal = Signal::new(31, 8, 1.0, 0.0, 0.0, 255.0);

/// Bit assignment of the error byte in the state message.
mod error_bit {
    pub const GENERAL_ERROR: u8 = 0;
    pub const VOLTAGE_MSL: u8 = 1;
    pub const TEMPERATURE_MSL: u8 = 2;
    pub const CURRENT_MSL: u8 = 3;
    pub const AFE_MEASUREMENT: u8 = 4;
    pub const PRECHARGE_TIMEOUT: u8 = 5;
    pub const STACK_OVERFLOW: u8 = 6;
    pub const FIRST_MEASUREMENT_PENDING: u8 = 7;
}

/// ORs the per-string and pack flag words of one tier into one byte.
fn tier_summary(string_flags: &[SafetyFlags; NR_OF_STRINGS], pack_flags: &SafetyFlags) -> u8 {
    let mut summary = pack_flags.bits();
    for flags in string_flags {
        summary |= flags.bits();
    }
    summary as u8
}

pub(crate) fn bms_state(properties: &MessageProperties, context: &mut TxContext) -> [u8; 8] {
    let mut message = 0u64;

    context.tables.state_request = context.db.read();
    context.tables.error_state = context.db.read();
    context.tables.msl_flags = context.db.read();
    let error_state = &context.tables.error_state;
    let msl = &context.tables.msl_flags;

    set_message_data_with_signal_data(
        &mut message,
        BMS_STATE.bit_start,
        BMS_STATE.bit_length,
        context.status.pack_state() as u64,
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        CONNECTED_STRINGS.bit_start,
        CONNECTED_STRINGS.bit_length,
        context.status.number_of_connected_strings().into(),
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        PENDING_REQUEST.bit_start,
        PENDING_REQUEST.bit_length,
        context.tables.state_request.request as u64,
        properties.endianness,
    );

    let voltage_msl = msl
        .string
        .iter()
        .any(|flags| flags.over_voltage() || flags.under_voltage());
    let temperature_msl = msl.string.iter().any(|flags| {
        flags.over_temperature_charge()
            || flags.over_temperature_discharge()
            || flags.under_temperature_charge()
            || flags.under_temperature_discharge()
    });
    let current_msl = msl.pack.over_current_charge()
        || msl.pack.over_current_discharge()
        || msl
            .string
            .iter()
            .any(|flags| flags.over_current_charge() || flags.over_current_discharge());
    let general_error = msl.any()
        || error_state.afe_measurement_error
        || error_state.precharge_timeout
        || error_state.stack_overflow
        || error_state.insulation_error;
    // freshness of the voltage copy doubles as the first-measurement flag
    let first_measurement_pending = !context.tables.cell_voltages.header.is_fresh();

    let mut error_flags = 0u8;
    error_flags |= u8::from(general_error) << error_bit::GENERAL_ERROR;
    error_flags |= u8::from(voltage_msl) << error_bit::VOLTAGE_MSL;
    error_flags |= u8::from(temperature_msl) << error_bit::TEMPERATURE_MSL;
    error_flags |= u8::from(current_msl) << error_bit::CURRENT_MSL;
    error_flags |= u8::from(error_state.afe_measurement_error) << error_bit::AFE_MEASUREMENT;
    error_flags |= u8::from(error_state.precharge_timeout) << error_bit::PRECHARGE_TIMEOUT;
    error_flags |= u8::from(error_state.stack_overflow) << error_bit::STACK_OVERFLOW;
    error_flags |= u8::from(first_measurement_pending) << error_bit::FIRST_MEASUREMENT_PENDING;
    set_message_data_with_signal_data(
        &mut message,
        ERROR_FLAGS.bit_start,
        ERROR_FLAGS.bit_length,
        error_flags.into(),
        properties.endianness,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

pub(crate) fn bms_state_details(
    properties: &MessageProperties,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    // MSL flags are refreshed by the state message at a higher rate
    context.tables.rsl_flags = context.db.read();
    context.tables.mol_flags = context.db.read();

    set_message_data_with_signal_data(
        &mut message,
        MSL_SUMMARY.bit_start,
        MSL_SUMMARY.bit_length,
        tier_summary(&context.tables.msl_flags.string, &context.tables.msl_flags.pack).into(),
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        RSL_SUMMARY.bit_start,
        RSL_SUMMARY.bit_length,
        tier_summary(&context.tables.rsl_flags.string, &context.tables.rsl_flags.pack).into(),
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        MOL_SUMMARY.bit_start,
        MOL_SUMMARY.bit_length,
        tier_summary(&context.tables.mol_flags.string, &context.tables.mol_flags.pack).into(),
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        STACK_OVERFLOW.bit_start,
        STACK_OVERFLOW.bit_length,
        context.tables.error_state.stack_overflow as u64,
        properties.endianness,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

pub(crate) fn string_state(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;
    let string = usize::from(*mux);

    // first frame of a rotation: refresh the local copy; the flag blocks
    // are refreshed by the state messages
    if string == 0 {
        context.tables.balancing_control = context.db.read();
    }

    set_message_data_with_signal_data(
        &mut message,
        STRING_MULTIPLEXER.bit_start,
        STRING_MULTIPLEXER.bit_length,
        string as u64,
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        STRING_CONNECTED.bit_start,
        STRING_CONNECTED.bit_length,
        context.status.is_string_closed(string) as u64,
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        STRING_BALANCING.bit_start,
        STRING_BALANCING.bit_length,
        context.tables.balancing_control.is_string_balancing(string) as u64,
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        STRING_MSL_FLAGS.bit_start,
        STRING_MSL_FLAGS.bit_length,
        u64::from(context.tables.msl_flags.string[string].bits() as u8),
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        STRING_RSL_FLAGS.bit_start,
        STRING_RSL_FLAGS.bit_length,
        u64::from(context.tables.rsl_flags.string[string].bits() as u8),
        properties.endianness,
    );
    set_message_data_with_signal_data(
        &mut message,
        STRING_MOL_FLAGS.bit_start,
        STRING_MOL_FLAGS.bit_length,
        u64::from(context.tables.mol_flags.string[string].bits() as u8),
        properties.endianness,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);

    *mux += 1;
    if usize::from(*mux) >= NR_OF_STRINGS {
        *mux = 0;
    }

    data
}
