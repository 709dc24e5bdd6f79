//! Pack and per-string extreme value frames
//!
//! The pack level message reduces the per-string extremes once more: over
//! the connected strings while any string is in circuit, over all strings
//! while the pack is fully disconnected. The per-string message reuses the
//! copy the pack message refreshed, one string per frame.

use crate::can::helper::{
    prepare_signal_data, set_can_data_with_message_data, set_message_data_with_signal_data,
};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::NR_OF_STRINGS;
use crate::control::StringStatus;

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const PACK_MINIMUM_VOLTAGE_MV: Signal = Signal::new(10, 13, 1.0, 0.0, 0.0, 8191.0);
const PACK_MAXIMUM_VOLTAGE_MV: Signal = Signal::new(7, 13, 1.0, 0.0, 0.0, 8191.0);
const PACK_MINIMUM_TEMPERATURE_DEG_C: Signal = Signal::new(63, 8, 0.1, 0.0, -128.0, 127.0);
const PACK_MAXIMUM_TEMPERATURE_DEG_C: Signal = Signal::new(55, 8, 0.1, 0.0, -128.0, 127.0);

const STRING_MINIMUM_VOLTAGE_MV: Signal = Signal::new(18, 13, 1.0, 0.0, 0.0, 8191.0);
const STRING_MAXIMUM_VOLTAGE_MV: Signal = Signal::new(15, 13, 1.0, 0.0, 0.0, 8191.0);
const STRING_MINIMUM_TEMPERATURE: Signal = Signal::new(44, 9, 0.2, 0.0, -256.0, 255.0);
const STRING_MAXIMUM_TEMPERATURE: Signal = Signal::new(37, 9, 0.2, 0.0, -256.0, 255.0);

/// Reduces a per-string table to the pack level extreme. While no string is
/// connected the reduction covers all strings.
fn pack_extreme(
    values: &[i16; NR_OF_STRINGS],
    status: &dyn StringStatus,
    start: i16,
    pick: impl Fn(i16, i16) -> i16,
) -> i16 {
    let all = status.number_of_connected_strings() == 0;
    let mut result = start;
    for (string, &value) in values.iter().enumerate() {
        if all || status.is_string_closed(string) {
            result = pick(result, value);
        }
    }
    result
}

fn set_signal(message: &mut u64, signal: &Signal, value: f32, properties: &MessageProperties) {
    let mut signal_data = value;
    prepare_signal_data(&mut signal_data, signal);
    set_message_data_with_signal_data(
        message,
        signal.bit_start,
        signal.bit_length,
        (signal_data as i64) as u64,
        properties.endianness,
    );
}

pub(crate) fn minimum_maximum_values(
    properties: &MessageProperties,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    context.tables.min_max = context.db.read();
    let min_max = &context.tables.min_max;

    let pack_minimum_voltage = pack_extreme(
        &min_max.minimum_cell_voltage_mv,
        context.status,
        i16::MAX,
        i16::min,
    );
    let pack_maximum_voltage = pack_extreme(
        &min_max.maximum_cell_voltage_mv,
        context.status,
        i16::MIN,
        i16::max,
    );
    let pack_minimum_temperature = pack_extreme(
        &min_max.minimum_temperature_ddeg_c,
        context.status,
        i16::MAX,
        i16::min,
    );
    let pack_maximum_temperature = pack_extreme(
        &min_max.maximum_temperature_ddeg_c,
        context.status,
        i16::MIN,
        i16::max,
    );

    set_signal(
        &mut message,
        &PACK_MINIMUM_VOLTAGE_MV,
        pack_minimum_voltage.into(),
        properties,
    );
    set_signal(
        &mut message,
        &PACK_MAXIMUM_VOLTAGE_MV,
        pack_maximum_voltage.into(),
        properties,
    );
    set_signal(
        &mut message,
        &PACK_MINIMUM_TEMPERATURE_DEG_C,
        pack_minimum_temperature.into(),
        properties,
    );
    set_signal(
        &mut message,
        &PACK_MAXIMUM_TEMPERATURE_DEG_C,
        pack_maximum_temperature.into(),
        properties,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

pub(crate) fn string_minimum_maximum_values(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    // the extremes copy is refreshed by the pack level message, which runs
    // at the same period
    let min_max = &context.tables.min_max;
    let string = usize::from(*mux);

    set_signal(
        &mut message,
        &STRING_MINIMUM_VOLTAGE_MV,
        min_max.minimum_cell_voltage_mv[string].into(),
        properties,
    );
    set_signal(
        &mut message,
        &STRING_MAXIMUM_VOLTAGE_MV,
        min_max.maximum_cell_voltage_mv[string].into(),
        properties,
    );
    set_signal(
        &mut message,
        &STRING_MINIMUM_TEMPERATURE,
        min_max.minimum_temperature_ddeg_c[string].into(),
        properties,
    );
    set_signal(
        &mut message,
        &STRING_MAXIMUM_TEMPERATURE,
        min_max.maximum_temperature_ddeg_c[string].into(),
        properties,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);

    *mux += 1;
    if usize::from(*mux) >= NR_OF_STRINGS {
        *mux = 0;
    }

    data
}
