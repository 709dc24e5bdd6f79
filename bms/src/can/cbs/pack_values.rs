//! Pack and per-string electrical value frames

use crate::can::helper::{
    prepare_signal_data, set_can_data_with_message_data, set_message_data_with_signal_data,
};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::NR_OF_STRINGS;

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const BATTERY_VOLTAGE_100_MV: Signal = Signal::new(7, 14, 0.01, 0.0, 0.0, 16383.0);
const HV_BUS_VOLTAGE_100_MV: Signal = Signal::new(9, 14, 0.01, 0.0, 0.0, 16383.0);
const PACK_POWER_10_W: Signal = Signal::new(27, 18, 0.1, 0.0, -131072.0, 131071.0);
const PACK_CURRENT_10_MA: Signal = Signal::new(41, 18, 0.1, 0.0, -131072.0, 131071.0);

const STRING_MULTIPLEXER_P0: Signal = Signal::new(7, 3, 1.0, 0.0, 0.0, 7.0);
const STRING_VOLTAGE_10_MV: Signal = Signal::new(4, 17, 0.1, 0.0, -65536.0, 65535.0);
const STRING_CURRENT_10_MA: Signal = Signal::new(19, 18, 0.1, 0.0, -131072.0, 131071.0);
const STRING_POWER_10_W: Signal = Signal::new(33, 18, 0.1, 0.0, -131072.0, 131071.0);

const STRING_MULTIPLEXER_P1: Signal = Signal::new(7, 4, 1.0, 0.0, 0.0, 15.0);
const STRING_ENERGY_COUNTER_WH: Signal = Signal::new(15, 32, 1.0, 0.0, -2147483648.0, 2147483647.0);

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

pub(crate) fn pack_values(properties: &MessageProperties, context: &mut TxContext) -> [u8; 8] {
    let mut message = 0u64;

    context.tables.pack_values = context.db.read();
    let pack = &context.tables.pack_values;

    set_signal(
        &mut message,
        &BATTERY_VOLTAGE_100_MV,
        pack.battery_voltage_mv as f32,
        properties,
    );
    set_signal(
        &mut message,
        &HV_BUS_VOLTAGE_100_MV,
        pack.hv_bus_voltage_mv as f32,
        properties,
    );
    set_signal(
        &mut message,
        &PACK_CURRENT_10_MA,
        pack.pack_current_ma as f32,
        properties,
    );
    set_signal(
        &mut message,
        &PACK_POWER_10_W,
        pack.pack_power_w as f32,
        properties,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

pub(crate) fn string_values_p0(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;
    let string = usize::from(*mux);

    // first frame of a rotation: refresh the local copy
    if string == 0 {
        context.tables.pack_values = context.db.read();
    }
    let pack = &context.tables.pack_values;

    set_message_data_with_signal_data(
        &mut message,
        STRING_MULTIPLEXER_P0.bit_start,
        STRING_MULTIPLEXER_P0.bit_length,
        string as u64,
        properties.endianness,
    );
    set_signal(
        &mut message,
        &STRING_VOLTAGE_10_MV,
        pack.string_voltage_mv[string] as f32,
        properties,
    );
    set_signal(
        &mut message,
        &STRING_CURRENT_10_MA,
        pack.string_current_ma[string] as f32,
        properties,
    );
    set_signal(
        &mut message,
        &STRING_POWER_10_W,
        pack.string_power_w[string] as f32,
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

pub(crate) fn string_values_p1(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;
    let string = usize::from(*mux);

    // first frame of a rotation: refresh the local copy; the source block
    // is written from interrupt context, the store read is the one
    // critical section this sharing needs
    if string == 0 {
        context.tables.current_sensor = context.db.read();
    }

    set_message_data_with_signal_data(
        &mut message,
        STRING_MULTIPLEXER_P1.bit_start,
        STRING_MULTIPLEXER_P1.bit_length,
        string as u64,
        properties.endianness,
    );
    let energy = context.tables.current_sensor.energy_counter_wh[string];
    set_message_data_with_signal_data(
        &mut message,
        STRING_ENERGY_COUNTER_WH.bit_start,
        STRING_ENERGY_COUNTER_WH.bit_length,
        (i64::from(energy)) as u64,
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
