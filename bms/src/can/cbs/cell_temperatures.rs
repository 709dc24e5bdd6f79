//! Rotating cell temperature frames
//!
//! Structured like the voltage rotation, with six temperatures per frame.
//! Temperatures are stored in tenths of a degree and transmitted in whole
//! degrees as signed 8-bit values.

use crate::can::helper::{
    prepare_signal_data, set_can_data_with_message_data, set_message_data_with_signal_data,
};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::{NR_OF_TEMP_SENSORS, NR_OF_TEMP_SENSORS_PER_MODULE};
use crate::database::{
    module_number_from_temperature_index, sensor_number_from_temperature_index,
    string_number_from_temperature_index,
};

/// Number of temperatures per message frame.
const NR_OF_MUX_TEMPERATURES_PER_MESSAGE: u8 = 6;

/// Conversion from tenths of a degree to degrees.
const DDEG_TO_DEG: f32 = 10.0;

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const MULTIPLEXER: Signal = Signal::new(7, 8, 1.0, 0.0, 0.0, 255.0);
const TEMPERATURE_INVALID_FLAGS: [Signal; 6] = [
    Signal::new(8, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(9, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(10, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(11, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(12, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(13, 1, 1.0, 0.0, 0.0, 1.0),
];
const TEMPERATURES_DEG_C: [Signal; 6] = [
    Signal::new(23, 8, 1.0, 0.0, -128.0, 127.0),
    Signal::new(31, 8, 1.0, 0.0, -128.0, 127.0),
    Signal::new(39, 8, 1.0, 0.0, -128.0, 127.0),
    Signal::new(47, 8, 1.0, 0.0, -128.0, 127.0),
    Signal::new(55, 8, 1.0, 0.0, -128.0, 127.0),
    Signal::new(63, 8, 1.0, 0.0, -128.0, 127.0),
];

/// Packs the temperature and invalid flag of the sensor addressed by
/// `mux_id` into one slot of the frame.
fn temperature_set_data(
    mux_id: u8,
    message: &mut u64,
    temperature_signal: Signal,
    invalid_flag_signal: Signal,
    properties: &MessageProperties,
    context: &TxContext,
) {
    if usize::from(mux_id) >= NR_OF_TEMP_SENSORS {
        return;
    }
    let string = string_number_from_temperature_index(mux_id.into());
    let module = module_number_from_temperature_index(mux_id.into());
    let sensor = sensor_number_from_temperature_index(mux_id.into());
    let temperatures = &context.tables.cell_temperatures;

    let invalid = temperatures.is_invalid(string, module, sensor);
    set_message_data_with_signal_data(
        message,
        invalid_flag_signal.bit_start,
        invalid_flag_signal.bit_length,
        invalid as u64,
        properties.endianness,
    );

    let mut signal_data = f32::from(
        temperatures.cell_temperature_ddeg_c[string]
            [module * NR_OF_TEMP_SENSORS_PER_MODULE + sensor],
    ) / DDEG_TO_DEG;
    prepare_signal_data(&mut signal_data, &temperature_signal);
    set_message_data_with_signal_data(
        message,
        temperature_signal.bit_start,
        temperature_signal.bit_length,
        (signal_data as i64) as u64,
        properties.endianness,
    );
}

pub(crate) fn cell_temperatures(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    if usize::from(*mux) >= NR_OF_TEMP_SENSORS {
        *mux = 0;
    }
    // first frame of a rotation: refresh the local copy
    if *mux == 0 {
        context.tables.cell_temperatures = context.db.read();
    }

    let mux_value = *mux / NR_OF_MUX_TEMPERATURES_PER_MESSAGE;
    set_message_data_with_signal_data(
        &mut message,
        MULTIPLEXER.bit_start,
        MULTIPLEXER.bit_length,
        mux_value.into(),
        properties.endianness,
    );

    for slot in 0..NR_OF_MUX_TEMPERATURES_PER_MESSAGE as usize {
        temperature_set_data(
            *mux,
            &mut message,
            TEMPERATURES_DEG_C[slot],
            TEMPERATURE_INVALID_FLAGS[slot],
            properties,
            context,
        );
        *mux += 1;
    }
    if usize::from(*mux) >= NR_OF_TEMP_SENSORS {
        *mux = 0;
    }

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::can::helper::{get_message_data_from_can_data, get_signal_data_from_message_data};
    use crate::can::testutil::FakeStatus;
    use crate::can::tx::TxTables;
    use crate::can::{properties, Endianness};
    use crate::config::NR_OF_TEMP_SENSORS_PER_STRING;
    use crate::database::Database;
    use bms_core::Instant;

    fn decode(data: &[u8; 8], signal: &Signal) -> i64 {
        let message = get_message_data_from_can_data(data, Endianness::Big);
        let raw =
            get_signal_data_from_message_data(message, signal.bit_start, signal.bit_length, Endianness::Big);
        // sign extend
        let shift = 64 - signal.bit_length as u32;
        ((raw << shift) as i64) >> shift
    }

    #[test]
    fn temperatures_are_converted_to_whole_degrees() {
        let db = Database::new();
        let mut temperatures = crate::blocks::CellTemperatures::new();
        temperatures.cell_temperature_ddeg_c[0][0] = 253; // 25.3 degC
        temperatures.cell_temperature_ddeg_c[0][1] = -150; // -15.0 degC
        db.write(Instant::from_ticks(1), &temperatures);

        let status = FakeStatus::all_open();
        let mut tables = TxTables::new();
        let message = properties(0x250, Endianness::Big);
        let mut mux = 0u8;
        let mut context = TxContext {
            db: &db,
            status: &status,
            tables: &mut tables,
        };
        let data = cell_temperatures(&message, &mut mux, &mut context);
        assert_eq!(decode(&data, &MULTIPLEXER), 0);
        assert_eq!(decode(&data, &TEMPERATURES_DEG_C[0]), 25);
        assert_eq!(decode(&data, &TEMPERATURES_DEG_C[1]), -15);
        assert_eq!(mux, NR_OF_MUX_TEMPERATURES_PER_MESSAGE);
    }

    #[test]
    fn full_sweep_visits_every_sensor_exactly_once() {
        let db = Database::new();
        let mut temperatures = crate::blocks::CellTemperatures::new();
        for s in 0..crate::config::NR_OF_STRINGS {
            for (i, slot) in temperatures.cell_temperature_ddeg_c[s].iter_mut().enumerate() {
                *slot = ((s * NR_OF_TEMP_SENSORS_PER_STRING + i) * 10) as i16;
            }
        }
        db.write(Instant::from_ticks(1), &temperatures);

        let status = FakeStatus::all_open();
        let mut tables = TxTables::new();
        let message = properties(0x250, Endianness::Big);
        let mut mux = 0u8;

        let frames = NR_OF_TEMP_SENSORS / NR_OF_MUX_TEMPERATURES_PER_MESSAGE as usize;
        let mut seen = [false; NR_OF_TEMP_SENSORS];
        for _ in 0..frames {
            let mut context = TxContext {
                db: &db,
                status: &status,
                tables: &mut tables,
            };
            let data = cell_temperatures(&message, &mut mux, &mut context);
            let base = decode(&data, &MULTIPLEXER) as usize * 6;
            for slot in 0..6 {
                let index = base + slot;
                assert_eq!(decode(&data, &TEMPERATURES_DEG_C[slot]), index as i64);
                assert!(!seen[index]);
                seen[index] = true;
            }
        }
        assert!(seen.iter().all(|&v| v));
        assert_eq!(mux, 0);
    }

    #[test]
    fn out_of_range_temperatures_saturate() {
        let db = Database::new();
        let mut temperatures = crate::blocks::CellTemperatures::new();
        temperatures.cell_temperature_ddeg_c[0][0] = i16::MAX;
        temperatures.cell_temperature_ddeg_c[0][1] = i16::MIN;
        db.write(Instant::from_ticks(1), &temperatures);

        let status = FakeStatus::all_open();
        let mut tables = TxTables::new();
        let message = properties(0x250, Endianness::Big);
        let mut mux = 0u8;
        let mut context = TxContext {
            db: &db,
            status: &status,
            tables: &mut tables,
        };
        let data = cell_temperatures(&message, &mut mux, &mut context);
        assert_eq!(decode(&data, &TEMPERATURES_DEG_C[0]), 127);
        assert_eq!(decode(&data, &TEMPERATURES_DEG_C[1]), -128);
    }
}
