//! Rotating cell voltage frames
//!
//! One frame carries a multiplexer value and up to four cell voltages with
//! their invalid flags. The multiplexer counter sweeps the whole pack in
//! steps of four; the source block is re-read from the database whenever
//! the counter restarts at zero, so one full rotation reports one
//! consistent measurement.

use crate::can::helper::{
    prepare_signal_data, set_can_data_with_message_data, set_message_data_with_signal_data,
};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::{NR_OF_CELL_BLOCKS, NR_OF_CELL_BLOCKS_PER_MODULE};
use crate::database::{
    cell_number_from_voltage_index, module_number_from_voltage_index,
    string_number_from_voltage_index,
};

/// Number of voltages per message frame.
const NR_OF_MUX_VOLTAGES_PER_MESSAGE: u8 = 4;

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const MULTIPLEXER: Signal = Signal::new(7, 8, 1.0, 0.0, 0.0, 255.0);
const VOLTAGE_INVALID_FLAGS: [Signal; 4] = [
    Signal::new(12, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(13, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(14, 1, 1.0, 0.0, 0.0, 1.0),
    Signal::new(15, 1, 1.0, 0.0, 0.0, 1.0),
];
const VOLTAGES_MV: [Signal; 4] = [
    Signal::new(11, 13, 1.0, 0.0, 0.0, 8191.0),
    Signal::new(30, 13, 1.0, 0.0, 0.0, 8191.0),
    Signal::new(33, 13, 1.0, 0.0, 0.0, 8191.0),
    Signal::new(52, 13, 1.0, 0.0, 0.0, 8191.0),
];

/// Packs the voltage and invalid flag of the cell addressed by `mux_id`
/// into one slot of the frame. Indexes past the end of the pack leave the
/// slot zeroed.
fn voltage_set_data(
    mux_id: u8,
    message: &mut u64,
    voltage_signal: Signal,
    invalid_flag_signal: Signal,
    properties: &MessageProperties,
    context: &TxContext,
) {
    if usize::from(mux_id) >= NR_OF_CELL_BLOCKS {
        return;
    }
    let string = string_number_from_voltage_index(mux_id.into());
    let module = module_number_from_voltage_index(mux_id.into());
    let cell = cell_number_from_voltage_index(mux_id.into());
    let voltages = &context.tables.cell_voltages;

    let invalid = voltages.is_invalid(string, module, cell);
    set_message_data_with_signal_data(
        message,
        invalid_flag_signal.bit_start,
        invalid_flag_signal.bit_length,
        invalid as u64,
        properties.endianness,
    );

    let mut signal_data =
        f32::from(voltages.cell_voltage_mv[string][module * NR_OF_CELL_BLOCKS_PER_MODULE + cell]);
    prepare_signal_data(&mut signal_data, &voltage_signal);
    set_message_data_with_signal_data(
        message,
        voltage_signal.bit_start,
        voltage_signal.bit_length,
        signal_data as u64,
        properties.endianness,
    );
}

pub(crate) fn cell_voltages(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    if usize::from(*mux) >= NR_OF_CELL_BLOCKS {
        *mux = 0;
    }
    // first frame of a rotation: refresh the local copy
    if *mux == 0 {
        context.tables.cell_voltages = context.db.read();
    }

    let mux_value = *mux / NR_OF_MUX_VOLTAGES_PER_MESSAGE;
    set_message_data_with_signal_data(
        &mut message,
        MULTIPLEXER.bit_start,
        MULTIPLEXER.bit_length,
        mux_value.into(),
        properties.endianness,
    );

    for slot in 0..NR_OF_MUX_VOLTAGES_PER_MESSAGE as usize {
        voltage_set_data(
            *mux,
            &mut message,
            VOLTAGES_MV[slot],
            VOLTAGE_INVALID_FLAGS[slot],
            properties,
            context,
        );
        *mux += 1;
    }
    if usize::from(*mux) >= NR_OF_CELL_BLOCKS {
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
    use crate::can::{properties, Endianness};
    use crate::can::tx::TxTables;
    use crate::database::Database;
    use bms_core::Instant;

    fn decode(data: &[u8; 8], signal: &Signal) -> u64 {
        let message = get_message_data_from_can_data(data, Endianness::Big);
        get_signal_data_from_message_data(message, signal.bit_start, signal.bit_length, Endianness::Big)
    }

    #[test]
    fn rotation_reports_consecutive_cell_groups() {
        let db = Database::new();
        let mut voltages = crate::blocks::CellVoltages::new();
        for (i, slot) in voltages.cell_voltage_mv[0].iter_mut().enumerate() {
            *slot = 3000 + i as i16;
        }
        db.write(Instant::from_ticks(1), &voltages);

        let status = FakeStatus::all_open();
        let mut tables = TxTables::new();
        let message = properties(0x240, Endianness::Big);
        let mut mux = 0u8;

        let mut frames = [[0u8; 8]; 3];
        for frame in frames.iter_mut() {
            let mut context = TxContext {
                db: &db,
                status: &status,
                tables: &mut tables,
            };
            *frame = cell_voltages(&message, &mut mux, &mut context);
        }

        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(decode(frame, &MULTIPLEXER), i as u64);
            assert_eq!(decode(frame, &VOLTAGES_MV[0]), 3000 + 4 * i as u64);
            assert_eq!(decode(frame, &VOLTAGE_INVALID_FLAGS[0]), 0);
        }
        assert_eq!(decode(&frames[1], &VOLTAGES_MV[3]), 3007);
        assert_eq!(mux, 12);
    }

    #[test]
    fn full_sweep_visits_every_cell_exactly_once() {
        let db = Database::new();
        let mut voltages = crate::blocks::CellVoltages::new();
        for s in 0..crate::config::NR_OF_STRINGS {
            for (i, slot) in voltages.cell_voltage_mv[s].iter_mut().enumerate() {
                *slot = (1000 * (s + 1) + i) as i16;
            }
        }
        db.write(Instant::from_ticks(1), &voltages);

        let status = FakeStatus::all_open();
        let mut tables = TxTables::new();
        let message = properties(0x240, Endianness::Big);
        let mut mux = 0u8;

        let frames = NR_OF_CELL_BLOCKS / NR_OF_MUX_VOLTAGES_PER_MESSAGE as usize;
        let mut seen = [false; NR_OF_CELL_BLOCKS];
        for _ in 0..frames {
            let mut context = TxContext {
                db: &db,
                status: &status,
                tables: &mut tables,
            };
            let data = cell_voltages(&message, &mut mux, &mut context);
            let base = decode(&data, &MULTIPLEXER) as usize * 4;
            for slot in 0..4 {
                let value = decode(&data, &VOLTAGES_MV[slot]) as usize;
                let index = base + slot;
                let s = string_number_from_voltage_index(index);
                let within = index % crate::config::NR_OF_CELL_BLOCKS_PER_STRING;
                assert_eq!(value, 1000 * (s + 1) + within);
                assert!(!seen[index]);
                seen[index] = true;
            }
        }
        assert!(seen.iter().all(|&v| v));
        // counter wrapped: the next frame starts a new rotation
        assert_eq!(mux, 0);
    }

    #[test]
    fn invalid_bits_travel_with_their_cells() {
        let db = Database::new();
        let mut voltages = crate::blocks::CellVoltages::new();
        voltages.cell_voltage_mv[0][1] = 3500;
        voltages.invalid_cell_voltage[0][0] = 0b0010;
        db.write(Instant::from_ticks(1), &voltages);

        let status = FakeStatus::all_open();
        let mut tables = TxTables::new();
        let message = properties(0x240, Endianness::Big);
        let mut mux = 0u8;
        let mut context = TxContext {
            db: &db,
            status: &status,
            tables: &mut tables,
        };
        let data = cell_voltages(&message, &mut mux, &mut context);
        assert_eq!(decode(&data, &VOLTAGE_INVALID_FLAGS[0]), 0);
        assert_eq!(decode(&data, &VOLTAGE_INVALID_FLAGS[1]), 1);
        assert_eq!(decode(&data, &VOLTAGES_MV[1]), 3500);
    }
}
