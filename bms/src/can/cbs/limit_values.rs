//! Recommended operating limit frame

use crate::can::helper::{
    prepare_signal_data, set_can_data_with_message_data, set_message_data_with_signal_data,
};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::{
    CELL_VOLTAGE_MAX_MSL_MV, CELL_VOLTAGE_MIN_MSL_MV, NR_OF_CELL_BLOCKS_PER_STRING,
};

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const MAXIMUM_CHARGE_CURRENT_250_MA: Signal = Signal::new(11, 12, 0.004, 0.0, 0.0, 4095.0);
const MAXIMUM_DISCHARGE_CURRENT_250_MA: Signal = Signal::new(7, 12, 0.004, 0.0, 0.0, 4095.0);
const MINIMUM_PACK_VOLTAGE_4_V: Signal = Signal::new(63, 8, 0.00025, 0.0, 0.0, 255.0);
const MAXIMUM_PACK_VOLTAGE_4_V: Signal = Signal::new(55, 8, 0.00025, 0.0, 0.0, 255.0);

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

pub(crate) fn limit_values(properties: &MessageProperties, context: &mut TxContext) -> [u8; 8] {
    let mut message = 0u64;

    context.tables.sof = context.db.read();
    let sof = &context.tables.sof;

    set_signal(
        &mut message,
        &MAXIMUM_CHARGE_CURRENT_250_MA,
        sof.recommended_continuous_pack_charge_current_ma as f32,
        properties,
    );
    set_signal(
        &mut message,
        &MAXIMUM_DISCHARGE_CURRENT_250_MA,
        sof.recommended_continuous_pack_discharge_current_ma as f32,
        properties,
    );

    // TODO: maximum charge power
    // TODO: maximum discharge power

    set_signal(
        &mut message,
        &MINIMUM_PACK_VOLTAGE_4_V,
        (NR_OF_CELL_BLOCKS_PER_STRING as i32 * i32::from(CELL_VOLTAGE_MIN_MSL_MV)) as f32,
        properties,
    );
    set_signal(
        &mut message,
        &MAXIMUM_PACK_VOLTAGE_4_V,
        (NR_OF_CELL_BLOCKS_PER_STRING as i32 * i32::from(CELL_VOLTAGE_MAX_MSL_MV)) as f32,
        properties,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blocks::Sof;
    use crate::can::helper::{get_message_data_from_can_data, get_signal_data_from_message_data};
    use crate::can::testutil::FakeStatus;
    use crate::can::tx::TxTables;
    use crate::can::{properties, Endianness};
    use crate::database::Database;
    use bms_core::Instant;

    fn decode(data: &[u8; 8], signal: &Signal) -> u64 {
        let message = get_message_data_from_can_data(data, Endianness::Big);
        get_signal_data_from_message_data(
            message,
            signal.bit_start,
            signal.bit_length,
            Endianness::Big,
        )
    }

    #[test]
    fn recommended_currents_are_transmitted_in_quarter_amperes() {
        let db = Database::new();
        let mut sof = Sof::new();
        sof.recommended_continuous_pack_charge_current_ma = 250_000;
        sof.recommended_continuous_pack_discharge_current_ma = 500_000;
        db.write(Instant::from_ticks(1), &sof);

        let status = FakeStatus::all_closed();
        let mut tables = TxTables::new();
        let mut context = TxContext {
            db: &db,
            status: &status,
            tables: &mut tables,
        };
        let message = properties(0x224, Endianness::Big);
        let data = limit_values(&message, &mut context);

        assert_eq!(decode(&data, &MAXIMUM_CHARGE_CURRENT_250_MA), 1000);
        assert_eq!(decode(&data, &MAXIMUM_DISCHARGE_CURRENT_250_MA), 2000);
    }

    #[test]
    fn pack_voltage_window_comes_from_the_cell_limits() {
        let db = Database::new();
        let status = FakeStatus::all_closed();
        let mut tables = TxTables::new();
        let mut context = TxContext {
            db: &db,
            status: &status,
            tables: &mut tables,
        };
        let message = properties(0x224, Endianness::Big);
        let data = limit_values(&message, &mut context);

        let minimum_mv = NR_OF_CELL_BLOCKS_PER_STRING as f32 * CELL_VOLTAGE_MIN_MSL_MV as f32;
        let maximum_mv = NR_OF_CELL_BLOCKS_PER_STRING as f32 * CELL_VOLTAGE_MAX_MSL_MV as f32;
        assert_eq!(
            decode(&data, &MINIMUM_PACK_VOLTAGE_4_V),
            (minimum_mv * 0.00025) as u64
        );
        assert_eq!(
            decode(&data, &MAXIMUM_PACK_VOLTAGE_4_V),
            (maximum_mv * 0.00025) as u64
        );
    }
}
