//! Per-string minimum/maximum reductions
//!
//! Runs after every acquisition cycle and rebuilds the [`MinMax`] block
//! from the latest voltage and temperature tables. Cells and sensors whose
//! invalid bit is set are skipped; a string with no valid measurement at
//! all reports the sentinel pair `i16::MAX`/`i16::MIN`, which keeps the CAN
//! encoding of the extremes stable.

use crate::blocks::{CellTemperatures, CellVoltages, MinMax};
use crate::config::{
    NR_OF_CELL_BLOCKS_PER_MODULE, NR_OF_CELL_BLOCKS_PER_STRING, NR_OF_STRINGS,
    NR_OF_TEMP_SENSORS_PER_MODULE, NR_OF_TEMP_SENSORS_PER_STRING,
};
use crate::database::Database;
use bms_core::Instant;

/// Reads the measurement tables, reduces them per string and writes the
/// result back to the database.
pub fn update_min_max(now: Instant, db: &Database) {
    let (voltages, temperatures): (CellVoltages, CellTemperatures) = db.read2();
    let mut min_max: MinMax = db.read();
    for s in 0..NR_OF_STRINGS {
        let (min_mv, max_mv) = string_voltage_extremes(&voltages, s);
        min_max.minimum_cell_voltage_mv[s] = min_mv;
        min_max.maximum_cell_voltage_mv[s] = max_mv;
        let (min_ddeg, max_ddeg) = string_temperature_extremes(&temperatures, s);
        min_max.minimum_temperature_ddeg_c[s] = min_ddeg;
        min_max.maximum_temperature_ddeg_c[s] = max_ddeg;
    }
    db.write(now, &min_max);
}

/// Lowest and highest valid cell voltage of string `string`.
pub fn string_voltage_extremes(voltages: &CellVoltages, string: usize) -> (i16, i16) {
    let mut minimum = i16::MAX;
    let mut maximum = i16::MIN;
    for index in 0..NR_OF_CELL_BLOCKS_PER_STRING {
        let module = index / NR_OF_CELL_BLOCKS_PER_MODULE;
        let cell = index % NR_OF_CELL_BLOCKS_PER_MODULE;
        if voltages.is_invalid(string, module, cell) {
            continue;
        }
        let value = voltages.cell_voltage_mv[string][index];
        minimum = minimum.min(value);
        maximum = maximum.max(value);
    }
    (minimum, maximum)
}

/// Lowest and highest valid cell temperature of string `string`.
pub fn string_temperature_extremes(temperatures: &CellTemperatures, string: usize) -> (i16, i16) {
    let mut minimum = i16::MAX;
    let mut maximum = i16::MIN;
    for index in 0..NR_OF_TEMP_SENSORS_PER_STRING {
        let module = index / NR_OF_TEMP_SENSORS_PER_MODULE;
        let sensor = index % NR_OF_TEMP_SENSORS_PER_MODULE;
        if temperatures.is_invalid(string, module, sensor) {
            continue;
        }
        let value = temperatures.cell_temperature_ddeg_c[string][index];
        minimum = minimum.min(value);
        maximum = maximum.max(value);
    }
    (minimum, maximum)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::config::NR_OF_MODULES_PER_STRING;

    #[test]
    fn reduction_ignores_invalid_cells() {
        let mut voltages = CellVoltages::new();
        for (i, slot) in voltages.cell_voltage_mv[0].iter_mut().enumerate() {
            *slot = 3000 + i as i16;
        }
        // lowest and highest cell both invalid
        voltages.invalid_cell_voltage[0][0] = 0x1;
        voltages.cell_voltage_mv[0][NR_OF_CELL_BLOCKS_PER_STRING - 1] = 4000;
        voltages.invalid_cell_voltage[0][NR_OF_MODULES_PER_STRING - 1] =
            1 << (NR_OF_CELL_BLOCKS_PER_MODULE - 1);

        let (min_mv, max_mv) = string_voltage_extremes(&voltages, 0);
        assert_eq!(min_mv, 3001);
        assert_eq!(max_mv, 3000 + NR_OF_CELL_BLOCKS_PER_STRING as i16 - 2);
    }

    #[test]
    fn all_invalid_yields_sentinels() {
        let mut voltages = CellVoltages::new();
        for word in voltages.invalid_cell_voltage[1].iter_mut() {
            *word = u16::MAX;
        }
        let (min_mv, max_mv) = string_voltage_extremes(&voltages, 1);
        assert_eq!(min_mv, i16::MAX);
        assert_eq!(max_mv, i16::MIN);
    }

    #[test]
    fn min_max_block_is_rebuilt_per_string() {
        let db = Database::new();
        let mut voltages = CellVoltages::new();
        let mut temperatures = CellTemperatures::new();
        for s in 0..NR_OF_STRINGS {
            for (i, slot) in voltages.cell_voltage_mv[s].iter_mut().enumerate() {
                *slot = 3000 + (s * 100 + i) as i16;
            }
            for (i, slot) in temperatures.cell_temperature_ddeg_c[s].iter_mut().enumerate() {
                *slot = 200 + (s * 10 + i) as i16;
            }
        }
        db.write2(Instant::from_ticks(1), &voltages, &temperatures);

        update_min_max(Instant::from_ticks(2), &db);
        let min_max: MinMax = db.read();
        for s in 0..NR_OF_STRINGS {
            assert_eq!(min_max.minimum_cell_voltage_mv[s], 3000 + (s * 100) as i16);
            assert_eq!(
                min_max.maximum_cell_voltage_mv[s],
                3000 + (s * 100 + NR_OF_CELL_BLOCKS_PER_STRING - 1) as i16
            );
            assert_eq!(min_max.minimum_temperature_ddeg_c[s], 200 + (s * 10) as i16);
            assert_eq!(
                min_max.maximum_temperature_ddeg_c[s],
                200 + (s * 10 + NR_OF_TEMP_SENSORS_PER_STRING - 1) as i16
            );
        }
        assert!(min_max.header.is_fresh());
    }
}
