//! Battery system geometry and cell operating window
//!
//! Everything in this module is fixed at build time. The geometry constants
//! size every measurement table in the database; changing them resizes the
//! whole system consistently.

/// Number of parallel strings in the battery pack.
pub const NR_OF_STRINGS: usize = 3;

/// Number of modules connected in series within one string.
pub const NR_OF_MODULES_PER_STRING: usize = 3;

/// Number of cell blocks connected in series within one module.
pub const NR_OF_CELL_BLOCKS_PER_MODULE: usize = 4;

/// Number of temperature sensors within one module.
pub const NR_OF_TEMP_SENSORS_PER_MODULE: usize = 2;

/// Number of GPIO channels measured on each module.
pub const NR_OF_GPIOS_PER_MODULE: usize = 4;

/// Number of cell blocks connected in series within one string.
pub const NR_OF_CELL_BLOCKS_PER_STRING: usize =
    NR_OF_MODULES_PER_STRING * NR_OF_CELL_BLOCKS_PER_MODULE;

/// Number of temperature sensors within one string.
pub const NR_OF_TEMP_SENSORS_PER_STRING: usize =
    NR_OF_MODULES_PER_STRING * NR_OF_TEMP_SENSORS_PER_MODULE;

/// Number of temperature sensors in the battery pack.
pub const NR_OF_TEMP_SENSORS: usize = NR_OF_STRINGS * NR_OF_TEMP_SENSORS_PER_STRING;

/// Number of cell blocks in the battery pack.
pub const NR_OF_CELL_BLOCKS: usize = NR_OF_STRINGS * NR_OF_CELL_BLOCKS_PER_STRING;

/// Maximum safety limit for the cell voltage during charge and discharge.
pub const CELL_VOLTAGE_MAX_MSL_MV: i16 = 4200;

/// Minimum safety limit for the cell voltage during charge and discharge.
pub const CELL_VOLTAGE_MIN_MSL_MV: i16 = 2500;

/// Nominal cell voltage, used by the acquisition driver until the hardware
/// delivers real data.
pub const CELL_VOLTAGE_NOMINAL_MV: i16 = 3600;

/// Maximum safety limit for the cell temperature during charge.
pub const CELL_TEMPERATURE_MAX_CHARGE_MSL_DDEG_C: i16 = 450;

/// Minimum safety limit for the cell temperature during charge.
pub const CELL_TEMPERATURE_MIN_CHARGE_MSL_DDEG_C: i16 = 0;

/// Maximum safety limit for the cell temperature during discharge.
pub const CELL_TEMPERATURE_MAX_DISCHARGE_MSL_DDEG_C: i16 = 550;

/// Minimum safety limit for the cell temperature during discharge.
pub const CELL_TEMPERATURE_MIN_DISCHARGE_MSL_DDEG_C: i16 = -200;

/// Nominal cell temperature, used by the acquisition driver until the
/// hardware delivers real data.
pub const CELL_TEMPERATURE_NOMINAL_DDEG_C: i16 = 250;

/// Maximum safety limit for the string current, charge direction.
pub const CURRENT_MAX_CHARGE_MSL_MA: i32 = 180_000;

/// Maximum safety limit for the string current, discharge direction.
pub const CURRENT_MAX_DISCHARGE_MSL_MA: i32 = 180_000;

/// Current magnitudes below this threshold count as the battery being at
/// rest. The band keeps the charge/discharge classification stable against
/// sensor noise around zero.
pub const REST_CURRENT_MA: i32 = 200;

/// Time budget for a string precharge before the pack controller aborts and
/// latches its error state.
pub const PRECHARGE_TIMEOUT_MS: u32 = 500;

/// Maximum difference between battery and DC link voltage at which a
/// precharge counts as completed.
pub const PRECHARGE_VOLTAGE_THRESHOLD_MV: i32 = 1000;
