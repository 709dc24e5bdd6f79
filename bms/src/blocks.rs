//! The measurement block catalog
//!
//! Every record the database manages is declared here: a closed set of typed
//! blocks, each starting with a [`Header`] that carries the block identity
//! and the writer-maintained timestamps. Blocks are plain `Copy` data;
//! readers always work on their own copy, never on the stored one.

use crate::config::{
    NR_OF_CELL_BLOCKS_PER_STRING, NR_OF_GPIOS_PER_MODULE, NR_OF_MODULES_PER_STRING, NR_OF_STRINGS,
    NR_OF_TEMP_SENSORS_PER_STRING,
};
use bitfield::bitfield;
use bms_core::Instant;

/// Block identification tags. One tag per entry in the catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockId {
    /// Cell voltages measured by the AFE
    CellVoltages,
    /// Cell temperatures measured by the AFE
    CellTemperatures,
    /// Per-string voltage and temperature extremes
    MinMax,
    /// Pack and string level electrical values
    PackValues,
    /// Current sensor values updated from interrupt context
    CurrentSensor,
    /// Recommended safe operating currents
    Sof,
    /// State of charge and state of energy estimates
    Sox,
    /// State of health estimates
    Soh,
    /// Operating mode requested by the vehicle
    StateRequest,
    /// Latched error conditions
    ErrorState,
    /// Maximum safety limit violations
    MslFlags,
    /// Recommended safety limit violations
    RslFlags,
    /// Maximum operating limit violations
    MolFlags,
    /// Open sense wire detection results
    OpenWire,
    /// Balancing feedback measured on the slaves
    BalancingFeedback,
    /// Balancing actuation commands
    BalancingControl,
    /// Slave board bookkeeping
    SlaveControl,
    /// Voltages on the slaves' GPIO pins
    AllGpioVoltages,
    /// Insulation monitoring device results
    InsulationMonitoring,
    /// Aerosol sensor results
    AerosolSensor,
    /// Ethernet PHY status
    Phy,
}

/// Header present at the start of every block.
#[derive(Debug, Copy, Clone)]
pub struct Header {
    /// Identity of the block this header belongs to.
    pub id: BlockId,
    /// Time of the last write. Zero ticks means the block was never written.
    pub timestamp: Instant,
    /// Timestamp the last write replaced. Never exceeds `timestamp`.
    pub previous_timestamp: Instant,
}

impl Header {
    pub(crate) const fn new(id: BlockId) -> Self {
        Self {
            id,
            timestamp: Instant::from_ticks(0),
            previous_timestamp: Instant::from_ticks(0),
        }
    }

    /// `true` once the block has been written at least once.
    pub fn is_fresh(&self) -> bool {
        self.timestamp.ticks() != 0
    }
}

/// A typed record managed by the database.
///
/// Implemented by every member of the catalog; the associated tag ties the
/// type to its storage slot so that an access with a wrong tag is
/// unrepresentable.
pub trait Block: Copy {
    /// Tag identifying this block.
    const ID: BlockId;

    /// Access to the block header.
    fn header(&self) -> &Header;

    /// Mutable access to the block header.
    fn header_mut(&mut self) -> &mut Header;
}

macro_rules! impl_block {
    ($block:ty, $id:expr) => {
        impl Block for $block {
            const ID: BlockId = $id;

            fn header(&self) -> &Header {
                &self.header
            }

            fn header_mut(&mut self) -> &mut Header {
                &mut self.header
            }
        }

        impl Default for $block {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

bitfield! {
    /// Violation flags of one safety tier.
    ///
    /// The same bit assignment is used for the maximum safety limits, the
    /// recommended safety limits and the maximum operating limits; only the
    /// thresholds behind the bits differ.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct SafetyFlags(u16);

    /// Cell over-voltage
    pub over_voltage, set_over_voltage: 0;
    /// Cell under-voltage
    pub under_voltage, set_under_voltage: 1;
    /// Cell over-temperature while charging
    pub over_temperature_charge, set_over_temperature_charge: 2;
    /// Cell over-temperature while discharging
    pub over_temperature_discharge, set_over_temperature_discharge: 3;
    /// Cell under-temperature while charging
    pub under_temperature_charge, set_under_temperature_charge: 4;
    /// Cell under-temperature while discharging
    pub under_temperature_discharge, set_under_temperature_discharge: 5;
    /// Over-current while charging
    pub over_current_charge, set_over_current_charge: 6;
    /// Over-current while discharging
    pub over_current_discharge, set_over_current_discharge: 7;
}

impl SafetyFlags {
    /// Flag word with no violation set.
    pub const fn none() -> Self {
        Self(0)
    }

    /// `true` if any violation bit is set.
    pub fn any(&self) -> bool {
        self.0 != 0
    }

    /// The raw flag word, for CAN encoding.
    pub fn bits(&self) -> u16 {
        self.0
    }
}

/// Operating mode requested by the vehicle control unit.
///
/// The discriminants are the values transmitted in the state message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingRequest {
    /// No request pending
    NoRequest = 0,
    /// Disconnect the pack
    Standby = 1,
    /// Connect the pack for discharge operation
    Normal = 2,
    /// Connect the pack for charge operation
    Charge = 3,
}

/// Cell voltages as measured by the AFE.
#[derive(Copy, Clone)]
pub struct CellVoltages {
    /// Block header.
    pub header: Header,
    /// Voltage of each cell block in millivolts, string major.
    pub cell_voltage_mv: [[i16; NR_OF_CELL_BLOCKS_PER_STRING]; NR_OF_STRINGS],
    /// Invalid markers, one word per module, one bit per cell. A set bit
    /// means the measurement is invalid and the voltage value undefined.
    pub invalid_cell_voltage: [[u16; NR_OF_MODULES_PER_STRING]; NR_OF_STRINGS],
    /// Sum of all cell voltages of each string.
    pub string_voltage_mv: [i32; NR_OF_STRINGS],
}

impl CellVoltages {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::CellVoltages),
            cell_voltage_mv: [[0; NR_OF_CELL_BLOCKS_PER_STRING]; NR_OF_STRINGS],
            invalid_cell_voltage: [[0; NR_OF_MODULES_PER_STRING]; NR_OF_STRINGS],
            string_voltage_mv: [0; NR_OF_STRINGS],
        }
    }

    /// `true` if the measurement of cell `cell` in module `module` of string
    /// `string` is marked invalid.
    pub fn is_invalid(&self, string: usize, module: usize, cell: usize) -> bool {
        self.invalid_cell_voltage[string][module] & (1 << cell) != 0
    }
}

impl_block!(CellVoltages, BlockId::CellVoltages);

/// Cell temperatures as measured by the AFE.
#[derive(Copy, Clone)]
pub struct CellTemperatures {
    /// Block header.
    pub header: Header,
    /// Temperature at each sensor in tenths of a degree Celsius, string
    /// major.
    pub cell_temperature_ddeg_c: [[i16; NR_OF_TEMP_SENSORS_PER_STRING]; NR_OF_STRINGS],
    /// Invalid markers, one word per module, one bit per sensor.
    pub invalid_cell_temperature: [[u16; NR_OF_MODULES_PER_STRING]; NR_OF_STRINGS],
}

impl CellTemperatures {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::CellTemperatures),
            cell_temperature_ddeg_c: [[0; NR_OF_TEMP_SENSORS_PER_STRING]; NR_OF_STRINGS],
            invalid_cell_temperature: [[0; NR_OF_MODULES_PER_STRING]; NR_OF_STRINGS],
        }
    }

    /// `true` if the measurement of sensor `sensor` in module `module` of
    /// string `string` is marked invalid.
    pub fn is_invalid(&self, string: usize, module: usize, sensor: usize) -> bool {
        self.invalid_cell_temperature[string][module] & (1 << sensor) != 0
    }
}

impl_block!(CellTemperatures, BlockId::CellTemperatures);

/// Per-string voltage and temperature extremes, rebuilt by the aggregation
/// pass after every acquisition cycle.
#[derive(Copy, Clone)]
pub struct MinMax {
    /// Block header.
    pub header: Header,
    /// Lowest valid cell voltage of each string.
    pub minimum_cell_voltage_mv: [i16; NR_OF_STRINGS],
    /// Highest valid cell voltage of each string.
    pub maximum_cell_voltage_mv: [i16; NR_OF_STRINGS],
    /// Lowest valid cell temperature of each string.
    pub minimum_temperature_ddeg_c: [i16; NR_OF_STRINGS],
    /// Highest valid cell temperature of each string.
    pub maximum_temperature_ddeg_c: [i16; NR_OF_STRINGS],
}

impl MinMax {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::MinMax),
            minimum_cell_voltage_mv: [0; NR_OF_STRINGS],
            maximum_cell_voltage_mv: [0; NR_OF_STRINGS],
            minimum_temperature_ddeg_c: [0; NR_OF_STRINGS],
            maximum_temperature_ddeg_c: [0; NR_OF_STRINGS],
        }
    }
}

impl_block!(MinMax, BlockId::MinMax);

/// Pack and string level electrical values from the current sensors.
#[derive(Copy, Clone)]
pub struct PackValues {
    /// Block header.
    pub header: Header,
    /// Voltage across the battery terminals.
    pub battery_voltage_mv: i32,
    /// Voltage on the high-voltage bus behind the contactors.
    pub hv_bus_voltage_mv: i32,
    /// Pack current; positive values charge the battery.
    pub pack_current_ma: i32,
    /// Pack power; positive values charge the battery.
    pub pack_power_w: i32,
    /// Voltage of each string.
    pub string_voltage_mv: [i32; NR_OF_STRINGS],
    /// Current of each string; positive values charge the string.
    pub string_current_ma: [i32; NR_OF_STRINGS],
    /// Power of each string.
    pub string_power_w: [i32; NR_OF_STRINGS],
}

impl PackValues {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::PackValues),
            battery_voltage_mv: 0,
            hv_bus_voltage_mv: 0,
            pack_current_ma: 0,
            pack_power_w: 0,
            string_voltage_mv: [0; NR_OF_STRINGS],
            string_current_ma: [0; NR_OF_STRINGS],
            string_power_w: [0; NR_OF_STRINGS],
        }
    }
}

impl_block!(PackValues, BlockId::PackValues);

/// Values written by the current sensor interrupt handler.
///
/// The writer runs in interrupt context; see the database documentation for
/// the sharing rules.
#[derive(Copy, Clone)]
pub struct CurrentSensor {
    /// Block header.
    pub header: Header,
    /// Accumulated energy counter of each string in watt hours.
    pub energy_counter_wh: [i32; NR_OF_STRINGS],
}

impl CurrentSensor {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::CurrentSensor),
            energy_counter_wh: [0; NR_OF_STRINGS],
        }
    }
}

impl_block!(CurrentSensor, BlockId::CurrentSensor);

/// Recommended safe operating currents derived by the state-of-function
/// algorithm.
#[derive(Copy, Clone)]
pub struct Sof {
    /// Block header.
    pub header: Header,
    /// Recommended continuous charge current, non-negative.
    pub recommended_continuous_pack_charge_current_ma: i32,
    /// Recommended continuous discharge current, non-negative.
    pub recommended_continuous_pack_discharge_current_ma: i32,
}

impl Sof {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::Sof),
            recommended_continuous_pack_charge_current_ma: 0,
            recommended_continuous_pack_discharge_current_ma: 0,
        }
    }
}

impl_block!(Sof, BlockId::Sof);

/// State of charge and state of energy estimates, per string.
#[derive(Copy, Clone)]
pub struct Sox {
    /// Block header.
    pub header: Header,
    /// Lowest cell state of charge of each string, percent.
    pub minimum_soc_perc: [f32; NR_OF_STRINGS],
    /// Average state of charge of each string, percent.
    pub average_soc_perc: [f32; NR_OF_STRINGS],
    /// Highest cell state of charge of each string, percent.
    pub maximum_soc_perc: [f32; NR_OF_STRINGS],
    /// Lowest state of energy of each string, percent.
    pub minimum_soe_perc: [f32; NR_OF_STRINGS],
    /// Highest state of energy of each string, percent.
    pub maximum_soe_perc: [f32; NR_OF_STRINGS],
    /// Remaining energy of each string in watt hours, pessimistic estimate.
    pub minimum_soe_wh: [u32; NR_OF_STRINGS],
}

impl Sox {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::Sox),
            minimum_soc_perc: [0.0; NR_OF_STRINGS],
            average_soc_perc: [0.0; NR_OF_STRINGS],
            maximum_soc_perc: [0.0; NR_OF_STRINGS],
            minimum_soe_perc: [0.0; NR_OF_STRINGS],
            maximum_soe_perc: [0.0; NR_OF_STRINGS],
            minimum_soe_wh: [0; NR_OF_STRINGS],
        }
    }
}

impl_block!(Sox, BlockId::Sox);

/// State of health estimates, per string.
#[derive(Copy, Clone)]
pub struct Soh {
    /// Block header.
    pub header: Header,
    /// Average state of health of each string, percent.
    pub average_soh_perc: [f32; NR_OF_STRINGS],
}

impl Soh {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::Soh),
            average_soh_perc: [0.0; NR_OF_STRINGS],
        }
    }
}

impl_block!(Soh, BlockId::Soh);

/// Operating mode requested by the vehicle.
#[derive(Copy, Clone)]
pub struct StateRequest {
    /// Block header.
    pub header: Header,
    /// Currently pending request.
    pub request: OperatingRequest,
    /// Request that was pending before the current one.
    pub previous_request: OperatingRequest,
}

impl StateRequest {
    /// Block with no request pending and an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::StateRequest),
            request: OperatingRequest::NoRequest,
            previous_request: OperatingRequest::NoRequest,
        }
    }
}

impl_block!(StateRequest, BlockId::StateRequest);

/// Latched error conditions.
#[derive(Copy, Clone)]
pub struct ErrorState {
    /// Block header.
    pub header: Header,
    /// The AFE reported an error during initialization or measurement.
    pub afe_measurement_error: bool,
    /// A maximum safety limit is violated.
    pub msl_violation: bool,
    /// A precharge attempt ran over its time budget.
    pub precharge_timeout: bool,
    /// A task stack overflowed. Sticky until reboot.
    pub stack_overflow: bool,
    /// The insulation monitoring device reported a fault.
    pub insulation_error: bool,
}

impl ErrorState {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::ErrorState),
            afe_measurement_error: false,
            msl_violation: false,
            precharge_timeout: false,
            stack_overflow: false,
            insulation_error: false,
        }
    }
}

impl_block!(ErrorState, BlockId::ErrorState);

/// Maximum safety limit violations. Any set bit forces the contactors open.
#[derive(Copy, Clone)]
pub struct MslFlags {
    /// Block header.
    pub header: Header,
    /// Violations detected on each string.
    pub string: [SafetyFlags; NR_OF_STRINGS],
    /// Violations detected on pack level quantities.
    pub pack: SafetyFlags,
}

impl MslFlags {
    /// Block with no violation and an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::MslFlags),
            string: [SafetyFlags::none(); NR_OF_STRINGS],
            pack: SafetyFlags::none(),
        }
    }

    /// `true` if any violation bit is set on any string or on pack level.
    pub fn any(&self) -> bool {
        self.pack.any() || self.string.iter().any(SafetyFlags::any)
    }
}

impl_block!(MslFlags, BlockId::MslFlags);

/// Recommended safety limit violations. Trigger derating, not disconnection.
#[derive(Copy, Clone)]
pub struct RslFlags {
    /// Block header.
    pub header: Header,
    /// Violations detected on each string.
    pub string: [SafetyFlags; NR_OF_STRINGS],
    /// Violations detected on pack level quantities.
    pub pack: SafetyFlags,
}

impl RslFlags {
    /// Block with no violation and an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::RslFlags),
            string: [SafetyFlags::none(); NR_OF_STRINGS],
            pack: SafetyFlags::none(),
        }
    }
}

impl_block!(RslFlags, BlockId::RslFlags);

/// Maximum operating limit violations. The mildest tier; informational.
#[derive(Copy, Clone)]
pub struct MolFlags {
    /// Block header.
    pub header: Header,
    /// Violations detected on each string.
    pub string: [SafetyFlags; NR_OF_STRINGS],
    /// Violations detected on pack level quantities.
    pub pack: SafetyFlags,
}

impl MolFlags {
    /// Block with no violation and an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::MolFlags),
            string: [SafetyFlags::none(); NR_OF_STRINGS],
            pack: SafetyFlags::none(),
        }
    }
}

impl_block!(MolFlags, BlockId::MolFlags);

/// Open sense wire detection results.
#[derive(Copy, Clone)]
pub struct OpenWire {
    /// Block header.
    pub header: Header,
    /// Number of open sense wires detected on each string.
    pub nr_open_wires: [u16; NR_OF_STRINGS],
}

impl OpenWire {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::OpenWire),
            nr_open_wires: [0; NR_OF_STRINGS],
        }
    }
}

impl_block!(OpenWire, BlockId::OpenWire);

/// Balancing feedback measured on the slave boards.
#[derive(Copy, Clone)]
pub struct BalancingFeedback {
    /// Block header.
    pub header: Header,
    /// Feedback voltage of each string.
    pub feedback_mv: [i16; NR_OF_STRINGS],
}

impl BalancingFeedback {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::BalancingFeedback),
            feedback_mv: [0; NR_OF_STRINGS],
        }
    }
}

impl_block!(BalancingFeedback, BlockId::BalancingFeedback);

/// Balancing actuation commands for the slave boards.
#[derive(Copy, Clone)]
pub struct BalancingControl {
    /// Block header.
    pub header: Header,
    /// Global balancing enable.
    pub enabled: bool,
    /// Cells commanded to balance, one word per module, one bit per cell.
    pub balancing_active: [[u16; NR_OF_MODULES_PER_STRING]; NR_OF_STRINGS],
}

impl BalancingControl {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::BalancingControl),
            enabled: false,
            balancing_active: [[0; NR_OF_MODULES_PER_STRING]; NR_OF_STRINGS],
        }
    }

    /// `true` if any cell of string `string` is commanded to balance.
    pub fn is_string_balancing(&self, string: usize) -> bool {
        self.balancing_active[string].iter().any(|&word| word != 0)
    }
}

impl_block!(BalancingControl, BlockId::BalancingControl);

/// Slave board bookkeeping.
#[derive(Copy, Clone)]
pub struct SlaveControl {
    /// Block header.
    pub header: Header,
    /// EEPROM address the next read will use.
    pub eeprom_read_address_to_use: u32,
    /// EEPROM address the last read used.
    pub eeprom_read_address_last_used: u32,
    /// EEPROM address the next write will use.
    pub eeprom_write_address_to_use: u32,
    /// EEPROM address the last write used.
    pub eeprom_write_address_last_used: u32,
}

impl SlaveControl {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::SlaveControl),
            eeprom_read_address_to_use: 0,
            eeprom_read_address_last_used: 0,
            eeprom_write_address_to_use: 0,
            eeprom_write_address_last_used: 0,
        }
    }
}

impl_block!(SlaveControl, BlockId::SlaveControl);

/// Voltages on the slaves' GPIO pins.
#[derive(Copy, Clone)]
pub struct AllGpioVoltages {
    /// Block header.
    pub header: Header,
    /// GPIO voltages in millivolts, string major, module major within the
    /// string.
    pub gpio_voltage_mv:
        [[i16; NR_OF_MODULES_PER_STRING * NR_OF_GPIOS_PER_MODULE]; NR_OF_STRINGS],
}

impl AllGpioVoltages {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::AllGpioVoltages),
            gpio_voltage_mv: [[0; NR_OF_MODULES_PER_STRING * NR_OF_GPIOS_PER_MODULE];
                NR_OF_STRINGS],
        }
    }
}

impl_block!(AllGpioVoltages, BlockId::AllGpioVoltages);

/// Insulation monitoring device results.
#[derive(Copy, Clone)]
pub struct InsulationMonitoring {
    /// Block header.
    pub header: Header,
    /// `true` while the reported resistance is a valid measurement.
    pub valid: bool,
    /// Insulation resistance between HV plus/minus and chassis.
    pub resistance_kohm: u32,
    /// The device reports an insulation fault.
    pub fault: bool,
}

impl InsulationMonitoring {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::InsulationMonitoring),
            valid: false,
            resistance_kohm: 0,
            fault: false,
        }
    }
}

impl_block!(InsulationMonitoring, BlockId::InsulationMonitoring);

/// Aerosol sensor results.
#[derive(Copy, Clone)]
pub struct AerosolSensor {
    /// Block header.
    pub header: Header,
    /// Particulate matter concentration.
    pub particulate_matter_ug_per_m3: u16,
    /// The sensor reports a fault.
    pub fault: bool,
}

impl AerosolSensor {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::AerosolSensor),
            particulate_matter_ug_per_m3: 0,
            fault: false,
        }
    }
}

impl_block!(AerosolSensor, BlockId::AerosolSensor);

/// Ethernet PHY status reported by the network driver.
#[derive(Copy, Clone)]
pub struct Phy {
    /// Block header.
    pub header: Header,
    /// `true` while the link is up.
    pub link_up: bool,
}

impl Phy {
    /// Zeroed block with an unwritten header.
    pub const fn new() -> Self {
        Self {
            header: Header::new(BlockId::Phy),
            link_up: false,
        }
    }
}

impl_block!(Phy, BlockId::Phy);
