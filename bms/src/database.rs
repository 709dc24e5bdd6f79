//! The central measurement database
//!
//! One statically allocated instance of [`Database`] holds every block of
//! the catalog declared in [`blocks`](crate::blocks). All inter-task data
//! exchange goes through it: writers hand in a local copy of a block,
//! readers get a local copy out. No caller ever holds a reference into the
//! stored data.
//!
//! Every block lives in its own [`Mutex`] slot, so an access serializes
//! only against other accesses to the *same* block and stays bounded-time.
//! A read of one block is self-consistent; no snapshot across blocks is
//! promised. The multi-block convenience accessors ([`Database::read2`] and
//! friends) are plain sequences of independent single-block accesses with a
//! statically known lock set.
//!
//! The current-sensor interrupt handler shares this store with the tasks:
//! its writes and the corresponding reads go through the same short
//! critical sections, which are interrupt-safe by the `critical-section`
//! contract.

use crate::blocks::{
    AerosolSensor, AllGpioVoltages, BalancingControl, BalancingFeedback, Block, CellTemperatures,
    CellVoltages, CurrentSensor, ErrorState, InsulationMonitoring, MinMax, MolFlags, MslFlags,
    OpenWire, PackValues, Phy, RslFlags, SlaveControl, Sof, Soh, Sox, StateRequest,
};
use crate::config::{
    NR_OF_CELL_BLOCKS_PER_MODULE, NR_OF_CELL_BLOCKS_PER_STRING, NR_OF_TEMP_SENSORS_PER_MODULE,
    NR_OF_TEMP_SENSORS_PER_STRING,
};
use bms_core::Instant;
use core::cell::Cell;
use critical_section::Mutex;

/// Storage slot lookup for a block type.
///
/// Implemented by [`Database`] for every member of the catalog; ties each
/// block type to exactly one slot so that a mismatched access does not
/// exist. Not meant to be implemented outside this module.
pub trait Table<B: Block> {
    /// The slot holding `B`.
    fn slot(&self) -> &Mutex<Cell<B>>;
}

/// The block store.
///
/// Constructed once before any task starts and shared by reference for the
/// lifetime of the program.
pub struct Database {
    cell_voltages: Mutex<Cell<CellVoltages>>,
    cell_temperatures: Mutex<Cell<CellTemperatures>>,
    min_max: Mutex<Cell<MinMax>>,
    pack_values: Mutex<Cell<PackValues>>,
    current_sensor: Mutex<Cell<CurrentSensor>>,
    sof: Mutex<Cell<Sof>>,
    sox: Mutex<Cell<Sox>>,
    soh: Mutex<Cell<Soh>>,
    state_request: Mutex<Cell<StateRequest>>,
    error_state: Mutex<Cell<ErrorState>>,
    msl_flags: Mutex<Cell<MslFlags>>,
    rsl_flags: Mutex<Cell<RslFlags>>,
    mol_flags: Mutex<Cell<MolFlags>>,
    open_wire: Mutex<Cell<OpenWire>>,
    balancing_feedback: Mutex<Cell<BalancingFeedback>>,
    balancing_control: Mutex<Cell<BalancingControl>>,
    slave_control: Mutex<Cell<SlaveControl>>,
    all_gpio_voltages: Mutex<Cell<AllGpioVoltages>>,
    insulation_monitoring: Mutex<Cell<InsulationMonitoring>>,
    aerosol_sensor: Mutex<Cell<AerosolSensor>>,
    phy: Mutex<Cell<Phy>>,
}

macro_rules! impl_table {
    ($field:ident: $block:ty) => {
        impl Table<$block> for Database {
            fn slot(&self) -> &Mutex<Cell<$block>> {
                &self.$field
            }
        }
    };
}

impl_table!(cell_voltages: CellVoltages);
impl_table!(cell_temperatures: CellTemperatures);
impl_table!(min_max: MinMax);
impl_table!(pack_values: PackValues);
impl_table!(current_sensor: CurrentSensor);
impl_table!(sof: Sof);
impl_table!(sox: Sox);
impl_table!(soh: Soh);
impl_table!(state_request: StateRequest);
impl_table!(error_state: ErrorState);
impl_table!(msl_flags: MslFlags);
impl_table!(rsl_flags: RslFlags);
impl_table!(mol_flags: MolFlags);
impl_table!(open_wire: OpenWire);
impl_table!(balancing_feedback: BalancingFeedback);
impl_table!(balancing_control: BalancingControl);
impl_table!(slave_control: SlaveControl);
impl_table!(all_gpio_voltages: AllGpioVoltages);
impl_table!(insulation_monitoring: InsulationMonitoring);
impl_table!(aerosol_sensor: AerosolSensor);
impl_table!(phy: Phy);

impl Database {
    /// Creates the store with every block zeroed and marked never-written.
    pub const fn new() -> Self {
        Self {
            cell_voltages: Mutex::new(Cell::new(CellVoltages::new())),
            cell_temperatures: Mutex::new(Cell::new(CellTemperatures::new())),
            min_max: Mutex::new(Cell::new(MinMax::new())),
            pack_values: Mutex::new(Cell::new(PackValues::new())),
            current_sensor: Mutex::new(Cell::new(CurrentSensor::new())),
            sof: Mutex::new(Cell::new(Sof::new())),
            sox: Mutex::new(Cell::new(Sox::new())),
            soh: Mutex::new(Cell::new(Soh::new())),
            state_request: Mutex::new(Cell::new(StateRequest::new())),
            error_state: Mutex::new(Cell::new(ErrorState::new())),
            msl_flags: Mutex::new(Cell::new(MslFlags::new())),
            rsl_flags: Mutex::new(Cell::new(RslFlags::new())),
            mol_flags: Mutex::new(Cell::new(MolFlags::new())),
            open_wire: Mutex::new(Cell::new(OpenWire::new())),
            balancing_feedback: Mutex::new(Cell::new(BalancingFeedback::new())),
            balancing_control: Mutex::new(Cell::new(BalancingControl::new())),
            slave_control: Mutex::new(Cell::new(SlaveControl::new())),
            all_gpio_voltages: Mutex::new(Cell::new(AllGpioVoltages::new())),
            insulation_monitoring: Mutex::new(Cell::new(InsulationMonitoring::new())),
            aerosol_sensor: Mutex::new(Cell::new(AerosolSensor::new())),
            phy: Mutex::new(Cell::new(Phy::new())),
        }
    }

    /// Copies the current contents of a block into caller-owned storage.
    ///
    /// Never fails: a block that was never written reads back zeroed with a
    /// zero timestamp.
    pub fn read<B: Block>(&self) -> B
    where
        Self: Table<B>,
    {
        critical_section::with(|cs| <Self as Table<B>>::slot(self).borrow(cs).get())
    }

    /// Reads two blocks. Each read is independently serialized; the result
    /// is not a cross-block snapshot.
    pub fn read2<A: Block, B: Block>(&self) -> (A, B)
    where
        Self: Table<A> + Table<B>,
    {
        (self.read(), self.read())
    }

    /// Reads three blocks. Each read is independently serialized.
    pub fn read3<A: Block, B: Block, C: Block>(&self) -> (A, B, C)
    where
        Self: Table<A> + Table<B> + Table<C>,
    {
        (self.read(), self.read(), self.read())
    }

    /// Reads four blocks. Each read is independently serialized.
    pub fn read4<A: Block, B: Block, C: Block, D: Block>(&self) -> (A, B, C, D)
    where
        Self: Table<A> + Table<B> + Table<C> + Table<D>,
    {
        (self.read(), self.read(), self.read(), self.read())
    }

    /// Replaces the contents of a block.
    ///
    /// The stored header is updated atomically with the data:
    /// `previous_timestamp` takes the stored `timestamp`, `timestamp` takes
    /// `now`. The caller's header timestamps are ignored.
    pub fn write<B: Block>(&self, now: Instant, value: &B)
    where
        Self: Table<B>,
    {
        critical_section::with(|cs| {
            let slot = <Self as Table<B>>::slot(self).borrow(cs);
            let stored = slot.get();
            let mut updated = *value;
            updated.header_mut().previous_timestamp = stored.header().timestamp;
            updated.header_mut().timestamp = now;
            slot.set(updated);
        });
    }

    /// Writes two blocks. Each write is independently atomic.
    pub fn write2<A: Block, B: Block>(&self, now: Instant, a: &A, b: &B)
    where
        Self: Table<A> + Table<B>,
    {
        self.write(now, a);
        self.write(now, b);
    }

    /// Writes three blocks. Each write is independently atomic.
    pub fn write3<A: Block, B: Block, C: Block>(&self, now: Instant, a: &A, b: &B, c: &C)
    where
        Self: Table<A> + Table<B> + Table<C>,
    {
        self.write(now, a);
        self.write(now, b);
        self.write(now, c);
    }

    /// Writes four blocks. Each write is independently atomic.
    pub fn write4<A: Block, B: Block, C: Block, D: Block>(
        &self,
        now: Instant,
        a: &A,
        b: &B,
        c: &C,
        d: &D,
    ) where
        Self: Table<A> + Table<B> + Table<C> + Table<D>,
    {
        self.write(now, a);
        self.write(now, b);
        self.write(now, c);
        self.write(now, d);
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// String a flat cell index belongs to.
pub fn string_number_from_voltage_index(index: usize) -> usize {
    index / NR_OF_CELL_BLOCKS_PER_STRING
}

/// Module within its string a flat cell index belongs to.
pub fn module_number_from_voltage_index(index: usize) -> usize {
    (index % NR_OF_CELL_BLOCKS_PER_STRING) / NR_OF_CELL_BLOCKS_PER_MODULE
}

/// Cell within its module a flat cell index refers to.
pub fn cell_number_from_voltage_index(index: usize) -> usize {
    (index % NR_OF_CELL_BLOCKS_PER_STRING) % NR_OF_CELL_BLOCKS_PER_MODULE
}

/// String a flat temperature sensor index belongs to.
pub fn string_number_from_temperature_index(index: usize) -> usize {
    index / NR_OF_TEMP_SENSORS_PER_STRING
}

/// Module within its string a flat temperature sensor index belongs to.
pub fn module_number_from_temperature_index(index: usize) -> usize {
    (index % NR_OF_TEMP_SENSORS_PER_STRING) / NR_OF_TEMP_SENSORS_PER_MODULE
}

/// Sensor within its module a flat temperature sensor index refers to.
pub fn sensor_number_from_temperature_index(index: usize) -> usize {
    (index % NR_OF_TEMP_SENSORS_PER_STRING) % NR_OF_TEMP_SENSORS_PER_MODULE
}
