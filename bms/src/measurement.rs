//! Acquisition state machine for the analog front end
//!
//! The [`Measurement`] driver owns the AFE transport and sequences it
//! through initialization into a continuous measurement loop. It is driven
//! by a single [`trigger`](Measurement::trigger) entry point that the
//! acquisition task calls on a fixed one-millisecond period.
//!
//! The driver keeps local working copies of every block it publishes and
//! hands them to the database when a measurement cycle completes. The
//! completion of the *first* full cycle is latched and never cleared; the
//! pack controller refuses to close contactors before this latch is set.

use crate::blocks::{
    BalancingControl, BalancingFeedback, CellTemperatures, CellVoltages, ErrorState, OpenWire,
    SlaveControl,
};
use crate::config::{
    NR_OF_CELL_BLOCKS, NR_OF_CELL_BLOCKS_PER_STRING, NR_OF_STRINGS, NR_OF_TEMP_SENSORS,
    NR_OF_TEMP_SENSORS_PER_STRING,
};
use crate::database::Database;
use crate::error::ErrorKind;
use bms_core::{AfeTransport, Instant};

/// Idle ticks between two substate executions.
const SHORT_TIME: u16 = 1;

/// States of the acquisition state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Bootstrap value before the first tick.
    Dummy,
    /// First tick seen, nothing happened yet.
    HasNeverRun,
    /// Waiting for the external initialization request.
    Uninitialized,
    /// Bringing up the AFE and producing the first measurement.
    Initialization,
    /// Continuous measurement operation.
    Running,
    /// A transport error occurred; waiting for a recovery request.
    Error,
}

/// Substates of the acquisition state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Substate {
    /// Bootstrap value before the first tick.
    Dummy,
    /// First substate of every state.
    Entry,
    /// Produce one complete measurement before anything else runs.
    FinishFirstMeasurement,
    /// Publish the first measurement and set the latch.
    FirstMeasurementFinished,
    /// Leave initialization.
    InitializationExit,
    /// Acquire and store cell voltages.
    SaveVoltage,
    /// Acquire and store cell temperatures.
    SaveTemperature,
}

/// Working copies of the blocks this driver publishes.
struct MeasurementTables {
    cell_voltages: CellVoltages,
    cell_temperatures: CellTemperatures,
    balancing_feedback: BalancingFeedback,
    balancing_control: BalancingControl,
    slave_control: SlaveControl,
    open_wire: OpenWire,
}

impl MeasurementTables {
    const fn new() -> Self {
        Self {
            cell_voltages: CellVoltages::new(),
            cell_temperatures: CellTemperatures::new(),
            balancing_feedback: BalancingFeedback::new(),
            balancing_control: BalancingControl::new(),
            slave_control: SlaveControl::new(),
            open_wire: OpenWire::new(),
        }
    }
}

/// The acquisition driver.
pub struct Measurement<A> {
    afe: A,
    timer: u16,
    trigger_entry: u8,
    current_state: State,
    previous_state: State,
    current_substate: Substate,
    previous_substate: Substate,
    first_measurement_finished: bool,
    initialization_requested: bool,
    recovery_requested: bool,
    last_error: Option<ErrorKind>,
    data: MeasurementTables,
}

impl<A: AfeTransport> Measurement<A> {
    /// Creates the driver around its transport. The state machine starts in
    /// the bootstrap state and does nothing until triggered.
    pub fn new(afe: A) -> Self {
        Self {
            afe,
            timer: 0,
            trigger_entry: 0,
            current_state: State::Dummy,
            previous_state: State::Dummy,
            current_substate: Substate::Dummy,
            previous_substate: Substate::Dummy,
            first_measurement_finished: false,
            initialization_requested: false,
            recovery_requested: false,
            last_error: None,
            data: MeasurementTables::new(),
        }
    }

    /// Requests the transition from `Uninitialized` into initialization.
    pub fn initialize(&mut self) {
        self.initialization_requested = true;
    }

    /// Requests the transition from `Error` back to `Uninitialized`.
    pub fn request_recovery(&mut self) {
        self.recovery_requested = true;
    }

    /// `true` once the first complete measurement cycle has been published.
    /// The latch is never cleared.
    pub fn is_first_measurement_finished(&self) -> bool {
        critical_section::with(|_cs| self.first_measurement_finished)
    }

    /// Current state, for supervision and tests.
    pub fn state(&self) -> State {
        self.current_state
    }

    /// State before the last transition, for supervision and tests.
    pub fn previous_state(&self) -> State {
        self.previous_state
    }

    /// Substate before the last transition, for supervision and tests.
    pub fn previous_substate(&self) -> Substate {
        self.previous_substate
    }

    /// Classification of the condition that latched the error state, if
    /// any. Cleared by a recovery request.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Advances the state machine by one tick.
    ///
    /// Called on a fixed period from the acquisition task. A tick that
    /// arrives while another one is still being processed is dropped; a
    /// nonzero substate timer consumes the tick without advancing.
    pub fn trigger(&mut self, now: Instant, db: &Database) {
        if self.check_multiple_calls() {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
            if self.timer > 0 {
                self.leave_trigger();
                return;
            }
        }
        self.run_state_machine(now, db);
        self.leave_trigger();
    }

    /// Detects a nested trigger invocation. The counter is checked and
    /// bumped inside a critical section so the check itself cannot race.
    fn check_multiple_calls(&mut self) -> bool {
        critical_section::with(|_cs| {
            if self.trigger_entry > 0 {
                true
            } else {
                self.trigger_entry += 1;
                false
            }
        })
    }

    fn leave_trigger(&mut self) {
        critical_section::with(|_cs| {
            self.trigger_entry -= 1;
        });
    }

    fn set_state(&mut self, next_state: State, next_substate: Substate, idle_time: u16) {
        self.timer = idle_time;
        self.previous_state = self.current_state;
        self.current_state = next_state;
        self.previous_substate = self.current_substate;
        self.current_substate = next_substate;
        #[cfg(feature = "defmt")]
        defmt::trace!("afe fsm: {} -> {}", self.previous_state, self.current_state);
    }

    fn set_substate(&mut self, next_substate: Substate, idle_time: u16) {
        self.timer = idle_time;
        self.previous_substate = self.current_substate;
        self.current_substate = next_substate;
    }

    fn run_state_machine(&mut self, now: Instant, db: &Database) {
        match self.current_state {
            State::Dummy => {
                self.set_state(State::HasNeverRun, Substate::Entry, SHORT_TIME);
            }
            State::HasNeverRun => {
                self.set_state(State::Uninitialized, Substate::Entry, SHORT_TIME);
            }
            State::Uninitialized => {
                if self.initialization_requested {
                    self.initialization_requested = false;
                    self.set_state(State::Initialization, Substate::Entry, SHORT_TIME);
                }
            }
            State::Initialization => self.process_initialization_state(now, db),
            State::Running => self.process_running_state(now, db),
            State::Error => {
                if self.recovery_requested {
                    self.recovery_requested = false;
                    self.last_error = None;
                    self.set_state(State::Uninitialized, Substate::Entry, SHORT_TIME);
                }
            }
        }
    }

    fn process_initialization_state(&mut self, now: Instant, db: &Database) {
        match self.current_substate {
            Substate::Entry => {
                if self.afe.initialize().is_ok() {
                    self.set_substate(Substate::FinishFirstMeasurement, SHORT_TIME);
                } else {
                    self.enter_error_state(now, db);
                }
            }
            Substate::FinishFirstMeasurement => {
                let voltages_ok = self.save_voltage_measurement_data(now, db, false);
                let temperatures_ok =
                    voltages_ok && self.save_temperature_measurement_data(now, db, false);
                if temperatures_ok {
                    self.set_substate(Substate::FirstMeasurementFinished, SHORT_TIME);
                } else {
                    self.enter_error_state(now, db);
                }
            }
            Substate::FirstMeasurementFinished => {
                self.set_first_measurement_cycle_finished(now, db);
                self.set_substate(Substate::InitializationExit, SHORT_TIME);
            }
            Substate::InitializationExit => {
                self.set_state(State::Running, Substate::Entry, SHORT_TIME);
            }
            _ => {
                self.set_substate(Substate::Entry, SHORT_TIME);
            }
        }
    }

    fn process_running_state(&mut self, now: Instant, db: &Database) {
        match self.current_substate {
            Substate::Entry => {
                self.set_substate(Substate::SaveVoltage, SHORT_TIME);
            }
            Substate::SaveVoltage => {
                if self.save_voltage_measurement_data(now, db, true) {
                    self.set_substate(Substate::SaveTemperature, SHORT_TIME);
                } else {
                    self.enter_error_state(now, db);
                }
            }
            Substate::SaveTemperature => {
                if self.save_temperature_measurement_data(now, db, true) {
                    self.set_substate(Substate::SaveVoltage, SHORT_TIME);
                } else {
                    self.enter_error_state(now, db);
                }
            }
            _ => {
                self.set_substate(Substate::Entry, SHORT_TIME);
            }
        }
    }

    fn enter_error_state(&mut self, now: Instant, db: &Database) {
        let mut error_state: ErrorState = db.read();
        error_state.afe_measurement_error = true;
        db.write(now, &error_state);
        self.last_error = Some(ErrorKind::Measurement);
        self.set_state(State::Error, Substate::Entry, SHORT_TIME);
        #[cfg(feature = "defmt")]
        defmt::warn!("afe fsm: transport error, acquisition halted");
    }

    /// Reads one set of cell voltages from the transport into the local
    /// table. The table is written to the database only when `publish` is
    /// set; the first-measurement path publishes all blocks at once later.
    fn save_voltage_measurement_data(&mut self, now: Instant, db: &Database, publish: bool) -> bool {
        let mut flat = [0i16; NR_OF_CELL_BLOCKS];
        if self.afe.read_voltages(&mut flat).is_err() {
            return false;
        }
        for s in 0..NR_OF_STRINGS {
            let row = &flat[s * NR_OF_CELL_BLOCKS_PER_STRING..(s + 1) * NR_OF_CELL_BLOCKS_PER_STRING];
            self.data.cell_voltages.cell_voltage_mv[s].copy_from_slice(row);
            self.data.cell_voltages.string_voltage_mv[s] =
                row.iter().map(|&mv| i32::from(mv)).sum();
        }
        if publish {
            db.write(now, &self.data.cell_voltages);
        }
        true
    }

    /// Reads one set of cell temperatures from the transport into the local
    /// table, mirroring [`Self::save_voltage_measurement_data`].
    fn save_temperature_measurement_data(
        &mut self,
        now: Instant,
        db: &Database,
        publish: bool,
    ) -> bool {
        let mut flat = [0i16; NR_OF_TEMP_SENSORS];
        if self.afe.read_temperatures(&mut flat).is_err() {
            return false;
        }
        for s in 0..NR_OF_STRINGS {
            let row =
                &flat[s * NR_OF_TEMP_SENSORS_PER_STRING..(s + 1) * NR_OF_TEMP_SENSORS_PER_STRING];
            self.data.cell_temperatures.cell_temperature_ddeg_c[s].copy_from_slice(row);
        }
        if publish {
            db.write(now, &self.data.cell_temperatures);
        }
        true
    }

    /// Sets the first-measurement latch and publishes every block this
    /// driver owns in one go.
    fn set_first_measurement_cycle_finished(&mut self, now: Instant, db: &Database) {
        critical_section::with(|_cs| {
            self.first_measurement_finished = true;
        });
        self.data.slave_control.eeprom_read_address_to_use = u32::MAX;
        self.data.slave_control.eeprom_read_address_last_used = u32::MAX;
        self.data.slave_control.eeprom_write_address_to_use = u32::MAX;
        self.data.slave_control.eeprom_write_address_last_used = u32::MAX;
        db.write4(
            now,
            &self.data.cell_voltages,
            &self.data.cell_temperatures,
            &self.data.balancing_feedback,
            &self.data.balancing_control,
        );
        db.write2(now, &self.data.slave_control, &self.data.open_wire);
        #[cfg(feature = "defmt")]
        defmt::info!("afe fsm: first measurement finished");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blocks::{CellTemperatures, CellVoltages};
    use crate::config::{CELL_TEMPERATURE_NOMINAL_DDEG_C, CELL_VOLTAGE_NOMINAL_MV};

    struct FakeAfe {
        voltage_mv: i16,
        temperature_ddeg_c: i16,
        fail_initialize: bool,
        fail_reads: bool,
    }

    impl FakeAfe {
        fn healthy() -> Self {
            Self {
                voltage_mv: CELL_VOLTAGE_NOMINAL_MV,
                temperature_ddeg_c: CELL_TEMPERATURE_NOMINAL_DDEG_C,
                fail_initialize: false,
                fail_reads: false,
            }
        }
    }

    impl AfeTransport for FakeAfe {
        type Error = ();

        fn initialize(&mut self) -> Result<(), ()> {
            if self.fail_initialize {
                Err(())
            } else {
                Ok(())
            }
        }

        fn read_voltages(&mut self, voltages: &mut [i16]) -> Result<(), ()> {
            if self.fail_reads {
                return Err(());
            }
            voltages.fill(self.voltage_mv);
            Ok(())
        }

        fn read_temperatures(&mut self, temperatures: &mut [i16]) -> Result<(), ()> {
            if self.fail_reads {
                return Err(());
            }
            temperatures.fill(self.temperature_ddeg_c);
            Ok(())
        }
    }

    fn tick_until<A: AfeTransport>(
        measurement: &mut Measurement<A>,
        db: &Database,
        ticks: u32,
        done: impl Fn(&Measurement<A>) -> bool,
    ) -> bool {
        for tick in 1..=ticks {
            measurement.trigger(Instant::from_ticks(tick), db);
            if done(measurement) {
                return true;
            }
        }
        false
    }

    #[test]
    fn first_measurement_latch_and_blocks_published() {
        let db = Database::new();
        let mut measurement = Measurement::new(FakeAfe::healthy());
        measurement.initialize();

        assert!(tick_until(&mut measurement, &db, 50, |m| m
            .is_first_measurement_finished()));

        let voltages: CellVoltages = db.read();
        let temperatures: CellTemperatures = db.read();
        assert!(voltages.header.timestamp.ticks() > 0);
        assert!(temperatures.header.timestamp.ticks() > 0);
        assert_eq!(voltages.cell_voltage_mv[0][0], CELL_VOLTAGE_NOMINAL_MV);
        assert_eq!(
            voltages.string_voltage_mv[0],
            i32::from(CELL_VOLTAGE_NOMINAL_MV) * NR_OF_CELL_BLOCKS_PER_STRING as i32
        );
        assert_eq!(
            temperatures.cell_temperature_ddeg_c[0][0],
            CELL_TEMPERATURE_NOMINAL_DDEG_C
        );
    }

    #[test]
    fn reaches_running_and_keeps_publishing() {
        let db = Database::new();
        let mut measurement = Measurement::new(FakeAfe::healthy());
        measurement.initialize();

        assert!(tick_until(&mut measurement, &db, 50, |m| m.state()
            == State::Running));
        let first: CellVoltages = db.read();

        for tick in 51..100 {
            measurement.trigger(Instant::from_ticks(tick), &db);
        }
        let later: CellVoltages = db.read();
        assert!(later.header.timestamp > first.header.timestamp);
    }

    #[test]
    fn nested_trigger_does_not_advance_the_machine() {
        let db = Database::new();
        let mut measurement = Measurement::new(FakeAfe::healthy());

        measurement.trigger_entry = 1;
        measurement.trigger(Instant::from_ticks(1), &db);
        assert_eq!(measurement.state(), State::Dummy);

        measurement.trigger_entry = 0;
        measurement.trigger(Instant::from_ticks(2), &db);
        assert_eq!(measurement.state(), State::HasNeverRun);
    }

    #[test]
    fn substate_timer_consumes_ticks_without_advancing() {
        let db = Database::new();
        let mut measurement = Measurement::new(FakeAfe::healthy());
        measurement.trigger(Instant::from_ticks(1), &db);
        assert_eq!(measurement.state(), State::HasNeverRun);

        measurement.timer = 3;
        measurement.trigger(Instant::from_ticks(2), &db);
        measurement.trigger(Instant::from_ticks(3), &db);
        assert_eq!(measurement.state(), State::HasNeverRun);
        measurement.trigger(Instant::from_ticks(4), &db);
        assert_eq!(measurement.state(), State::Uninitialized);
    }

    #[test]
    fn stays_uninitialized_without_request() {
        let db = Database::new();
        let mut measurement = Measurement::new(FakeAfe::healthy());
        assert!(!tick_until(&mut measurement, &db, 20, |m| m.state()
            == State::Initialization));
        assert_eq!(measurement.state(), State::Uninitialized);
    }

    #[test]
    fn transport_error_latches_error_state() {
        let db = Database::new();
        let mut afe = FakeAfe::healthy();
        afe.fail_initialize = true;
        let mut measurement = Measurement::new(afe);
        measurement.initialize();

        assert!(tick_until(&mut measurement, &db, 20, |m| m.state()
            == State::Error));
        let error_state: ErrorState = db.read();
        assert!(error_state.afe_measurement_error);
        assert!(!measurement.is_first_measurement_finished());
    }

    #[test]
    fn recovery_request_returns_to_uninitialized() {
        let db = Database::new();
        let mut afe = FakeAfe::healthy();
        afe.fail_initialize = true;
        let mut measurement = Measurement::new(afe);
        measurement.initialize();
        assert!(tick_until(&mut measurement, &db, 20, |m| m.state()
            == State::Error));

        measurement.request_recovery();
        assert!(tick_until(&mut measurement, &db, 5, |m| m.state()
            == State::Uninitialized));
    }

    #[test]
    fn running_read_error_latches_error_state() {
        let db = Database::new();
        let mut measurement = Measurement::new(FakeAfe::healthy());
        measurement.initialize();
        assert!(tick_until(&mut measurement, &db, 50, |m| m.state()
            == State::Running));

        measurement.afe.fail_reads = true;
        assert!(tick_until(&mut measurement, &db, 20, |m| m.state()
            == State::Error));
        assert!(measurement.is_first_measurement_finished());
    }
}
