//! Pack connection control
//!
//! Home of the contactor state machine and of the small query surface the
//! CAN encoders consume: which strings are in circuit and in which
//! direction current is flowing.
//!
//! The controller is triggered from the BMS logic task. Each tick it
//! refreshes the safety-limit flags from the latest aggregated extremes,
//! classifies the pack current and advances the connection state machine.
//! Any maximum-safety-limit violation opens all contactors and latches the
//! error state; so does a precharge that runs over its time budget.

use crate::blocks::{ErrorState, MinMax, MslFlags, OperatingRequest, PackValues, StateRequest};
use crate::config::{
    CELL_TEMPERATURE_MAX_CHARGE_MSL_DDEG_C, CELL_TEMPERATURE_MAX_DISCHARGE_MSL_DDEG_C,
    CELL_TEMPERATURE_MIN_CHARGE_MSL_DDEG_C, CELL_TEMPERATURE_MIN_DISCHARGE_MSL_DDEG_C,
    CELL_VOLTAGE_MAX_MSL_MV, CELL_VOLTAGE_MIN_MSL_MV, CURRENT_MAX_CHARGE_MSL_MA,
    CURRENT_MAX_DISCHARGE_MSL_MA, NR_OF_STRINGS, PRECHARGE_TIMEOUT_MS,
    PRECHARGE_VOLTAGE_THRESHOLD_MV, REST_CURRENT_MA,
};
use crate::database::Database;
use crate::error::ErrorKind;
use bms_core::{ContactorControl, Instant};

/// Direction of current flow. Positive current charges the battery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CurrentFlow {
    /// Current flows into the battery.
    Charging,
    /// Current flows out of the battery.
    Discharging,
    /// Current magnitude is below the rest threshold.
    AtRest,
}

/// Classifies a current value, with the rest band from the configuration
/// keeping the answer stable around zero.
pub fn current_flow_direction(current_ma: i32) -> CurrentFlow {
    if current_ma.unsigned_abs() < REST_CURRENT_MA.unsigned_abs() {
        CurrentFlow::AtRest
    } else if current_ma > 0 {
        CurrentFlow::Charging
    } else {
        CurrentFlow::Discharging
    }
}

/// Connection status queries consumed by the CAN encoders.
pub trait StringStatus {
    /// `true` while string `string` is in circuit.
    fn is_string_closed(&self, string: usize) -> bool;

    /// Number of strings currently in circuit.
    fn number_of_connected_strings(&self) -> u8;

    /// Direction of the pack current as classified on the last tick.
    fn battery_system_state(&self) -> CurrentFlow;

    /// State of the connection state machine.
    fn pack_state(&self) -> PackState;
}

/// States of the pack connection state machine.
///
/// The discriminants are the values transmitted in the state message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PackState {
    /// All contactors open, waiting for a connection request.
    Standby = 0,
    /// Precharge path closed, waiting for the DC link to charge up.
    Precharge = 1,
    /// At least one string connected.
    Normal = 2,
    /// A safety limit was violated or a precharge timed out; all
    /// contactors are open.
    Error = 3,
}

/// The pack connection controller.
pub struct PackController {
    state: PackState,
    closed_strings: [bool; NR_OF_STRINGS],
    precharge_started: Instant,
    system_state: CurrentFlow,
    latched_error: Option<ErrorKind>,
}

impl PackController {
    /// String whose precharge path limits the inrush current.
    const PRECHARGE_STRING: usize = 0;

    /// Creates the controller in standby with every string open.
    pub const fn new() -> Self {
        Self {
            state: PackState::Standby,
            closed_strings: [false; NR_OF_STRINGS],
            precharge_started: Instant::from_ticks(0),
            system_state: CurrentFlow::AtRest,
            latched_error: None,
        }
    }

    /// Current state, for supervision and tests.
    pub fn state(&self) -> PackState {
        self.state
    }

    /// Classification of the condition that latched the error state, if
    /// any. Cleared when the controller returns to standby.
    pub fn latched_error(&self) -> Option<ErrorKind> {
        self.latched_error
    }

    /// Advances the controller by one tick.
    ///
    /// `first_measurement_finished` is the acquisition driver's latch; no
    /// contactor closes before it is set.
    pub fn trigger<C: ContactorControl>(
        &mut self,
        now: Instant,
        db: &Database,
        contactors: &mut C,
        first_measurement_finished: bool,
    ) {
        let (request, pack_values): (StateRequest, PackValues) = db.read2();
        self.system_state = current_flow_direction(pack_values.pack_current_ma);

        let msl = self.update_safety_flags(now, db, &pack_values);
        if msl.any() && self.state != PackState::Error {
            self.enter_error_state(now, db, contactors);
        }

        match self.state {
            PackState::Standby => {
                let connect = matches!(
                    request.request,
                    OperatingRequest::Normal | OperatingRequest::Charge
                );
                if connect && first_measurement_finished && !msl.any() {
                    contactors.close_precharge(Self::PRECHARGE_STRING);
                    self.precharge_started = now;
                    self.state = PackState::Precharge;
                }
            }
            PackState::Precharge => {
                let delta_mv =
                    (pack_values.battery_voltage_mv - pack_values.hv_bus_voltage_mv).abs();
                if delta_mv < PRECHARGE_VOLTAGE_THRESHOLD_MV {
                    contactors.close_main(Self::PRECHARGE_STRING);
                    contactors.open_precharge(Self::PRECHARGE_STRING);
                    self.closed_strings[Self::PRECHARGE_STRING] = true;
                    self.state = PackState::Normal;
                } else if now - self.precharge_started
                    >= bms_core::Duration::millis(PRECHARGE_TIMEOUT_MS)
                {
                    let mut error_state: ErrorState = db.read();
                    error_state.precharge_timeout = true;
                    db.write(now, &error_state);
                    self.enter_error_state(now, db, contactors);
                }
            }
            PackState::Normal => {
                if request.request == OperatingRequest::Standby {
                    self.open_all(contactors);
                    self.state = PackState::Standby;
                } else if let Some(string) =
                    (0..NR_OF_STRINGS).find(|&s| !self.closed_strings[s])
                {
                    // connect the remaining strings one tick at a time
                    contactors.close_main(string);
                    self.closed_strings[string] = true;
                }
            }
            PackState::Error => {
                self.open_all(contactors);
                if !msl.any() && request.request == OperatingRequest::Standby {
                    let mut error_state: ErrorState = db.read();
                    error_state.precharge_timeout = false;
                    error_state.msl_violation = false;
                    db.write(now, &error_state);
                    self.latched_error = None;
                    self.state = PackState::Standby;
                }
            }
        }
    }

    fn enter_error_state<C: ContactorControl>(
        &mut self,
        now: Instant,
        db: &Database,
        contactors: &mut C,
    ) {
        self.open_all(contactors);
        self.state = PackState::Error;
        let mut error_state: ErrorState = db.read();
        error_state.msl_violation = db.read::<MslFlags>().any();
        if error_state.msl_violation {
            self.latched_error = Some(ErrorKind::Limit);
        }
        db.write(now, &error_state);
        #[cfg(feature = "defmt")]
        defmt::warn!("pack control: contactors opened, error latched");
    }

    fn open_all<C: ContactorControl>(&mut self, contactors: &mut C) {
        for string in 0..NR_OF_STRINGS {
            contactors.open_main(string);
            contactors.open_precharge(string);
            self.closed_strings[string] = false;
        }
    }

    /// Sweeps the aggregated extremes and the string currents against the
    /// maximum safety limits and publishes the resulting flag block. Skipped
    /// while the extremes block was never written, so zeroed startup data
    /// cannot raise violations.
    fn update_safety_flags(
        &self,
        now: Instant,
        db: &Database,
        pack_values: &PackValues,
    ) -> MslFlags {
        let min_max: MinMax = db.read();
        let mut flags: MslFlags = db.read();
        if !min_max.header.is_fresh() {
            return flags;
        }
        for s in 0..NR_OF_STRINGS {
            let string_flags = &mut flags.string[s];
            string_flags
                .set_over_voltage(min_max.maximum_cell_voltage_mv[s] > CELL_VOLTAGE_MAX_MSL_MV);
            string_flags
                .set_under_voltage(min_max.minimum_cell_voltage_mv[s] < CELL_VOLTAGE_MIN_MSL_MV);

            let direction = current_flow_direction(pack_values.string_current_ma[s]);
            let charging = direction == CurrentFlow::Charging;
            let (max_t, min_t) = if charging {
                (
                    CELL_TEMPERATURE_MAX_CHARGE_MSL_DDEG_C,
                    CELL_TEMPERATURE_MIN_CHARGE_MSL_DDEG_C,
                )
            } else {
                (
                    CELL_TEMPERATURE_MAX_DISCHARGE_MSL_DDEG_C,
                    CELL_TEMPERATURE_MIN_DISCHARGE_MSL_DDEG_C,
                )
            };
            let over_t = min_max.maximum_temperature_ddeg_c[s] > max_t;
            let under_t = min_max.minimum_temperature_ddeg_c[s] < min_t;
            string_flags.set_over_temperature_charge(charging && over_t);
            string_flags.set_over_temperature_discharge(!charging && over_t);
            string_flags.set_under_temperature_charge(charging && under_t);
            string_flags.set_under_temperature_discharge(!charging && under_t);

            let current = pack_values.string_current_ma[s];
            string_flags.set_over_current_charge(current > CURRENT_MAX_CHARGE_MSL_MA);
            string_flags.set_over_current_discharge(-current > CURRENT_MAX_DISCHARGE_MSL_MA);
        }
        flags.pack.set_over_current_charge(
            pack_values.pack_current_ma > CURRENT_MAX_CHARGE_MSL_MA * NR_OF_STRINGS as i32,
        );
        flags.pack.set_over_current_discharge(
            -pack_values.pack_current_ma > CURRENT_MAX_DISCHARGE_MSL_MA * NR_OF_STRINGS as i32,
        );
        db.write(now, &flags);
        flags
    }
}

impl Default for PackController {
    fn default() -> Self {
        Self::new()
    }
}

impl StringStatus for PackController {
    fn is_string_closed(&self, string: usize) -> bool {
        self.closed_strings[string]
    }

    fn number_of_connected_strings(&self) -> u8 {
        self.closed_strings.iter().filter(|&&closed| closed).count() as u8
    }

    fn battery_system_state(&self) -> CurrentFlow {
        self.system_state
    }

    fn pack_state(&self) -> PackState {
        self.state
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct FakeContactors {
        main_closed: [bool; NR_OF_STRINGS],
        precharge_closed: [bool; NR_OF_STRINGS],
    }

    impl ContactorControl for FakeContactors {
        fn close_precharge(&mut self, string: usize) {
            self.precharge_closed[string] = true;
        }

        fn open_precharge(&mut self, string: usize) {
            self.precharge_closed[string] = false;
        }

        fn close_main(&mut self, string: usize) {
            self.main_closed[string] = true;
        }

        fn open_main(&mut self, string: usize) {
            self.main_closed[string] = false;
        }

        fn is_main_closed(&self, string: usize) -> bool {
            self.main_closed[string]
        }
    }

    fn seed_healthy_pack(db: &Database) {
        let mut min_max = MinMax::new();
        for s in 0..NR_OF_STRINGS {
            min_max.minimum_cell_voltage_mv[s] = 3200;
            min_max.maximum_cell_voltage_mv[s] = 3900;
            min_max.minimum_temperature_ddeg_c[s] = 150;
            min_max.maximum_temperature_ddeg_c[s] = 300;
        }
        let mut pack_values = PackValues::new();
        pack_values.battery_voltage_mv = 46_800;
        pack_values.hv_bus_voltage_mv = 46_500;
        db.write2(Instant::from_ticks(1), &min_max, &pack_values);
    }

    fn request(db: &Database, request: OperatingRequest) {
        let mut block: StateRequest = db.read();
        block.previous_request = block.request;
        block.request = request;
        db.write(Instant::from_ticks(1), &block);
    }

    fn run_ticks(
        controller: &mut PackController,
        db: &Database,
        contactors: &mut FakeContactors,
        from: u32,
        count: u32,
    ) {
        for tick in from..from + count {
            controller.trigger(Instant::from_ticks(tick), db, contactors, true);
        }
    }

    #[test]
    fn current_classification_uses_rest_band() {
        assert_eq!(current_flow_direction(0), CurrentFlow::AtRest);
        assert_eq!(current_flow_direction(REST_CURRENT_MA - 1), CurrentFlow::AtRest);
        assert_eq!(current_flow_direction(-(REST_CURRENT_MA - 1)), CurrentFlow::AtRest);
        assert_eq!(current_flow_direction(REST_CURRENT_MA), CurrentFlow::Charging);
        assert_eq!(current_flow_direction(-REST_CURRENT_MA), CurrentFlow::Discharging);
    }

    #[test]
    fn connects_all_strings_after_precharge() {
        let db = Database::new();
        seed_healthy_pack(&db);
        request(&db, OperatingRequest::Normal);
        let mut controller = PackController::new();
        let mut contactors = FakeContactors::default();

        run_ticks(&mut controller, &db, &mut contactors, 10, 10);
        assert_eq!(controller.state(), PackState::Normal);
        assert_eq!(controller.number_of_connected_strings(), NR_OF_STRINGS as u8);
        for s in 0..NR_OF_STRINGS {
            assert!(controller.is_string_closed(s));
            assert!(contactors.is_main_closed(s));
        }
        assert!(!contactors.precharge_closed[0]);
    }

    #[test]
    fn refuses_to_connect_before_first_measurement() {
        let db = Database::new();
        seed_healthy_pack(&db);
        request(&db, OperatingRequest::Normal);
        let mut controller = PackController::new();
        let mut contactors = FakeContactors::default();

        for tick in 10..20 {
            controller.trigger(Instant::from_ticks(tick), &db, &mut contactors, false);
        }
        assert_eq!(controller.state(), PackState::Standby);
        assert_eq!(controller.number_of_connected_strings(), 0);
    }

    #[test]
    fn precharge_timeout_latches_error() {
        let db = Database::new();
        seed_healthy_pack(&db);
        // bus voltage far from battery voltage: precharge can never finish
        let mut pack_values: PackValues = db.read();
        pack_values.hv_bus_voltage_mv = 0;
        db.write(Instant::from_ticks(1), &pack_values);
        request(&db, OperatingRequest::Normal);
        let mut controller = PackController::new();
        let mut contactors = FakeContactors::default();

        run_ticks(&mut controller, &db, &mut contactors, 10, PRECHARGE_TIMEOUT_MS + 20);
        assert_eq!(controller.state(), PackState::Error);
        assert_eq!(controller.number_of_connected_strings(), 0);
        let error_state: ErrorState = db.read();
        assert!(error_state.precharge_timeout);
    }

    #[test]
    fn msl_violation_opens_all_contactors() {
        let db = Database::new();
        seed_healthy_pack(&db);
        request(&db, OperatingRequest::Normal);
        let mut controller = PackController::new();
        let mut contactors = FakeContactors::default();
        run_ticks(&mut controller, &db, &mut contactors, 10, 10);
        assert_eq!(controller.state(), PackState::Normal);

        let mut min_max: MinMax = db.read();
        min_max.maximum_cell_voltage_mv[1] = CELL_VOLTAGE_MAX_MSL_MV + 100;
        db.write(Instant::from_ticks(30), &min_max);
        run_ticks(&mut controller, &db, &mut contactors, 31, 2);

        assert_eq!(controller.state(), PackState::Error);
        assert_eq!(controller.number_of_connected_strings(), 0);
        for s in 0..NR_OF_STRINGS {
            assert!(!contactors.is_main_closed(s));
        }
        let flags: MslFlags = db.read();
        assert!(flags.string[1].over_voltage());
        let error_state: ErrorState = db.read();
        assert!(error_state.msl_violation);
    }

    #[test]
    fn zeroed_startup_data_raises_no_violation() {
        let db = Database::new();
        let mut controller = PackController::new();
        let mut contactors = FakeContactors::default();
        controller.trigger(Instant::from_ticks(5), &db, &mut contactors, false);
        let flags: MslFlags = db.read();
        assert!(!flags.any());
        assert_eq!(controller.state(), PackState::Standby);
    }

    #[test]
    fn standby_request_disconnects_again() {
        let db = Database::new();
        seed_healthy_pack(&db);
        request(&db, OperatingRequest::Normal);
        let mut controller = PackController::new();
        let mut contactors = FakeContactors::default();
        run_ticks(&mut controller, &db, &mut contactors, 10, 10);
        assert_eq!(controller.state(), PackState::Normal);

        request(&db, OperatingRequest::Standby);
        run_ticks(&mut controller, &db, &mut contactors, 30, 2);
        assert_eq!(controller.state(), PackState::Standby);
        assert_eq!(controller.number_of_connected_strings(), 0);
    }
}
