//! Periodic transmit scheduling
//!
//! A fixed registry lists every periodic message together with its timing
//! and its encoder. The dispatcher is ticked by the CAN task on the common
//! divisor of all message periods (10 ms); each tick it fires exactly the
//! messages whose period and phase match the current time.
//!
//! Transmission is best effort: a frame the peripheral cannot take is
//! dropped and the message simply transmits again at its next period.
//!
//! The dispatcher owns the long-lived local copies of the database blocks
//! the encoders read ([`TxTables`]). Multiplexed encoders refresh their
//! source copy only when their counter wraps to zero, so one rotation of
//! frames always describes one consistent snapshot of its block.

use super::cbs::TxEncoder;
use super::{properties, timing, Endianness, MessageProperties, TxTiming};
use crate::blocks::{
    BalancingControl, CellTemperatures, CellVoltages, CurrentSensor, ErrorState, MinMax, MolFlags,
    MslFlags, PackValues, RslFlags, Sof, Sox, StateRequest,
};
use crate::control::StringStatus;
use crate::database::Database;
use bms_core::{CanInterface, Instant};

/// Number of periodic transmit messages.
pub const NR_OF_TX_MESSAGES: usize = 13;

/// One entry of the transmit registry.
pub struct TxMessage {
    /// Message definition.
    pub properties: MessageProperties,
    /// Cycle time and phase.
    pub timing: TxTiming,
    /// Encoder producing the message data.
    pub encoder: TxEncoder,
    /// Multiplexer counter for rotating encoders; unused by single-frame
    /// encoders. Touched only by the transmit task.
    mux: u8,
}

impl TxMessage {
    const fn new(properties: MessageProperties, timing: TxTiming, encoder: TxEncoder) -> Self {
        Self {
            properties,
            timing,
            encoder,
            mux: 0,
        }
    }
}

/// Local copies of the database blocks the encoders read.
///
/// The copies persist across dispatcher ticks; each encoder decides when to
/// refresh its own source block.
pub struct TxTables {
    /// Cell voltages, refreshed at the start of each voltage rotation.
    pub cell_voltages: CellVoltages,
    /// Cell temperatures, refreshed at the start of each rotation.
    pub cell_temperatures: CellTemperatures,
    /// Per-string extremes, refreshed by the min/max message.
    pub min_max: MinMax,
    /// Pack values, refreshed by the pack-values message.
    pub pack_values: PackValues,
    /// Current sensor values, refreshed at the start of each rotation.
    pub current_sensor: CurrentSensor,
    /// Recommended currents, refreshed by the limit-values message.
    pub sof: Sof,
    /// State estimates, refreshed by the pack-state-estimation message.
    pub sox: Sox,
    /// Pending operating request, refreshed by the state message.
    pub state_request: StateRequest,
    /// Latched errors, refreshed by the state message.
    pub error_state: ErrorState,
    /// Maximum safety limit flags, refreshed by the state message.
    pub msl_flags: MslFlags,
    /// Recommended safety limit flags, refreshed by the detail message.
    pub rsl_flags: RslFlags,
    /// Maximum operating limit flags, refreshed by the detail message.
    pub mol_flags: MolFlags,
    /// Balancing commands, refreshed by the string-state message.
    pub balancing_control: BalancingControl,
}

impl TxTables {
    /// Creates the table set with every copy zeroed.
    pub const fn new() -> Self {
        Self {
            cell_voltages: CellVoltages::new(),
            cell_temperatures: CellTemperatures::new(),
            min_max: MinMax::new(),
            pack_values: PackValues::new(),
            current_sensor: CurrentSensor::new(),
            sof: Sof::new(),
            sox: Sox::new(),
            state_request: StateRequest::new(),
            error_state: ErrorState::new(),
            msl_flags: MslFlags::new(),
            rsl_flags: RslFlags::new(),
            mol_flags: MolFlags::new(),
            balancing_control: BalancingControl::new(),
        }
    }
}

impl Default for TxTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an encoder needs to produce one frame.
pub struct TxContext<'a> {
    /// The block store.
    pub db: &'a Database,
    /// Connection status of the strings.
    pub status: &'a dyn StringStatus,
    /// The transmit task's local block copies.
    pub tables: &'a mut TxTables,
}

/// The periodic transmit dispatcher.
pub struct TxDispatcher {
    messages: [TxMessage; NR_OF_TX_MESSAGES],
    tables: TxTables,
}

impl TxDispatcher {
    /// Creates the dispatcher with the full message registry.
    pub const fn new() -> Self {
        Self {
            messages: [
                TxMessage::new(
                    properties(0x220, Endianness::Big),
                    timing(100, 0),
                    TxEncoder::BmsState,
                ),
                TxMessage::new(
                    properties(0x226, Endianness::Big),
                    timing(1000, 100),
                    TxEncoder::BmsStateDetails,
                ),
                TxMessage::new(
                    properties(0x240, Endianness::Big),
                    timing(100, 10),
                    TxEncoder::CellVoltages,
                ),
                TxMessage::new(
                    properties(0x250, Endianness::Big),
                    timing(200, 20),
                    TxEncoder::CellTemperatures,
                ),
                TxMessage::new(
                    properties(0x224, Endianness::Big),
                    timing(100, 30),
                    TxEncoder::LimitValues,
                ),
                TxMessage::new(
                    properties(0x223, Endianness::Big),
                    timing(100, 40),
                    TxEncoder::MinMaxValues,
                ),
                TxMessage::new(
                    properties(0x225, Endianness::Big),
                    timing(1000, 50),
                    TxEncoder::PackStateEstimation,
                ),
                TxMessage::new(
                    properties(0x222, Endianness::Big),
                    timing(100, 60),
                    TxEncoder::PackValues,
                ),
                TxMessage::new(
                    properties(0x221, Endianness::Big),
                    timing(100, 70),
                    TxEncoder::StringState,
                ),
                TxMessage::new(
                    properties(0x281, Endianness::Big),
                    timing(100, 90),
                    TxEncoder::StringMinMaxValues,
                ),
                TxMessage::new(
                    properties(0x282, Endianness::Big),
                    timing(1000, 0),
                    TxEncoder::StringStateEstimation,
                ),
                TxMessage::new(
                    properties(0x280, Endianness::Big),
                    timing(100, 80),
                    TxEncoder::StringValuesP0,
                ),
                TxMessage::new(
                    properties(0x283, Endianness::Big),
                    timing(100, 10),
                    TxEncoder::StringValuesP1,
                ),
            ],
            tables: TxTables::new(),
        }
    }

    /// Fires every message due at `now` and hands the frames to the
    /// peripheral. Returns the number of frames transmitted.
    pub fn tick<C: CanInterface>(
        &mut self,
        now: Instant,
        db: &Database,
        status: &dyn StringStatus,
        can: &mut C,
    ) -> usize {
        let Self { messages, tables } = self;
        let now_ms = now.ticks();
        let mut transmitted = 0;
        for message in messages.iter_mut() {
            let period = message.timing.period.ticks();
            let phase = message.timing.phase.ticks();
            if now_ms < phase || (now_ms - phase) % period != 0 {
                continue;
            }
            let mut context = TxContext {
                db,
                status,
                tables: &mut *tables,
            };
            let data = message
                .encoder
                .encode(&message.properties, &mut message.mux, &mut context);
            match can.transmit(message.properties.id, &data) {
                Ok(()) => transmitted += 1,
                Err(_) => {
                    // dropped; the next period re-attempts
                    #[cfg(feature = "defmt")]
                    defmt::debug!("can tx: frame dropped");
                }
            }
        }
        transmitted
    }
}

impl Default for TxDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::can::testutil::FakeStatus;
    use embedded_can::Id;

    extern crate std;

    struct RecordingCan {
        sent: std::vec::Vec<(Id, [u8; 8])>,
        busy: bool,
    }

    impl RecordingCan {
        fn new() -> Self {
            Self {
                sent: std::vec::Vec::new(),
                busy: false,
            }
        }
    }

    impl CanInterface for RecordingCan {
        type Error = ();

        fn transmit(&mut self, id: Id, data: &[u8; 8]) -> nb::Result<(), ()> {
            if self.busy {
                return Err(nb::Error::WouldBlock);
            }
            self.sent.push((id, *data));
            Ok(())
        }
    }

    fn raw_standard(id: Id) -> u16 {
        match id {
            Id::Standard(id) => id.as_raw(),
            Id::Extended(_) => panic!("all registry ids are standard"),
        }
    }

    #[test]
    fn fires_only_messages_matching_period_and_phase() {
        let db = Database::new();
        let mut dispatcher = TxDispatcher::new();
        let mut can = RecordingCan::new();

        dispatcher.tick(Instant::from_ticks(0), &db, &FakeStatus::all_open(), &mut can);
        let at_zero: std::vec::Vec<u16> = can.sent.iter().map(|(id, _)| raw_standard(*id)).collect();
        // phase 0: the state message and the string state estimation
        assert_eq!(at_zero, [0x220, 0x282]);

        can.sent.clear();
        dispatcher.tick(Instant::from_ticks(10), &db, &FakeStatus::all_open(), &mut can);
        let at_ten: std::vec::Vec<u16> = can.sent.iter().map(|(id, _)| raw_standard(*id)).collect();
        // phase 10: cell voltages and string values part 1
        assert_eq!(at_ten, [0x240, 0x283]);

        can.sent.clear();
        dispatcher.tick(Instant::from_ticks(15), &db, &FakeStatus::all_open(), &mut can);
        assert!(can.sent.is_empty());
    }

    #[test]
    fn slow_messages_skip_intermediate_periods() {
        let db = Database::new();
        let mut dispatcher = TxDispatcher::new();
        let mut can = RecordingCan::new();

        // 0x226 has period 1000 ms, phase 100 ms
        dispatcher.tick(Instant::from_ticks(100), &db, &FakeStatus::all_open(), &mut can);
        assert!(can.sent.iter().any(|(id, _)| raw_standard(*id) == 0x226));

        can.sent.clear();
        dispatcher.tick(Instant::from_ticks(200), &db, &FakeStatus::all_open(), &mut can);
        assert!(!can.sent.iter().any(|(id, _)| raw_standard(*id) == 0x226));

        can.sent.clear();
        dispatcher.tick(Instant::from_ticks(1100), &db, &FakeStatus::all_open(), &mut can);
        assert!(can.sent.iter().any(|(id, _)| raw_standard(*id) == 0x226));
    }

    #[test]
    fn message_before_its_phase_stays_silent() {
        let db = Database::new();
        let mut dispatcher = TxDispatcher::new();
        let mut can = RecordingCan::new();

        // 0x250 (phase 20) must not fire at 0 or 10
        for tick in [0, 10] {
            dispatcher.tick(Instant::from_ticks(tick), &db, &FakeStatus::all_open(), &mut can);
        }
        assert!(!can.sent.iter().any(|(id, _)| raw_standard(*id) == 0x250));
        dispatcher.tick(Instant::from_ticks(20), &db, &FakeStatus::all_open(), &mut can);
        assert!(can.sent.iter().any(|(id, _)| raw_standard(*id) == 0x250));
    }

    #[test]
    fn busy_peripheral_drops_frames_without_rescheduling() {
        let db = Database::new();
        let mut dispatcher = TxDispatcher::new();
        let mut can = RecordingCan::new();
        can.busy = true;

        let transmitted = dispatcher.tick(Instant::from_ticks(0), &db, &FakeStatus::all_open(), &mut can);
        assert_eq!(transmitted, 0);
        assert!(can.sent.is_empty());

        // next period transmits normally again
        can.busy = false;
        let transmitted = dispatcher.tick(Instant::from_ticks(100), &db, &FakeStatus::all_open(), &mut can);
        assert!(transmitted > 0);
    }
}
