//! Transmit encoders, one per periodic message
//!
//! Every encoder receives a zeroed frame and must fully populate it. An
//! encoder reads the database (through the transmit task's local copies),
//! packs its signals with the [`helper`](crate::can::helper) functions and
//! returns the wire image. Encoders never block and never fail: when the
//! source block was never written they encode the zeroed copy.

mod bms_state;
mod cell_temperatures;
mod cell_voltages;
mod limit_values;
mod minmax_values;
mod pack_values;
mod state_estimation;

use super::tx::TxContext;
use super::MessageProperties;

/// The closed set of periodic transmit encoders.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxEncoder {
    /// Pack state, connected strings and error summary (0x220)
    BmsState,
    /// Safety flag details (0x226)
    BmsStateDetails,
    /// Rotating cell voltage frames (0x240)
    CellVoltages,
    /// Rotating cell temperature frames (0x250)
    CellTemperatures,
    /// Recommended operating limits (0x224)
    LimitValues,
    /// Pack level extremes (0x223)
    MinMaxValues,
    /// Pack level state estimation (0x225)
    PackStateEstimation,
    /// Pack level electrical values (0x222)
    PackValues,
    /// Rotating per-string state frames (0x221)
    StringState,
    /// Rotating per-string extremes (0x281)
    StringMinMaxValues,
    /// Rotating per-string state estimation (0x282)
    StringStateEstimation,
    /// Rotating per-string electrical values (0x280)
    StringValuesP0,
    /// Rotating per-string energy counters (0x283)
    StringValuesP1,
}

impl TxEncoder {
    /// Produces one frame. `mux` is the per-message multiplexer counter;
    /// single-frame encoders leave it untouched.
    pub(crate) fn encode(
        self,
        properties: &MessageProperties,
        mux: &mut u8,
        context: &mut TxContext,
    ) -> [u8; 8] {
        match self {
            Self::BmsState => bms_state::bms_state(properties, context),
            Self::BmsStateDetails => bms_state::bms_state_details(properties, context),
            Self::CellVoltages => cell_voltages::cell_voltages(properties, mux, context),
            Self::CellTemperatures => {
                cell_temperatures::cell_temperatures(properties, mux, context)
            }
            Self::LimitValues => limit_values::limit_values(properties, context),
            Self::MinMaxValues => minmax_values::minimum_maximum_values(properties, context),
            Self::PackStateEstimation => {
                state_estimation::pack_state_estimation(properties, context)
            }
            Self::PackValues => pack_values::pack_values(properties, context),
            Self::StringState => bms_state::string_state(properties, mux, context),
            Self::StringMinMaxValues => {
                minmax_values::string_minimum_maximum_values(properties, mux, context)
            }
            Self::StringStateEstimation => {
                state_estimation::string_state_estimation(properties, mux, context)
            }
            Self::StringValuesP0 => pack_values::string_values_p0(properties, mux, context),
            Self::StringValuesP1 => pack_values::string_values_p1(properties, mux, context),
        }
    }
}
