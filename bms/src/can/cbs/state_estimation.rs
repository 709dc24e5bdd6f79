//! Pack and per-string state estimation frames
//!
//! The pack level frame aggregates the per-string state of charge and
//! energy over the connected strings. While the system charges, the
//! optimistic per-string maxima apply; otherwise the pessimistic minima.
//! The published pack percentage is scaled by the share of connected
//! strings, so a partly connected pack reports proportionally less.

use crate::can::helper::{
    prepare_signal_data, set_can_data_with_message_data, set_message_data_with_signal_data,
};
use crate::can::tx::TxContext;
use crate::can::{MessageProperties, Signal};
use crate::config::NR_OF_STRINGS;
use crate::control::{current_flow_direction, CurrentFlow};

// Signal parameters: bit start, bit length, factor, offset, minimum, maximum
const PACK_SOC_001_PERC: Signal = Signal::new(7, 14, 100.0, 0.0, 0.0, 10000.0);
const PACK_SOE_001_PERC: Signal = Signal::new(9, 14, 100.0, 0.0, 0.0, 10000.0);
const PACK_ENERGY_10_WH: Signal = Signal::new(47, 24, 0.1, 0.0, 0.0, 16777215.0);
const PACK_SOH_0025_PERC: Signal = Signal::new(27, 12, 40.0, 0.0, 0.0, 4095.0);

const STRING_MULTIPLEXER: Signal = Signal::new(7, 4, 1.0, 0.0, 0.0, 15.0);
const STRING_MINIMUM_SOC_025_PERC: Signal = Signal::new(3, 9, 4.0, 0.0, 0.0, 400.0);
const STRING_AVERAGE_SOC_025_PERC: Signal = Signal::new(10, 9, 4.0, 0.0, 0.0, 400.0);
const STRING_MAXIMUM_SOC_025_PERC: Signal = Signal::new(17, 9, 4.0, 0.0, 0.0, 400.0);
const STRING_SOE_025_PERC: Signal = Signal::new(24, 9, 4.0, 0.0, 0.0, 400.0);
const STRING_SOH_025_PERC: Signal = Signal::new(47, 9, 4.0, 0.0, 0.0, 400.0);
const STRING_ENERGY_10_WH: Signal = Signal::new(54, 15, 0.1, 0.0, 0.0, 32767.0);

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

pub(crate) fn pack_state_estimation(
    properties: &MessageProperties,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    context.tables.sox = context.db.read();
    let sox = &context.tables.sox;
    let status = context.status;

    let charging = status.battery_system_state() == CurrentFlow::Charging;
    let mut aggregated_soc_perc = if charging { f32::MIN } else { f32::MAX };
    let mut aggregated_soe_perc = if charging { f32::MIN } else { f32::MAX };
    let mut minimum_energy_wh = u32::MAX;

    for s in 0..NR_OF_STRINGS {
        if !status.is_string_closed(s) {
            continue;
        }
        if charging {
            aggregated_soc_perc = aggregated_soc_perc.max(sox.maximum_soc_perc[s]);
            aggregated_soe_perc = aggregated_soe_perc.max(sox.maximum_soe_perc[s]);
        } else {
            aggregated_soc_perc = aggregated_soc_perc.min(sox.minimum_soc_perc[s]);
            aggregated_soe_perc = aggregated_soe_perc.min(sox.minimum_soe_perc[s]);
        }
        minimum_energy_wh = minimum_energy_wh.min(sox.minimum_soe_wh[s]);
    }

    let connected = u32::from(status.number_of_connected_strings());
    let (pack_soc_perc, pack_soe_perc, pack_energy_wh) = if connected != 0 {
        (
            (connected as f32 * aggregated_soc_perc) / NR_OF_STRINGS as f32,
            (connected as f32 * aggregated_soe_perc) / NR_OF_STRINGS as f32,
            connected * minimum_energy_wh,
        )
    } else {
        (0.0, 0.0, 0)
    };

    set_signal(&mut message, &PACK_SOC_001_PERC, pack_soc_perc, properties);
    set_signal(&mut message, &PACK_SOE_001_PERC, pack_soe_perc, properties);
    set_signal(
        &mut message,
        &PACK_ENERGY_10_WH,
        pack_energy_wh as f32,
        properties,
    );
    // TODO: replace the constant once a state-of-health estimation exists
    set_signal(&mut message, &PACK_SOH_0025_PERC, 100.0, properties);

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);
    data
}

pub(crate) fn string_state_estimation(
    properties: &MessageProperties,
    mux: &mut u8,
    context: &mut TxContext,
) -> [u8; 8] {
    let mut message = 0u64;

    // the estimate copy is refreshed by the pack level message, which runs
    // at the same period
    let sox = &context.tables.sox;
    let string = usize::from(*mux);

    set_message_data_with_signal_data(
        &mut message,
        STRING_MULTIPLEXER.bit_start,
        STRING_MULTIPLEXER.bit_length,
        string as u64,
        properties.endianness,
    );
    set_signal(
        &mut message,
        &STRING_MINIMUM_SOC_025_PERC,
        sox.minimum_soc_perc[string],
        properties,
    );
    set_signal(
        &mut message,
        &STRING_AVERAGE_SOC_025_PERC,
        sox.average_soc_perc[string],
        properties,
    );
    set_signal(
        &mut message,
        &STRING_MAXIMUM_SOC_025_PERC,
        sox.maximum_soc_perc[string],
        properties,
    );

    // the optimistic estimate applies while this string itself charges
    let string_current_ma = context.tables.pack_values.string_current_ma[string];
    let soe_perc = if current_flow_direction(string_current_ma) == CurrentFlow::Charging {
        sox.maximum_soe_perc[string]
    } else {
        sox.minimum_soe_perc[string]
    };
    set_signal(&mut message, &STRING_SOE_025_PERC, soe_perc, properties);

    // TODO: replace the constant once a state-of-health estimation exists
    set_signal(&mut message, &STRING_SOH_025_PERC, 100.0, properties);
    set_signal(
        &mut message,
        &STRING_ENERGY_10_WH,
        sox.minimum_soe_wh[string] as f32,
        properties,
    );

    let mut data = [0u8; 8];
    set_can_data_with_message_data(message, &mut data, properties.endianness);

    *mux += 1;
    if usize::from(*mux) >= NR_OF_STRINGS {
        *mux = 0;
    }

    data
}
