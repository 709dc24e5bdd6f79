//! Failure classification
//!
//! The core never unwinds out of the database, the signal packer or the
//! transmit scheduler; failures are classified here and reported through
//! return values or through the error-state database block. Precondition
//! violations (a zero-length signal, an out-of-range string index) are
//! programmer errors and assert at the violation site instead of being
//! represented as a value.

/// The closed set of runtime failure kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// The AFE reported an error during initialization or a running
    /// measurement. The acquisition state machine latches its error state
    /// and records the condition in the error-state block.
    Measurement,
    /// A maximum safety limit was violated. Recorded in the flag blocks and
    /// answered by opening all contactors.
    Limit,
    /// A best-effort operation did not go through (CAN transmit queue full,
    /// source block still zeroed). Not retried; the next period tries again.
    Transient,
    /// A consumer asked for measurement data before the first complete
    /// measurement cycle. Surfaced as a freshness flag, never fatal.
    FirstMeasurementPending,
}

/// One-shot transmission did not go through.
///
/// Carries no detail: the announcement frames are best effort and the caller
/// either ignores the miss or retries on its own schedule.
#[derive(Debug)]
pub struct TransmitError;
