#![no_std]
#![warn(missing_docs)]

//! `bms-core` provides a set of essential abstractions that serves as a thin
//! integration layer between the platform independent [`bms`] crate and
//! platform specific HAL crates (in documentation also referred to as _target
//! HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs
//! (or by the test suite, where fakes stand in for the hardware).
//!
//! Integrators of this crate into any given target HAL are responsible for
//! conforming to the respective trait contracts: the measurement and pack
//! control state machines assume that the collaborators behave as documented
//! here.
//!
//! Critical sections are intentionally *not* abstracted by this crate; the
//! [`critical-section`] crate is the ecosystem-wide integration point and the
//! target HAL provides its implementation.
//!
//! [`bms`]: <https://docs.rs/crate/bms/>
//! [`critical-section`]: <https://docs.rs/crate/critical-section/>

pub use fugit;

use embedded_can::Id;

/// Point in time on the millisecond system tick.
pub type Instant = fugit::TimerInstantU32<1000>;

/// Span of time on the millisecond system tick.
pub type Duration = fugit::TimerDurationU32<1000>;

/// Trait representing the monotonic system tick
///
/// The returned instants must never decrease. All timestamps in the
/// measurement database and all transmit scheduling decisions are derived
/// from this clock, so a tick period of one millisecond is assumed
/// throughout.
///
/// # Examples
/// ```
/// use bms_core::{Instant, Monotonic};
///
/// struct SysTick(u32);
///
/// impl Monotonic for SysTick {
///     fn now(&self) -> Instant {
///         Instant::from_ticks(self.0)
///     }
/// }
/// ```
pub trait Monotonic {
    /// Current system time. Never decreases.
    fn now(&self) -> Instant;
}

/// Trait representing the analog front end transport
///
/// The AFE is the chip set that measures cell voltages and temperatures. Its
/// wire protocol (SPI daisy chain, isoSPI transceivers, ...) is owned by the
/// target HAL; the core only sequences measurements and consumes the results.
///
/// Implementations may block on their own task while talking to the hardware.
/// The buffer layout is string major: all values of string 0 first, then
/// string 1, and so on. Voltages are reported in millivolts, temperatures in
/// tenths of a degree Celsius.
pub trait AfeTransport {
    /// Error reported by the transport. An error during initialization or a
    /// running measurement latches the acquisition state machine in its error
    /// state until recovery is requested.
    type Error;

    /// Brings the measurement chain into an operational state.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Reads one complete set of cell voltages into `voltages`.
    ///
    /// The slice holds one entry per cell block, string major. A transport
    /// may leave entries untouched and flag them through its own validity
    /// reporting; entries it does write must be in millivolts.
    fn read_voltages(&mut self, voltages: &mut [i16]) -> Result<(), Self::Error>;

    /// Reads one complete set of cell temperatures into `temperatures`,
    /// string major, in tenths of a degree Celsius.
    fn read_temperatures(&mut self, temperatures: &mut [i16]) -> Result<(), Self::Error>;
}

/// Trait representing the CAN peripheral
///
/// Transmission is best effort and must not block: when no transmit slot is
/// free the implementation returns [`nb::Error::WouldBlock`] and the caller
/// drops the frame (periodic frames are simply re-attempted at their next
/// period).
pub trait CanInterface {
    /// Error reported by the peripheral for conditions other than a full
    /// transmit queue (bus off, invalid configuration, ...).
    type Error;

    /// Hands one classic CAN frame with a fixed 8-byte payload to the
    /// peripheral.
    fn transmit(&mut self, id: Id, data: &[u8; 8]) -> nb::Result<(), Self::Error>;
}

/// Trait representing the contactor driver
///
/// Each string connects to the DC link through a main contactor and, for the
/// inrush current limit, a precharge path. The driver owns the physical
/// outputs (smart power switches, feedback inputs); the pack control state
/// machine only decides *when* paths open and close.
///
/// All operations apply immediately; the feedback query reflects the last
/// commanded state or, where the hardware provides it, the measured state.
pub trait ContactorControl {
    /// Closes the precharge path of string `string`.
    fn close_precharge(&mut self, string: usize);

    /// Opens the precharge path of string `string`.
    fn open_precharge(&mut self, string: usize);

    /// Closes the main contactor of string `string`.
    fn close_main(&mut self, string: usize);

    /// Opens the main contactor of string `string`.
    fn open_main(&mut self, string: usize);

    /// Reports whether the main contactor of string `string` is closed.
    fn is_main_closed(&self, string: usize) -> bool;
}

/// Trait representing the immutable MCU identification registers
///
/// The values are read once at boot for the announcement frames; they never
/// change while the firmware runs.
pub trait DeviceIdentity {
    /// Device identification word of the MCU.
    fn device_id(&self) -> u32;

    /// Die identifier, high word in the upper 32 bits.
    fn die_id(&self) -> u64;
}
