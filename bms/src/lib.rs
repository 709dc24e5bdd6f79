#![no_std]
#![warn(missing_docs)]
//! # BMS
//!
//! ## Overview
//! This crate provides the platform-agnostic core of a battery management
//! system for multi-string lithium packs.
//!
//! It provides the following features:
//!
//! - a central [`database`] of typed measurement blocks with per-block
//!   serialized access and writer-maintained timestamps
//! - an acquisition state machine ([`measurement`]) that sequences the
//!   analog front end and latches the completion of the first full
//!   measurement cycle
//! - per-string extreme value aggregation ([`aggregation`])
//! - a pack connection state machine ([`control`]) with precharge
//!   sequencing and safety-limit supervision
//! - a table-driven periodic CAN transmit engine ([`can`]) with bit-exact
//!   DBC signal packing and multiplexed rotation over cells, sensors and
//!   strings
//! - on-demand announcement and diagnostic frames
//!
//! The core runs on top of an RTOS with fixed priority tasks; the canonical
//! split is an acquisition task triggering [`measurement`], a logic task
//! triggering [`control`] and [`aggregation`], and a CAN task ticking the
//! transmit dispatcher. All hardware access goes through the collaborator
//! traits of [`bms_core`]; platform HALs implement them, the core never
//! touches a register itself.
//!
//! No heap allocation takes place anywhere in this crate: blocks, local
//! table copies and frames live in static storage or on the caller's
//! stack.
//!
//! ## Usage example
//!
//! ```no_run
//! # struct Afe;
//! # impl bms_core::AfeTransport for Afe {
//! #     type Error = ();
//! #     fn initialize(&mut self) -> Result<(), ()> { Ok(()) }
//! #     fn read_voltages(&mut self, v: &mut [i16]) -> Result<(), ()> { Ok(()) }
//! #     fn read_temperatures(&mut self, t: &mut [i16]) -> Result<(), ()> { Ok(()) }
//! # }
//! # struct Can;
//! # impl bms_core::CanInterface for Can {
//! #     type Error = ();
//! #     fn transmit(
//! #         &mut self,
//! #         _id: embedded_can::Id,
//! #         _data: &[u8; 8],
//! #     ) -> nb::Result<(), ()> { Ok(()) }
//! # }
//! # struct Contactors;
//! # impl bms_core::ContactorControl for Contactors {
//! #     fn close_precharge(&mut self, _s: usize) {}
//! #     fn open_precharge(&mut self, _s: usize) {}
//! #     fn close_main(&mut self, _s: usize) {}
//! #     fn open_main(&mut self, _s: usize) {}
//! #     fn is_main_closed(&self, _s: usize) -> bool { false }
//! # }
//! # fn now() -> bms_core::Instant { bms_core::Instant::from_ticks(0) }
//! use bms::aggregation;
//! use bms::can::tx::TxDispatcher;
//! use bms::control::PackController;
//! use bms::database::Database;
//! use bms::measurement::Measurement;
//!
//! static DATABASE: Database = Database::new();
//!
//! let mut measurement = Measurement::new(Afe);
//! let mut controller = PackController::new();
//! let mut dispatcher = TxDispatcher::new();
//! let mut can = Can;
//! let mut contactors = Contactors;
//!
//! measurement.initialize();
//!
//! // acquisition task, 1 ms period
//! measurement.trigger(now(), &DATABASE);
//!
//! // logic task, 10 ms period
//! aggregation::update_min_max(now(), &DATABASE);
//! controller.trigger(
//!     now(),
//!     &DATABASE,
//!     &mut contactors,
//!     measurement.is_first_measurement_finished(),
//! );
//!
//! // CAN task, 10 ms period
//! dispatcher.tick(now(), &DATABASE, &controller, &mut can);
//! ```

pub mod aggregation;
pub mod blocks;
pub mod can;
pub mod config;
pub mod control;
pub mod database;
pub mod error;
pub mod measurement;
pub mod version;

pub use bms_core as core;
pub use embedded_can;
