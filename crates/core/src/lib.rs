//! # m328-core
//!
//! Register-level drivers for two ATmega328P peripherals: a blocking ADC
//! sampler and a Timer1-gated square-wave tone generator.
//!
//! Both drivers talk to hardware through the [`RegisterBus`] capability
//! instead of touching addresses directly, so the same code runs against the
//! real data space ([`Mmio`]) or the simulated register file in [`sim`].
//!
//! ## Architecture
//!
//! - [`Sampler`] — single blocking conversion, optional poll bound
//! - [`ToneGenerator`] — oscillator gate, `play_note`, three-beep alert
//! - [`RegisterBus`] — byte-wide register read/write capability
//! - [`peripherals`] — register addresses, bit masks, register names
//! - [`sim`] — simulated register model with ADC completion and gate trace
//! - [`savestate`] — compressed snapshots of simulator state
//!
//! ## Features
//!
//! `std` (default) enables [`sim`] and [`savestate`]. Without it the drivers
//! build `no_std` for the AVR target.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod peripherals;
pub mod registers;

#[cfg(feature = "std")]
pub mod sim;
#[cfg(feature = "std")]
pub mod savestate;

pub use peripherals::adc::{AdcConfig, Channel, Error as AdcError, Sampler};
pub use peripherals::tone::{Gate, Note, ToneGenerator};
pub use registers::{Mmio, RegisterBus};

/// Size of the simulated register file: registers + I/O + extended I/O (0x00..0xFF)
pub const IO_SPACE_SIZE: usize = 0x100;
