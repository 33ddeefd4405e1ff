//! ATmega328P peripheral drivers.
//!
//! - [`Sampler`] — 10-bit successive-approximation ADC, one blocking conversion per call
//! - [`ToneGenerator`] — Timer1 clock gate plus OCR2A pitch, blocking note playback
//!
//! Register addresses below are data-space addresses (I/O address + 0x20 for
//! the low I/O range, as-is for extended I/O).

pub mod adc;
pub mod tone;

pub use adc::Sampler;
pub use tone::ToneGenerator;

// ADC registers
pub const ADCL: u16 = 0x78;
pub const ADCH: u16 = 0x79;
pub const ADCSRA: u16 = 0x7A;
pub const ADMUX: u16 = 0x7C;
pub const DIDR0: u16 = 0x7E;

// ADCSRA bits
pub const ADEN: u8 = 1 << 7;
pub const ADSC: u8 = 1 << 6;
pub const ADPS1: u8 = 1 << 1;

// ADMUX bits
/// AVcc reference with external capacitor at AREF
pub const REFS0: u8 = 1 << 6;
/// MUX3:0
pub const MUX_MASK: u8 = 0x0F;

// Timer registers
pub const TCCR1B: u16 = 0x81;
pub const OCR2A: u16 = 0xB3;

// TCCR1B bits
pub const CS10: u8 = 1 << 0;

/// Register names for the addresses the drivers touch, for logs and dumps.
pub const REG_NAMES: &[(u16, &str)] = &[
    (ADCL, "ADCL"),
    (ADCH, "ADCH"),
    (ADCSRA, "ADCSRA"),
    (ADMUX, "ADMUX"),
    (DIDR0, "DIDR0"),
    (TCCR1B, "TCCR1B"),
    (OCR2A, "OCR2A"),
];

/// Resolve a data-space address to its register name (if known).
pub fn reg_name(addr: u16) -> Option<&'static str> {
    REG_NAMES.iter().find(|(a, _)| *a == addr).map(|(_, n)| *n)
}
