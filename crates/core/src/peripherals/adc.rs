//! Analog-to-digital converter driver.
//!
//! Every call runs one single-ended conversion against the AVcc reference and
//! busy-waits for it:
//!
//! 1. DIDR0 ← 0xFF (digital input buffers off on every ADC pin)
//! 2. ADMUX ← REFS0 | channel[3:0]
//! 3. ADCSRA ← ADEN | ADSC | ADPS1 (enable, start, clk/4)
//! 4. poll ADCSRA until the hardware clears ADSC
//! 5. read ADCL, then ADCH
//!
//! [`Sampler::sample`] polls forever, like the hardware contract assumes.
//! [`Sampler::try_sample`] and [`Sampler::try_sample_until`] stop after
//! [`AdcConfig::poll_limit`] status reads or when the caller cancels.

use core::fmt;

use log::{debug, warn};

use super::{ADCH, ADCL, ADCSRA, ADEN, ADMUX, ADPS1, ADSC, DIDR0, MUX_MASK, REFS0};
use crate::registers::RegisterBus;

/// Written to DIDR0 before every conversion
pub const DIDR0_ALL: u8 = 0xFF;
/// ADCSRA value that enables the ADC and starts a conversion at clk/4
pub const ADCSRA_START: u8 = ADEN | ADSC | ADPS1;
/// ADC data register is 10 bits wide
pub const RESULT_MASK: u16 = 0x03FF;
/// Full-scale reading (input at the reference voltage)
pub const RESULT_MAX: u16 = RESULT_MASK;

/// ADC input pin on the ATmega328P (MUX3:0 = 0000..0111).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    A0 = 0,
    A1 = 1,
    A2 = 2,
    A3 = 3,
    A4 = 4,
    A5 = 5,
    A6 = 6,
    A7 = 7,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::A0, Channel::A1, Channel::A2, Channel::A3,
        Channel::A4, Channel::A5, Channel::A6, Channel::A7,
    ];

    /// Validated channel; `None` for anything above 7.
    pub fn new(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl From<Channel> for u8 {
    fn from(ch: Channel) -> u8 {
        ch as u8
    }
}

/// ADMUX value for `channel`. Bits above MUX3 of `channel` are dropped so
/// they cannot reach REFS1:0 or ADLAR.
#[inline]
pub fn mux_value(channel: u8) -> u8 {
    REFS0 | (channel & MUX_MASK)
}

/// Sampler configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcConfig {
    /// Maximum ADCSRA status reads per conversion on the bounded path.
    /// `None` polls until the hardware completes.
    pub poll_limit: Option<u32>,
}

impl AdcConfig {
    pub const fn unbounded() -> Self {
        AdcConfig { poll_limit: None }
    }

    pub const fn bounded(polls: u32) -> Self {
        AdcConfig { poll_limit: Some(polls) }
    }
}

/// Failure on the bounded sampling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// ADSC still set after `polls` status reads
    ConversionTimeout { polls: u32 },
    /// Caller cancelled after `polls` status reads
    Cancelled { polls: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConversionTimeout { polls } => {
                write!(f, "ADC conversion did not complete after {} polls", polls)
            }
            Error::Cancelled { polls } => {
                write!(f, "ADC conversion cancelled after {} polls", polls)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Blocking single-conversion ADC driver.
///
/// Holds the register bus exclusively for its lifetime, so two conversions
/// can't interleave from the same context. Callers sharing the ADC across
/// contexts must serialise around the whole call.
pub struct Sampler<B> {
    bus: B,
    config: AdcConfig,
}

impl<B: RegisterBus> Sampler<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, AdcConfig::default())
    }

    pub fn with_config(bus: B, config: AdcConfig) -> Self {
        Sampler { bus, config }
    }

    pub fn config(&self) -> AdcConfig {
        self.config
    }

    pub fn set_config(&mut self, config: AdcConfig) {
        self.config = config;
    }

    /// Give the bus back.
    pub fn release(self) -> B {
        self.bus
    }

    /// Sample `channel` and return the 10-bit result.
    ///
    /// Channels 8..=15 select whatever the mux maps there (internal
    /// references, temperature sensor, GND); validate with [`Channel::new`]
    /// first if that matters. Never returns if the conversion never
    /// completes.
    pub fn sample(&mut self, channel: impl Into<u8>) -> u16 {
        let channel = channel.into();
        self.start(channel);

        let mut polls: u32 = 0;
        while self.busy() {
            polls = polls.wrapping_add(1);
        }

        let value = self.read_result();
        debug!("ADC ch={} value={} busy_polls={}", channel & MUX_MASK, value, polls);
        value
    }

    /// Like [`sample`](Self::sample), but gives up after the configured poll
    /// limit. Unbounded configs behave exactly like `sample`.
    pub fn try_sample(&mut self, channel: impl Into<u8>) -> Result<u16, Error> {
        self.try_sample_until(channel, || false)
    }

    /// Bounded sample that also checks `cancel` after every busy poll.
    ///
    /// On timeout or cancel the conversion keeps running in hardware. The
    /// ADC ignores a new start while ADSC is set, so the next call waits for
    /// that conversion and may return its result.
    pub fn try_sample_until<F>(&mut self, channel: impl Into<u8>, mut cancel: F) -> Result<u16, Error>
    where
        F: FnMut() -> bool,
    {
        let channel = channel.into();
        self.start(channel);

        let mut polls: u32 = 0;
        loop {
            if let Some(limit) = self.config.poll_limit {
                if polls >= limit {
                    warn!("ADC ch={} timed out after {} polls", channel & MUX_MASK, polls);
                    return Err(Error::ConversionTimeout { polls });
                }
            }
            polls = polls.saturating_add(1);
            if !self.busy() {
                break;
            }
            if cancel() {
                warn!("ADC ch={} cancelled after {} polls", channel & MUX_MASK, polls);
                return Err(Error::Cancelled { polls });
            }
        }

        let value = self.read_result();
        debug!("ADC ch={} value={} polls={}", channel & MUX_MASK, value, polls);
        Ok(value)
    }

    fn start(&mut self, channel: u8) {
        self.bus.write(DIDR0, DIDR0_ALL);
        self.bus.write(ADMUX, mux_value(channel));
        self.bus.write(ADCSRA, ADCSRA_START);
    }

    #[inline]
    fn busy(&mut self) -> bool {
        self.bus.read(ADCSRA) & ADSC != 0
    }

    fn read_result(&mut self) -> u16 {
        // ADCL first: reading it locks the data register until ADCH is read
        let lo = self.bus.read(ADCL) as u16;
        let hi = self.bus.read(ADCH) as u16;
        ((hi << 8) | lo) & RESULT_MASK
    }
}
