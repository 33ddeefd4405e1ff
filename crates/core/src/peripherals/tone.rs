//! Timer-gated square-wave tone generator.
//!
//! The timer runs in CTC toggle mode (configured by board setup, not here),
//! so the output pin flips every time the counter matches the compare
//! register. This driver only:
//!
//! - gates the clock: CS10 in TCCR1B connects or disconnects clk/1
//! - sets the pitch: OCR2A, larger values give lower notes
//! - times the note with a caller-supplied [`DelayMs`]
//!
//! ## Gate hazard
//!
//! [`ToneGenerator::enable_oscillator`] ORs CS10 in and is idempotent.
//! [`ToneGenerator::mute_oscillator`] XORs CS10 and is a toggle: muting a
//! muted oscillator turns it back on. [`ToneGenerator::play_note`] and
//! [`ToneGenerator::beep`] only leave the gate off if it was off before the
//! call. Check [`ToneGenerator::gate`] when the starting state is unknown.

use embedded_hal::blocking::delay::DelayMs;
use log::debug;

use super::{CS10, OCR2A, TCCR1B};
use crate::registers::RegisterBus;

/// Note played by [`ToneGenerator::beep`]
pub const BEEP_NOTE: Note = Note::new(200, 32, 100);
/// Number of notes in a beep
pub const BEEP_REPEATS: usize = 3;

/// Oscillator gate state, i.e. CS10 of TCCR1B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum Gate {
    Disabled,
    Enabled,
}

impl Gate {
    pub fn from_tccr1b(value: u8) -> Self {
        if value & CS10 != 0 { Gate::Enabled } else { Gate::Disabled }
    }
}

/// One note: sound for `duration_ms`, then silence for `pause_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub duration_ms: u16,
    /// Compare value written to OCR2A
    pub pitch: u8,
    pub pause_ms: u16,
}

impl Note {
    pub const fn new(duration_ms: u16, pitch: u8, pause_ms: u16) -> Self {
        Note { duration_ms, pitch, pause_ms }
    }

    /// Blocking time of the note including its pause.
    pub const fn total_ms(&self) -> u32 {
        self.duration_ms as u32 + self.pause_ms as u32
    }
}

pub struct ToneGenerator<B, D> {
    bus: B,
    delay: D,
}

impl<B, D> ToneGenerator<B, D>
where
    B: RegisterBus,
    D: DelayMs<u16>,
{
    pub fn new(bus: B, delay: D) -> Self {
        ToneGenerator { bus, delay }
    }

    /// Give the bus and delay back.
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    /// Connect the timer clock. `TCCR1B |= CS10`
    pub fn enable_oscillator(&mut self) {
        self.bus.set_bits(TCCR1B, CS10);
    }

    /// Flip the timer clock gate. `TCCR1B ^= CS10`
    ///
    /// Only mutes when the oscillator is running; see the module docs.
    pub fn mute_oscillator(&mut self) {
        self.bus.toggle_bits(TCCR1B, CS10);
    }

    /// Current gate state as read back from TCCR1B.
    pub fn gate(&mut self) -> Gate {
        Gate::from_tccr1b(self.bus.read(TCCR1B))
    }

    /// Enable, set pitch, hold for `duration` ms, mute, wait `pause` ms.
    pub fn play_note(&mut self, duration: u16, pitch: u8, pause: u16) {
        debug!("note pitch={} duration={}ms pause={}ms", pitch, duration, pause);
        self.enable_oscillator();
        self.bus.write(OCR2A, pitch);
        self.delay.delay_ms(duration);
        self.mute_oscillator();
        self.delay.delay_ms(pause);
    }

    pub fn play(&mut self, note: &Note) {
        self.play_note(note.duration_ms, note.pitch, note.pause_ms);
    }

    /// Three-beep alert: [`BEEP_NOTE`] [`BEEP_REPEATS`] times, 900 ms total.
    pub fn beep(&mut self) {
        for _ in 0..BEEP_REPEATS {
            self.play(&BEEP_NOTE);
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::sim::{GateSpan, Simulator};

    fn generator(sim: &Simulator) -> ToneGenerator<crate::sim::SimBus, crate::sim::SimDelay> {
        ToneGenerator::new(sim.bus(), sim.delay())
    }

    #[test]
    fn test_enable_twice_stays_enabled() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.enable_oscillator();
        tone.enable_oscillator();
        assert_eq!(tone.gate(), Gate::Enabled);
        assert_eq!(sim.gate_trace().len(), 1);
    }

    #[test]
    fn test_mute_toggles_from_disabled() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.mute_oscillator();
        assert_eq!(tone.gate(), Gate::Enabled);
        tone.mute_oscillator();
        assert_eq!(tone.gate(), Gate::Disabled);
    }

    #[test]
    fn test_double_mute_from_enabled_passes_through_disabled() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.enable_oscillator();
        tone.mute_oscillator();
        tone.mute_oscillator();
        assert_eq!(tone.gate(), Gate::Enabled);
        let gates: Vec<Gate> = sim.gate_trace().iter().map(|e| e.gate).collect();
        assert_eq!(gates, vec![Gate::Enabled, Gate::Disabled, Gate::Enabled]);
    }

    #[test]
    fn test_gate_leaves_other_tccr1b_bits_alone() {
        let sim = Simulator::new();
        // WGM12 | CS11: CTC at clk/8 already configured
        sim.poke(TCCR1B, 0x0A);
        let mut tone = generator(&sim);
        tone.enable_oscillator();
        assert_eq!(sim.reg(TCCR1B), 0x0B);
        tone.mute_oscillator();
        assert_eq!(sim.reg(TCCR1B), 0x0A);
    }

    #[test]
    fn test_play_note_timing() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.play_note(200, 32, 100);

        assert_eq!(sim.gate_spans(), vec![
            GateSpan { gate: Gate::Enabled, start_ms: 0, end_ms: 200 },
            GateSpan { gate: Gate::Disabled, start_ms: 200, end_ms: 300 },
        ]);
        assert_eq!(sim.now_ms(), 300);
        assert_eq!(sim.reg(OCR2A), 32);
        assert_eq!(tone.gate(), Gate::Disabled);
    }

    #[test]
    fn test_pitch_written_inside_enabled_window() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.play_note(200, 32, 100);

        let writes = sim.writes();
        let addrs: Vec<u16> = writes.iter().map(|w| w.addr).collect();
        assert_eq!(addrs, vec![TCCR1B, OCR2A, TCCR1B]);
        let pitch = &writes[1];
        assert_eq!(pitch.value, 32);
        assert_eq!(pitch.at_ms, 0);
        assert_eq!(Gate::from_tccr1b(writes[0].value), Gate::Enabled);
    }

    #[test]
    fn test_beep_plays_three_notes() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.beep();

        assert_eq!(sim.now_ms(), 900);
        assert_eq!(sim.writes_to(OCR2A), vec![32, 32, 32]);
        assert_eq!(sim.delays(), vec![200, 100, 200, 100, 200, 100]);

        let spans = sim.gate_spans();
        assert_eq!(spans.len(), 6);
        for (i, span) in spans.iter().enumerate() {
            let base = (i as u64 / 2) * 300;
            if i % 2 == 0 {
                assert_eq!(*span, GateSpan { gate: Gate::Enabled, start_ms: base, end_ms: base + 200 });
            } else {
                assert_eq!(*span, GateSpan { gate: Gate::Disabled, start_ms: base + 200, end_ms: base + 300 });
            }
        }
        assert_eq!(tone.gate(), Gate::Disabled);
    }

    #[test]
    fn test_play_note_from_enabled_still_mutes() {
        let sim = Simulator::new();
        let mut tone = generator(&sim);
        tone.enable_oscillator();
        tone.play_note(50, 10, 50);
        // enable is a no-op, mute flips to Disabled
        assert_eq!(tone.gate(), Gate::Disabled);
        tone.mute_oscillator();
        tone.play_note(50, 10, 50);
        assert_eq!(tone.gate(), Gate::Disabled);
    }

    #[test]
    fn test_beep_total_time() {
        assert_eq!(BEEP_NOTE.total_ms() * BEEP_REPEATS as u32, 900);
    }
}
