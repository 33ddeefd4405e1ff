//! Simulated register model.
//!
//! A [`Simulator`] owns a 256-byte I/O register file and a millisecond clock.
//! Drivers get handles to it: [`SimBus`] for register access and
//! [`SimDelay`] for blocking waits. The handles share the simulator state,
//! so tests can inspect it after (or while) a driver runs.
//!
//! Emulated behaviour:
//!
//! - **ADC**: writing ADCSRA with ADEN|ADSC starts the next queued
//!   [`Conversion`]. ADSC stays set for the configured number of ADCSRA
//!   reads, then clears and the 10-bit result is latched into ADCL/ADCH.
//!   ADCL/ADCH ignore writes.
//! - **Timer gate**: every change of CS10 in TCCR1B is recorded as a
//!   [`GateEvent`] stamped with the current simulated time.
//! - **Delay**: `delay_ms` advances the clock; nothing else happens "during"
//!   a delay.
//!
//! Every write is logged as a [`RegWrite`]. Reads are only traced via `log`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::peripherals::tone::Gate;
use crate::peripherals::{reg_name, ADCH, ADCL, ADCSRA, ADEN, ADSC, REG_NAMES, TCCR1B};
use crate::peripherals::adc::RESULT_MASK;
use crate::registers::RegisterBus;
use crate::savestate::SimSnapshot;
use crate::IO_SPACE_SIZE;

/// When a simulated conversion finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completion {
    /// ADSC reads back set this many times, then clears
    AfterPolls(u32),
    /// ADSC never clears
    Never,
}

/// A scripted conversion outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub value: u16,
    pub completion: Completion,
}

/// Conversion in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConversion {
    pub value: u16,
    /// Busy reads left; `None` never completes
    pub remaining: Option<u32>,
}

/// Logged register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegWrite {
    pub at_ms: u64,
    pub addr: u16,
    pub value: u8,
}

/// Gate transition at a point in simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvent {
    pub at_ms: u64,
    pub gate: Gate,
}

/// Interval during which the gate held one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSpan {
    pub gate: Gate,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl GateSpan {
    pub fn len_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

struct SimState {
    regs: Vec<u8>,
    now_ms: u64,
    /// Used when the conversion queue is empty
    default_conversion: Conversion,
    queue: VecDeque<Conversion>,
    active: Option<ActiveConversion>,
    /// ADCSRA reads since the last conversion started
    status_polls: u32,
    conversions: u32,
    /// Gate state and time at which the current logs start
    initial_gate: Gate,
    log_start_ms: u64,
    writes: Vec<RegWrite>,
    gate_trace: Vec<GateEvent>,
    delays: Vec<u32>,
}

impl SimState {
    fn new() -> Self {
        SimState {
            regs: vec![0u8; IO_SPACE_SIZE],
            now_ms: 0,
            default_conversion: Conversion { value: 0, completion: Completion::AfterPolls(0) },
            queue: VecDeque::new(),
            active: None,
            status_polls: 0,
            conversions: 0,
            initial_gate: Gate::Disabled,
            log_start_ms: 0,
            writes: Vec::new(),
            gate_trace: Vec::new(),
            delays: Vec::new(),
        }
    }

    fn store(&mut self, addr: u16, value: u8) {
        let a = addr as usize;
        if a >= self.regs.len() { return; }
        if addr == TCCR1B {
            let old = Gate::from_tccr1b(self.regs[a]);
            let new = Gate::from_tccr1b(value);
            if old != new {
                self.gate_trace.push(GateEvent { at_ms: self.now_ms, gate: new });
            }
        }
        self.regs[a] = value;
    }

    fn write(&mut self, addr: u16, value: u8) {
        match reg_name(addr) {
            Some(name) => trace!("[{:>6}ms] {} <- {:02X}", self.now_ms, name, value),
            None => trace!("[{:>6}ms] [{:04X}] <- {:02X}", self.now_ms, addr, value),
        }
        self.writes.push(RegWrite { at_ms: self.now_ms, addr, value });

        match addr {
            ADCL | ADCH => {}
            ADCSRA => {
                // ADSC is only cleared by hardware
                let busy = self.active.is_some();
                let mut v = value;
                if busy { v |= ADSC; }
                self.store(addr, v);
                if !busy && (value & (ADEN | ADSC)) == (ADEN | ADSC) {
                    self.start_conversion();
                }
            }
            _ => self.store(addr, value),
        }
    }

    fn start_conversion(&mut self) {
        let conv = self.queue.pop_front().unwrap_or(self.default_conversion);
        self.active = Some(ActiveConversion {
            value: conv.value,
            remaining: match conv.completion {
                Completion::AfterPolls(n) => Some(n),
                Completion::Never => None,
            },
        });
        self.status_polls = 0;
        self.conversions += 1;
    }

    fn read(&mut self, addr: u16) -> u8 {
        if addr == ADCSRA {
            self.poll_adc();
        }
        let value = self.regs.get(addr as usize).copied().unwrap_or(0);
        match reg_name(addr) {
            Some(name) => trace!("[{:>6}ms] {} -> {:02X}", self.now_ms, name, value),
            None => trace!("[{:>6}ms] [{:04X}] -> {:02X}", self.now_ms, addr, value),
        }
        value
    }

    fn poll_adc(&mut self) {
        let Some(mut active) = self.active else { return };
        self.status_polls = self.status_polls.saturating_add(1);
        match active.remaining {
            Some(0) => {
                let value = active.value & RESULT_MASK;
                self.regs[ADCL as usize] = (value & 0xFF) as u8;
                self.regs[ADCH as usize] = (value >> 8) as u8;
                self.regs[ADCSRA as usize] &= !ADSC;
                self.active = None;
            }
            Some(n) => {
                active.remaining = Some(n - 1);
                self.active = Some(active);
            }
            None => {}
        }
    }

    fn delay(&mut self, ms: u32) {
        self.delays.push(ms);
        self.now_ms += ms as u64;
    }
}

/// Simulated MCU register file and clock.
pub struct Simulator {
    state: Rc<RefCell<SimState>>,
}

impl Simulator {
    pub fn new() -> Self {
        Simulator { state: Rc::new(RefCell::new(SimState::new())) }
    }

    /// Register bus handle for a driver.
    pub fn bus(&self) -> SimBus {
        SimBus { state: Rc::clone(&self.state) }
    }

    /// Delay handle for a driver.
    pub fn delay(&self) -> SimDelay {
        SimDelay { state: Rc::clone(&self.state) }
    }

    /// Script the outcome of the next conversion not yet scripted.
    pub fn queue_conversion(&self, value: u16, completion: Completion) {
        self.state.borrow_mut().queue.push_back(Conversion { value, completion });
    }

    /// Outcome of conversions started with an empty queue.
    pub fn set_default_conversion(&self, value: u16, completion: Completion) {
        self.state.borrow_mut().default_conversion = Conversion { value, completion };
    }

    /// Register value without read side effects.
    pub fn reg(&self, addr: u16) -> u8 {
        self.state.borrow().regs.get(addr as usize).copied().unwrap_or(0)
    }

    /// Set a register without logging a write or starting a conversion.
    /// TCCR1B gate changes are still traced.
    pub fn poke(&self, addr: u16, value: u8) {
        let mut s = self.state.borrow_mut();
        if (addr as usize) >= s.regs.len() { return; }
        let untouched = s.writes.is_empty() && s.gate_trace.is_empty() && s.now_ms == s.log_start_ms;
        if addr == TCCR1B && untouched {
            s.initial_gate = Gate::from_tccr1b(value);
            s.regs[addr as usize] = value;
        } else {
            s.store(addr, value);
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ms
    }

    /// ADCSRA reads since the most recent conversion started.
    pub fn status_polls(&self) -> u32 {
        self.state.borrow().status_polls
    }

    /// Conversions started so far.
    pub fn conversions(&self) -> u32 {
        self.state.borrow().conversions
    }

    pub fn adc_busy(&self) -> bool {
        self.state.borrow().active.is_some()
    }

    pub fn writes(&self) -> Vec<RegWrite> {
        self.state.borrow().writes.clone()
    }

    /// Values written to `addr`, in order.
    pub fn writes_to(&self, addr: u16) -> Vec<u8> {
        self.state.borrow().writes.iter()
            .filter(|w| w.addr == addr)
            .map(|w| w.value)
            .collect()
    }

    pub fn gate_trace(&self) -> Vec<GateEvent> {
        self.state.borrow().gate_trace.clone()
    }

    pub fn gate(&self) -> Gate {
        Gate::from_tccr1b(self.reg(TCCR1B))
    }

    /// Gate history since the logs started, as non-empty intervals, the last one ending now.
    pub fn gate_spans(&self) -> Vec<GateSpan> {
        let s = self.state.borrow();
        let mut points = Vec::with_capacity(s.gate_trace.len() + 1);
        points.push(GateEvent { at_ms: s.log_start_ms, gate: s.initial_gate });
        points.extend(s.gate_trace.iter().copied());

        let mut spans = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let end_ms = points.get(i + 1).map(|n| n.at_ms).unwrap_or(s.now_ms);
            if end_ms > p.at_ms {
                spans.push(GateSpan { gate: p.gate, start_ms: p.at_ms, end_ms });
            }
        }
        spans
    }

    /// Total time the gate has spent `Enabled`.
    pub fn enabled_ms(&self) -> u64 {
        self.gate_spans().iter()
            .filter(|s| s.gate == Gate::Enabled)
            .map(GateSpan::len_ms)
            .sum()
    }

    /// Requested delays, in order.
    pub fn delays(&self) -> Vec<u32> {
        self.state.borrow().delays.clone()
    }

    /// Drop the write log, gate trace and delay log; registers and clock stay.
    pub fn clear_log(&self) {
        let mut s = self.state.borrow_mut();
        s.initial_gate = Gate::from_tccr1b(s.regs[TCCR1B as usize]);
        s.log_start_ms = s.now_ms;
        s.writes.clear();
        s.gate_trace.clear();
        s.delays.clear();
    }

    /// Driver registers as `NAME=XX` cells, four per line.
    pub fn dump_io(&self) -> String {
        let s = self.state.borrow();
        let mut out = String::new();
        let mut col = 0;
        for &(addr, name) in REG_NAMES {
            let val = s.regs.get(addr as usize).copied().unwrap_or(0);
            out.push_str(&format!("{:>6}={:02X}", name, val));
            col += 1;
            if col % 4 == 0 { out.push('\n'); } else { out.push_str("  "); }
        }
        if col % 4 != 0 { out.push('\n'); }
        out
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> SimSnapshot {
        let s = self.state.borrow();
        SimSnapshot {
            regs: s.regs.clone(),
            now_ms: s.now_ms,
            default_conversion: s.default_conversion,
            queue: s.queue.iter().copied().collect(),
            active: s.active,
            status_polls: s.status_polls,
            conversions: s.conversions,
            initial_gate: s.initial_gate,
            log_start_ms: s.log_start_ms,
            writes: s.writes.clone(),
            gate_trace: s.gate_trace.clone(),
            delays: s.delays.clone(),
        }
    }

    /// Restore state from save state. Existing handles see the restored state.
    pub fn load_state(&self, snap: &SimSnapshot) -> Result<(), String> {
        if snap.regs.len() != IO_SPACE_SIZE {
            return Err(format!("Register file size mismatch: snapshot={} expected={}",
                snap.regs.len(), IO_SPACE_SIZE));
        }
        let mut s = self.state.borrow_mut();
        s.regs.copy_from_slice(&snap.regs);
        s.now_ms = snap.now_ms;
        s.default_conversion = snap.default_conversion;
        s.queue = snap.queue.iter().copied().collect();
        s.active = snap.active;
        s.status_polls = snap.status_polls;
        s.conversions = snap.conversions;
        s.initial_gate = snap.initial_gate;
        s.log_start_ms = snap.log_start_ms;
        s.writes = snap.writes.clone();
        s.gate_trace = snap.gate_trace.clone();
        s.delays = snap.delays.clone();
        Ok(())
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Register bus backed by a [`Simulator`].
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

impl RegisterBus for SimBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.state.borrow_mut().read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.state.borrow_mut().write(addr, value)
    }
}

/// Delay that advances a [`Simulator`] clock instead of sleeping.
#[derive(Clone)]
pub struct SimDelay {
    state: Rc<RefCell<SimState>>,
}

impl DelayMs<u8> for SimDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.state.borrow_mut().delay(ms as u32)
    }
}

impl DelayMs<u16> for SimDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.state.borrow_mut().delay(ms as u32)
    }
}

impl DelayMs<u32> for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.state.borrow_mut().delay(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::{ADMUX, OCR2A};

    #[test]
    fn test_conversion_completes_after_polls() {
        let sim = Simulator::new();
        sim.queue_conversion(0x2AB, Completion::AfterPolls(2));
        let mut bus = sim.bus();
        bus.write(ADCSRA, 0xC2);
        assert!(sim.adc_busy());
        assert_ne!(bus.read(ADCSRA) & ADSC, 0);
        assert_ne!(bus.read(ADCSRA) & ADSC, 0);
        assert_eq!(bus.read(ADCSRA) & ADSC, 0);
        assert!(!sim.adc_busy());
        assert_eq!(bus.read(ADCL), 0xAB);
        assert_eq!(bus.read(ADCH), 0x02);
    }

    #[test]
    fn test_never_completes() {
        let sim = Simulator::new();
        sim.queue_conversion(1, Completion::Never);
        let mut bus = sim.bus();
        bus.write(ADCSRA, 0xC2);
        for _ in 0..10_000 {
            assert_ne!(bus.read(ADCSRA) & ADSC, 0);
        }
        assert_eq!(sim.status_polls(), 10_000);
    }

    #[test]
    fn test_start_without_aden_is_ignored() {
        let sim = Simulator::new();
        let mut bus = sim.bus();
        bus.write(ADCSRA, ADSC);
        assert!(!sim.adc_busy());
        assert_eq!(sim.conversions(), 0);
    }

    #[test]
    fn test_result_registers_are_read_only() {
        let sim = Simulator::new();
        let mut bus = sim.bus();
        bus.write(ADCL, 0x55);
        bus.write(ADCH, 0x03);
        assert_eq!(sim.reg(ADCL), 0);
        assert_eq!(sim.reg(ADCH), 0);
        assert_eq!(sim.writes().len(), 2);
    }

    #[test]
    fn test_default_conversion_used_when_queue_empty() {
        let sim = Simulator::new();
        sim.set_default_conversion(1023, Completion::AfterPolls(0));
        let mut bus = sim.bus();
        bus.write(ADCSRA, 0xC2);
        assert_eq!(bus.read(ADCSRA) & ADSC, 0);
        assert_eq!(sim.reg(ADCL), 0xFF);
        assert_eq!(sim.reg(ADCH), 0x03);
    }

    #[test]
    fn test_gate_trace_and_delay_clock() {
        let sim = Simulator::new();
        let mut bus = sim.bus();
        let mut delay = sim.delay();
        bus.write(TCCR1B, 0x01);
        delay.delay_ms(150u16);
        bus.write(TCCR1B, 0x00);
        delay.delay_ms(50u32);

        assert_eq!(sim.gate_trace(), vec![
            GateEvent { at_ms: 0, gate: Gate::Enabled },
            GateEvent { at_ms: 150, gate: Gate::Disabled },
        ]);
        assert_eq!(sim.enabled_ms(), 150);
        assert_eq!(sim.now_ms(), 200);
    }

    #[test]
    fn test_initial_poke_sets_starting_gate() {
        let sim = Simulator::new();
        sim.poke(TCCR1B, 0x01);
        sim.delay().delay_ms(10u16);
        assert!(sim.gate_trace().is_empty());
        assert_eq!(sim.gate_spans(), vec![
            GateSpan { gate: Gate::Enabled, start_ms: 0, end_ms: 10 },
        ]);
    }

    #[test]
    fn test_clear_log() {
        let sim = Simulator::new();
        let mut bus = sim.bus();
        bus.write(OCR2A, 9);
        bus.write(TCCR1B, 0x01);
        sim.clear_log();
        assert!(sim.writes().is_empty());
        assert_eq!(sim.reg(OCR2A), 9);
        assert_eq!(sim.gate(), Gate::Enabled);
        sim.delay().delay_ms(5u8);
        assert_eq!(sim.enabled_ms(), 5);
    }

    #[test]
    fn test_dump_io() {
        let sim = Simulator::new();
        sim.poke(ADMUX, 0x43);
        let dump = sim.dump_io();
        assert!(dump.contains("ADMUX=43"));
        assert!(dump.contains("OCR2A=00"));
    }
}
