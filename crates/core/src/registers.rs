//! Register access capability.
//!
//! AVR I/O registers live in the unified data space, addressed by their
//! data-space address (not the `IN`/`OUT` I/O address). Drivers never touch
//! those addresses directly; they go through a [`RegisterBus`] they own.

/// Byte-wide read/write access to memory-mapped peripheral registers.
pub trait RegisterBus {
    /// Read the register at data-space address `addr`.
    fn read(&mut self, addr: u16) -> u8;

    /// Write `value` to the register at data-space address `addr`.
    fn write(&mut self, addr: u16, value: u8);

    /// Read-modify-write. Not atomic with respect to interrupts.
    #[inline]
    fn modify<F: FnOnce(u8) -> u8>(&mut self, addr: u16, f: F) {
        let old = self.read(addr);
        self.write(addr, f(old));
    }

    /// `reg |= mask`
    #[inline]
    fn set_bits(&mut self, addr: u16, mask: u8) {
        self.modify(addr, |v| v | mask);
    }

    /// `reg ^= mask`
    #[inline]
    fn toggle_bits(&mut self, addr: u16, mask: u8) {
        self.modify(addr, |v| v ^ mask);
    }
}

impl<B: RegisterBus> RegisterBus for &mut B {
    #[inline]
    fn read(&mut self, addr: u16) -> u8 {
        (**self).read(addr)
    }

    #[inline]
    fn write(&mut self, addr: u16, value: u8) {
        (**self).write(addr, value)
    }
}

/// Volatile access to the real data space.
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// # Safety
    ///
    /// Only valid on the target MCU, where every address the drivers use is a
    /// peripheral register. At most one `Mmio` per peripheral should be live,
    /// since nothing else serialises access.
    pub const unsafe fn new() -> Self {
        Mmio { _private: () }
    }
}

impl RegisterBus for Mmio {
    #[inline(always)]
    fn read(&mut self, addr: u16) -> u8 {
        // SAFETY: `Mmio::new` requires every driver address to be a valid register.
        unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
    }

    #[inline(always)]
    fn write(&mut self, addr: u16, value: u8) {
        // SAFETY: see `read`.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u8, value) }
    }
}
