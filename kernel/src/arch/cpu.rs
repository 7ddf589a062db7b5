//! CPU flag and halt primitives.
//!
//! The scheduler's critical sections are guarded by the interrupt flag
//! rather than by a lock, so saving and restoring IF correctly is what
//! makes nested critical sections compose. `IntrState` is the only way
//! the rest of the kernel toggles interrupts.

use bitflags::bitflags;

bitflags! {
    /// EFLAGS bits the kernel cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EFlags: u32 {
        /// Reserved bit 1; always set when EFLAGS is written.
        const RESERVED_1 = 1 << 1;
        /// Interrupt enable flag.
        const IF = 1 << 9;
        /// I/O privilege level mask (both bits).
        const IOPL = 3 << 12;
    }
}

/// Saved interrupt state, restored on `restore()`.
///
/// Obtained from [`IntrState::off`], which disables interrupts and
/// remembers whether they were enabled before.
#[must_use = "dropping the state without restore() leaves interrupts off"]
#[derive(Debug)]
pub struct IntrState {
    was_enabled: bool,
}

impl IntrState {
    /// Disable interrupts, returning the prior state.
    pub fn off() -> Self {
        let was_enabled = interrupts_enabled();
        if was_enabled {
            disable_interrupts();
        }
        IntrState { was_enabled }
    }

    /// Restore the interrupt flag to what it was at `off()`.
    pub fn restore(self) {
        if self.was_enabled {
            enable_interrupts();
        }
    }
}

/// Read whether the interrupt flag is currently set.
#[cfg(target_arch = "x86")]
pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    unsafe {
        core::arch::asm!(
            "pushfd",
            "pop {}",
            out(reg) eflags,
            options(preserves_flags)
        );
    }
    EFlags::from_bits_retain(eflags).contains(EFlags::IF)
}

/// Enable maskable interrupts.
#[cfg(target_arch = "x86")]
pub fn enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
}

/// Disable maskable interrupts.
#[cfg(target_arch = "x86")]
pub fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
}

/// Enable interrupts and halt until the next one arrives.
///
/// `sti; hlt` is a single interruptible window: an interrupt pending
/// across the `sti` wakes the `hlt` immediately, so the idle task never
/// sleeps through its own wake-up.
#[cfg(target_arch = "x86")]
pub fn enable_interrupts_and_halt() {
    unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) }
}

/// Halt the CPU with interrupts left as they are.
#[cfg(target_arch = "x86")]
pub fn halt() {
    unsafe { core::arch::asm!("hlt", options(nomem, nostack)) }
}

/// Load CR3 with the physical address of a page directory.
///
/// # Safety
///
/// `page_dir_phys` must be the physical address of a valid page directory
/// whose kernel half maps the currently executing code.
#[cfg(target_arch = "x86")]
pub unsafe fn load_page_dir(page_dir_phys: u32) {
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) page_dir_phys, options(nostack));
    }
}

// Host stubs: the unit-test suite runs scheduler bookkeeping with the
// interrupt flag modeled as permanently off.
#[cfg(not(target_arch = "x86"))]
pub fn interrupts_enabled() -> bool {
    false
}

#[cfg(not(target_arch = "x86"))]
pub fn enable_interrupts() {}

#[cfg(not(target_arch = "x86"))]
pub fn disable_interrupts() {}

#[cfg(not(target_arch = "x86"))]
pub fn enable_interrupts_and_halt() {}

#[cfg(not(target_arch = "x86"))]
pub fn halt() {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn load_page_dir(_page_dir_phys: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intr_state_composes() {
        // With interrupts modeled off, nesting must be a no-op either way.
        let outer = IntrState::off();
        let inner = IntrState::off();
        inner.restore();
        outer.restore();
        assert!(!interrupts_enabled());
    }

    #[test]
    fn test_eflags_bits() {
        assert_eq!(EFlags::IF.bits(), 0x200);
        assert_eq!(EFlags::RESERVED_1.bits(), 0x2);
        assert_eq!(EFlags::IOPL.bits(), 0x3000);
    }
}
