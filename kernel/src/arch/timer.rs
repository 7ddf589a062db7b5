//! Programmable Interval Timer (8253/8254) driver.
//!
//! The PIT's channel 0 drives preemption: it fires IRQ 0 at
//! [`TIMER_FREQUENCY`](crate::config::TIMER_FREQUENCY) and the interrupt
//! side calls into the scheduler's tick policy. Interrupt delivery itself
//! (PIC remap, IDT gate) belongs to the platform bring-up code; this module
//! only programs the counter and exports the tick entry point.

use crate::arch::port;
use crate::config::TIMER_FREQUENCY;

/// PIT input clock in Hz.
const PIT_INPUT_HZ: u32 = 1_193_180;

/// Channel 0 data port.
const PIT_CHANNEL0: u16 = 0x40;

/// Mode/command register.
const PIT_COMMAND: u16 = 0x43;

/// Command: channel 0, lobyte/hibyte access, mode 2 (rate generator).
const PIT_MODE2_LOHI: u8 = 0x34;

/// Compute the channel 0 reload divisor for a target frequency.
const fn divisor(frequency: u32) -> u16 {
    (PIT_INPUT_HZ / frequency) as u16
}

/// Program channel 0 for the configured tick rate.
pub fn init() {
    let div = divisor(TIMER_FREQUENCY);
    unsafe {
        port::outb(PIT_COMMAND, PIT_MODE2_LOHI);
        port::outb(PIT_CHANNEL0, (div & 0xFF) as u8);
        port::outb(PIT_CHANNEL0, (div >> 8) as u8);
    }
    log::info!("timer: pit channel 0 at {} Hz", TIMER_FREQUENCY);
}

/// Timer interrupt body. Called by the IRQ 0 handler with interrupts
/// disabled; forwards to the scheduler's tick accounting.
pub fn on_tick() {
    crate::task::scheduler::on_tick();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisor_fits_hardware_range() {
        let div = divisor(TIMER_FREQUENCY);
        assert!(div > 0);
        // 100 Hz → 11931, well inside the 16-bit counter.
        assert_eq!(divisor(100), 11931);
    }
}
