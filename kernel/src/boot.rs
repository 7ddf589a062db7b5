//! Kernel bring-up.
//!
//! # Boot contract
//!
//! The platform loader (multiboot-style, outside this crate) has already:
//! 1. entered 32-bit protected mode with paging on: kernel mapped at
//!    `0xC0000000+`, master page directory at physical `0x00100000` with
//!    its recursive self-map installed
//! 2. placed ESP inside a 4 KiB-aligned page reserved as the boot task's
//!    TCB page
//! 3. installed an IDT whose IRQ 0 gate calls
//!    [`timer::on_tick`](crate::arch::timer::on_tick) and whose `0x80`
//!    gate (DPL 3) is [`syscall_entry`](crate::syscall::syscall_entry)
//! 4. probed physical memory and passed the total to [`kernel_main`]
//!
//! # Bring-up order
//!
//! Serial and the logger come first so everything later can report.
//! Memory precedes the scheduler because adopting the boot task does not
//! allocate, but spawning idle does. The console's lock engages only once
//! the scheduler can attribute ownership; the timer goes last so no tick
//! fires into a half-built scheduler.

use crate::arch::{cpu, gdt, timer};
use crate::task::scheduler;
use crate::{allocator, drivers, fs, logger, memory};

/// Entry point, called by the platform loader stub.
pub fn kernel_main(total_memory: u32) -> ! {
    drivers::serial::init();
    logger::init();
    log::info!("helios: booting, {} MiB reported", total_memory / (1024 * 1024));

    gdt::init();
    memory::init(total_memory);
    allocator::init();
    fs::init();

    scheduler::init();
    drivers::console::init();

    timer::init();
    cpu::enable_interrupts();
    log::info!("helios: bring-up complete");

    // The boot context lives on as the `main` task. With nothing queued it
    // simply parks; the idle task carries the halts from here.
    loop {
        scheduler::yield_now();
        cpu::halt();
    }
}
