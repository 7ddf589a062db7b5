//! Panic handler for the kernel.
//!
//! Invariant violations are fatal by design: report over serial (which
//! needs no locks that could themselves be the problem) and halt with
//! interrupts off.

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::arch::cpu::disable_interrupts();

    crate::serial_println!();
    crate::serial_println!("========================================");
    crate::serial_println!("KERNEL PANIC");
    crate::serial_println!("========================================");

    if let Some(location) = info.location() {
        crate::serial_println!(
            "Location: {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }

    crate::serial_println!("Message: {}", info.message());
    crate::serial_println!("System halted.");

    loop {
        crate::arch::cpu::halt();
    }
}
