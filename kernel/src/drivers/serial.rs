//! Serial port driver for debug output.
//!
//! A 16550 UART on COM1, polled writes only. This is the log sink: it
//! works before the scheduler exists and keeps working inside the panic
//! handler, which is more than the console can promise.

use core::fmt;
use spin::Mutex;

use crate::arch::port;
use crate::config::DEBUG_SERIAL_PORT;

/// A 16550-compatible UART.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// Wrap a UART at the given port base.
    ///
    /// # Safety
    ///
    /// `base` must be the I/O base of a real 16550; programming arbitrary
    /// ports can confuse unrelated hardware.
    pub const unsafe fn new(base: u16) -> Self {
        SerialPort { base }
    }

    /// 38400 baud, 8N1, FIFOs on, no interrupts (polled).
    pub fn init(&mut self) {
        // SAFETY: standard 16550 register programming on our own base.
        unsafe {
            port::outb(self.base + 1, 0x00); // interrupts off
            port::outb(self.base + 3, 0x80); // DLAB on
            port::outb(self.base, 0x03); // divisor low: 38400
            port::outb(self.base + 1, 0x00); // divisor high
            port::outb(self.base + 3, 0x03); // 8N1, DLAB off
            port::outb(self.base + 2, 0xC7); // FIFO on, clear, 14-byte
            port::outb(self.base + 4, 0x0B); // DTR | RTS | OUT2
        }
    }

    fn transmit_ready(&self) -> bool {
        // SAFETY: line status register read, no side effects.
        unsafe { port::inb(self.base + 5) & 0x20 != 0 }
    }

    pub fn send(&mut self, byte: u8) {
        #[cfg(target_arch = "x86")]
        while !self.transmit_ready() {
            core::hint::spin_loop();
        }
        // SAFETY: transmitter holding register write.
        unsafe { port::outb(self.base, byte) };
    }
}

/// Global serial port (COM1).
static SERIAL1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// Initialize COM1. Without the `serial-console` feature the port stays
/// closed and every write is a no-op.
pub fn init() {
    #[cfg(feature = "serial-console")]
    {
        // SAFETY: COM1 is a 16550 on every PC this kernel targets.
        let mut port = unsafe { SerialPort::new(DEBUG_SERIAL_PORT) };
        port.init();
        *SERIAL1.lock() = Some(port);
    }
}

/// Write a byte to COM1. No-op before `init`.
pub fn write_byte(byte: u8) {
    if let Some(ref mut serial) = *SERIAL1.lock() {
        if byte == b'\n' {
            serial.send(b'\r');
        }
        serial.send(byte);
    }
}

/// Write a string to COM1.
pub fn write_str(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
    }
}

/// Serial writer for formatting.
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

/// Print macro for serial output.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::drivers::serial::SerialWriter, $($arg)*);
    }};
}

/// Print macro for serial output with a trailing newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {{
        $crate::serial_print!($($arg)*);
        $crate::serial_print!("\n");
    }};
}
