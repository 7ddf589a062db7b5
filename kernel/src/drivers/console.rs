//! The serialized console.
//!
//! All kernel text output funnels through here. Serialization uses the
//! recursive [`Lock`]: a task that takes an interrupt and prints from a
//! nested path while already holding the console does not deadlock
//! against itself, and concurrent tasks' lines never interleave
//! mid-string.
//!
//! Before the scheduler exists there is no "current task" for the lock to
//! attribute ownership to, so until [`init`] the lock is bypassed; boot
//! is single-threaded anyway.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::drivers::vga::VgaWriter;
use crate::sync::Lock;

static CONSOLE_LOCK: Lock = Lock::new();

/// Whether the lock may be used (scheduler is up).
static LOCK_READY: AtomicBool = AtomicBool::new(false);

struct WriterCell(UnsafeCell<VgaWriter>);

// SAFETY: every access is wrapped in the console lock (or happens during
// single-threaded boot).
unsafe impl Sync for WriterCell {}

static WRITER: WriterCell = WriterCell(UnsafeCell::new(VgaWriter::new()));

/// Switch the console to locked operation. Call once the scheduler can
/// attribute lock ownership.
pub fn init() {
    LOCK_READY.store(true, Ordering::Release);
    log::info!("console: lock-guarded output enabled");
}

fn with_writer<R>(f: impl FnOnce(&mut VgaWriter) -> R) -> R {
    let locked = LOCK_READY.load(Ordering::Acquire);
    if locked {
        CONSOLE_LOCK.acquire();
    }
    // SAFETY: under the console lock, or single-threaded boot.
    let result = f(unsafe { &mut *WRITER.0.get() });
    if locked {
        CONSOLE_LOCK.release();
    }
    result
}

pub fn put_str(s: &str) {
    with_writer(|w| w.write_str(s));
}

pub fn put_char(c: char) {
    let mut buf = [0u8; 4];
    put_str(c.encode_utf8(&mut buf));
}

/// Blank the screen (syscall `clear`).
pub fn clear() {
    with_writer(VgaWriter::clear);
}

struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        put_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn print_fmt(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = ConsoleWriter.write_fmt(args);
}

/// Print to the VGA console.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::drivers::console::print_fmt(format_args!($($arg)*)));
}

/// Print to the VGA console with a trailing newline.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}
