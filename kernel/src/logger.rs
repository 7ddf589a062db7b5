//! `log` facade backend.
//!
//! Records go to the serial port with the level prefixed. The VGA console
//! is deliberately not a log sink: log calls happen inside scheduler paths
//! where taking the console lock could block.

use log::{LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!("[{:>5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Safe to call exactly once, before any
/// subsystem starts logging.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
