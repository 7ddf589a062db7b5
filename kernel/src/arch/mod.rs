//! Architecture support for 32-bit x86 protected mode.
//!
//! Everything that touches privileged instructions lives here. The rest of
//! the kernel goes through these wrappers, so the pure-logic parts of the
//! tree stay host-buildable for the unit-test suite: on a non-x86 target the
//! privileged entry points compile to stubs.

pub mod cpu;
pub mod gdt;
pub mod port;
pub mod switch;
pub mod timer;
pub mod usermode;
