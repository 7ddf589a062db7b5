//! ELF32 program loading.
//!
//! Split the way the pieces fail: `elf` is the pure parser/validator,
//! `segment_loader` puts validated segments into the current address
//! space, and `exec` ties both to the file layer and the process image
//! swap.

pub mod elf;
pub mod exec;
pub mod segment_loader;

pub use exec::sys_execv;
