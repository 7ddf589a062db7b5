//! Kernel configuration constants.
//!
//! This module contains compile-time configuration for the kernel.
//! Values here affect memory layout, limits, and scheduling defaults.

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Kernel virtual address base.
/// The kernel occupies the top gigabyte of every address space.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// Physical address of the kernel master page directory.
pub const KERNEL_PAGE_DIR_PHYS: u32 = 0x0010_0000;

/// Lowest user virtual address; ELF images are linked here.
pub const USER_VADDR_START: u32 = 0x0804_8000;

/// Top of the user stack. The stack's single committed page sits
/// directly below this address.
pub const USER_STACK_TOP: u32 = 0xC000_0000;

/// Virtual base of the user stack page.
pub const USER_STACK3_VADDR: u32 = USER_STACK_TOP - PAGE_SIZE as u32;

/// Kernel heap size (1 MiB, statically reserved in the image).
pub const KERNEL_HEAP_SIZE: usize = 1024 * 1024;

/// Virtual base of the physical-pool bitmaps.
pub const MEM_BITMAP_BASE: u32 = 0xC009_A000;

/// Virtual base of the kernel page-pool allocation window.
pub const KERNEL_VADDR_START: u32 = 0xC010_0000;

/// Number of open-file slots per task.
pub const MAX_FILES_OPEN_PER_TASK: usize = 8;

/// Depth of the global file table.
pub const MAX_FILE_OPEN: usize = 32;

/// Depth of the system-call dispatch table.
pub const SYSCALL_TABLE_SIZE: usize = 32;

/// Default priority for new user processes. Priority doubles as the
/// time-slice refill value, so this is also the default quantum.
pub const DEFAULT_PRIORITY: u8 = 31;

/// Priority of the idle task.
pub const IDLE_PRIORITY: u8 = 10;

/// Timer interrupt frequency in Hz.
pub const TIMER_FREQUENCY: u32 = 100;

/// Serial port for debug output (COM1).
pub const DEBUG_SERIAL_PORT: u16 = 0x3F8;
