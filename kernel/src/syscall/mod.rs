//! System-call dispatch.
//!
//! User code raises `int 0x80` with the call number in EAX and up to three
//! arguments in EBX, ECX, EDX; the return value comes back in EAX. The
//! entry stub builds a full interrupt frame on the task's kernel stack,
//! calls [`dispatch`], patches the frame's EAX slot with the result and
//! unwinds back to Ring 3.
//!
//! The table is fixed-size. A number beyond the table is invalid input
//! and yields −1; a number *inside* the table with no handler is a wiring
//! bug and panics.

pub mod handlers;

use crate::arch::gdt::KERNEL_DS;
use crate::config::SYSCALL_TABLE_SIZE;

/// Stable system-call ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    GetPid = 0,
    Write = 1,
    Fork = 2,
    Read = 3,
    PutChar = 4,
    Clear = 5,
    GetCwd = 6,
    Open = 7,
    Close = 8,
    Lseek = 9,
    Unlink = 10,
    Mkdir = 11,
    OpenDir = 12,
    CloseDir = 13,
    Chdir = 14,
    Rmdir = 15,
    ReadDir = 16,
    RewindDir = 17,
    Stat = 18,
    Ps = 19,
    Execv = 20,
}

impl SyscallNumber {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::GetPid,
            1 => Self::Write,
            2 => Self::Fork,
            3 => Self::Read,
            4 => Self::PutChar,
            5 => Self::Clear,
            6 => Self::GetCwd,
            7 => Self::Open,
            8 => Self::Close,
            9 => Self::Lseek,
            10 => Self::Unlink,
            11 => Self::Mkdir,
            12 => Self::OpenDir,
            13 => Self::CloseDir,
            14 => Self::Chdir,
            15 => Self::Rmdir,
            16 => Self::ReadDir,
            17 => Self::RewindDir,
            18 => Self::Stat,
            19 => Self::Ps,
            20 => Self::Execv,
            _ => return None,
        })
    }
}

/// A populated table entry: three raw arguments in, accumulator out.
pub type SyscallHandler = fn(u32, u32, u32) -> isize;

/// The dispatch table. Ordinals 0..=20 are the published interface; the
/// tail stays unpopulated until someone claims those numbers.
static SYSCALL_TABLE: [Option<SyscallHandler>; SYSCALL_TABLE_SIZE] = [
    Some(handlers::sys_getpid),
    Some(handlers::sys_write),
    Some(handlers::sys_fork),
    Some(handlers::sys_read),
    Some(handlers::sys_putchar),
    Some(handlers::sys_clear),
    Some(handlers::sys_getcwd),
    Some(handlers::sys_open),
    Some(handlers::sys_close),
    Some(handlers::sys_lseek),
    Some(handlers::sys_unlink),
    Some(handlers::sys_mkdir),
    Some(handlers::sys_opendir),
    Some(handlers::sys_closedir),
    Some(handlers::sys_chdir),
    Some(handlers::sys_rmdir),
    Some(handlers::sys_readdir),
    Some(handlers::sys_rewinddir),
    Some(handlers::sys_stat),
    Some(handlers::sys_ps),
    Some(handlers::sys_execv),
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
];

/// Route one system call.
pub fn dispatch(number: u32, a1: u32, a2: u32, a3: u32) -> isize {
    if number as usize >= SYSCALL_TABLE_SIZE {
        log::warn!("syscall: unknown number {number}");
        return -1;
    }

    #[cfg(feature = "trace-syscalls")]
    log::trace!("syscall {number}({a1:#x}, {a2:#x}, {a3:#x})");

    match SYSCALL_TABLE[number as usize] {
        Some(handler) => handler(a1, a2, a3),
        None => panic!("syscall: unpopulated table entry {number}"),
    }
}

/// C-ABI shim for the assembly entry stub.
extern "C" fn dispatch_raw(number: u32, a1: u32, a2: u32, a3: u32) -> isize {
    dispatch(number, a1, a2, a3)
}

/// The `int 0x80` gate target.
///
/// Builds the same frame shape as any other interrupt (dummy error code,
/// segment registers, `pushad`, vector number), switches the data
/// segments to the kernel's, calls the dispatcher, stores the result into
/// the frame's EAX slot and unwinds with `iretd`.
///
/// # Safety
///
/// Installed as an IDT gate by the platform interrupt setup; never called
/// from Rust.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        // Software half of the interrupt frame.
        "push 0", // no error code on int 0x80
        "push ds",
        "push es",
        "push fs",
        "push gs",
        "pushad",
        "push 0x80", // vec_no
        // Kernel data segments for the duration of the call.
        "mov ax, {kds}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        // dispatch(eax=number, ebx, ecx, edx), cdecl.
        "push edx",
        "push ecx",
        "push ebx",
        "push eax",
        "call {dispatch}",
        "add esp, 16",
        // Return value into the frame's saved-EAX slot.
        "mov [esp + 32], eax",
        // Unwind the frame (mirror of intr_exit).
        "add esp, 4", // vec_no
        "popad",
        "pop gs",
        "pop fs",
        "pop es",
        "pop ds",
        "add esp, 4", // err_code
        "iretd",
        kds = const KERNEL_DS,
        dispatch = sym dispatch_raw,
    );
}
