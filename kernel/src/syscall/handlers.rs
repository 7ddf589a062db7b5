//! System-call handlers.
//!
//! Thin adapters between the raw three-argument ABI and the typed kernel
//! services. Every fallible service reports through `Result`; handlers
//! fold errors to −1 (or NULL for pointer-returning calls) at this
//! boundary and nowhere else.
//!
//! Calls whose backing subsystem does not exist in this kernel
//! (write-side filesystem, directories, fork) keep their stable ordinals
//! and fail honestly.

use crate::fs::{self, Whence};
use crate::loader;
use crate::loader::exec::user_cstr;
use crate::task;

/// Longest path accepted from user memory.
const PATH_MAX: usize = 255;

pub fn sys_getpid(_a1: u32, _a2: u32, _a3: u32) -> isize {
    // SAFETY: syscalls always run on a task's kernel stack.
    unsafe { task::current().as_ref() }.pid() as isize
}

pub fn sys_write(fd: u32, buf: u32, count: u32) -> isize {
    if buf == 0 {
        return -1;
    }
    // SAFETY: user memory in the current address space; the fs layer only
    // reads through the slice.
    let bytes = unsafe { core::slice::from_raw_parts(buf as usize as *const u8, count as usize) };
    match fs::sys_write(fd as usize, bytes) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

pub fn sys_fork(_a1: u32, _a2: u32, _a3: u32) -> isize {
    crate::process::sys_fork()
}

pub fn sys_read(fd: u32, buf: u32, count: u32) -> isize {
    if buf == 0 {
        return -1;
    }
    // SAFETY: user memory in the current address space.
    let bytes =
        unsafe { core::slice::from_raw_parts_mut(buf as usize as *mut u8, count as usize) };
    match fs::sys_read(fd as usize, bytes) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

pub fn sys_putchar(ch: u32, _a2: u32, _a3: u32) -> isize {
    crate::drivers::console::put_char(ch as u8 as char);
    0
}

pub fn sys_clear(_a1: u32, _a2: u32, _a3: u32) -> isize {
    crate::drivers::console::clear();
    0
}

/// Returns `buf` holding the working directory, or NULL. The file layer
/// has no directory tree, so every task's directory is "/".
pub fn sys_getcwd(buf: u32, size: u32, _a3: u32) -> isize {
    if buf == 0 || size < 2 {
        return 0; // NULL
    }
    // SAFETY: user memory in the current address space.
    unsafe {
        let dst = buf as usize as *mut u8;
        dst.write(b'/');
        dst.add(1).write(0);
    }
    buf as isize
}

pub fn sys_open(path: u32, flags: u32, _a3: u32) -> isize {
    // SAFETY: path pointer from the current address space.
    let Some(path) = (unsafe { user_cstr(path as usize as *const u8, PATH_MAX) }) else {
        return -1;
    };
    match fs::sys_open(path, flags) {
        Ok(fd) => fd as isize,
        Err(_) => -1,
    }
}

pub fn sys_close(fd: u32, _a2: u32, _a3: u32) -> isize {
    match fs::sys_close(fd as usize) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_lseek(fd: u32, offset: u32, whence: u32) -> isize {
    let Some(whence) = Whence::from_u32(whence) else {
        return -1;
    };
    match fs::sys_lseek(fd as usize, offset as i32, whence) {
        Ok(pos) => pos as isize,
        Err(_) => -1,
    }
}

pub fn sys_unlink(_path: u32, _a2: u32, _a3: u32) -> isize {
    -1 // read-only file layer
}

pub fn sys_mkdir(_path: u32, _a2: u32, _a3: u32) -> isize {
    -1 // read-only file layer
}

pub fn sys_opendir(_name: u32, _a2: u32, _a3: u32) -> isize {
    0 // NULL: no directory tree
}

pub fn sys_closedir(_dir: u32, _a2: u32, _a3: u32) -> isize {
    -1
}

pub fn sys_chdir(_path: u32, _a2: u32, _a3: u32) -> isize {
    -1
}

pub fn sys_rmdir(_path: u32, _a2: u32, _a3: u32) -> isize {
    -1
}

pub fn sys_readdir(_dir: u32, _a2: u32, _a3: u32) -> isize {
    0 // NULL
}

pub fn sys_rewinddir(_dir: u32, _a2: u32, _a3: u32) -> isize {
    0 // void
}

pub fn sys_stat(_path: u32, _buf: u32, _a3: u32) -> isize {
    -1
}

pub fn sys_ps(_a1: u32, _a2: u32, _a3: u32) -> isize {
    task::scheduler::print_tasks();
    0
}

pub fn sys_execv(path: u32, argv: u32, _a3: u32) -> isize {
    loader::sys_execv(
        path as usize as *const u8,
        argv as usize as *const *const u8,
    )
}
