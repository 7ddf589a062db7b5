//! `execv`-style image replacement.
//!
//! The current process keeps its identity (PID, descriptor table, page
//! directory) and has its user image swapped out underneath it. On
//! success there is nothing to return to: the kernel-top interrupt frame
//! is rewritten for the new entry point and control leaves through the
//! interrupt-return door. On failure the call returns −1; if segment
//! mapping had already started, the old image may have stray fresh pages
//! and the caller should treat the process as doomed.

use alloc::vec::Vec;

use crate::arch::usermode::intr_exit;
use crate::config::USER_STACK_TOP;
use crate::fs::{self, FsError, Whence, O_RDONLY};
use crate::loader::elf::{Elf32Header, Elf32ProgramHeader, ElfError};
use crate::loader::segment_loader::{read_exact, segment_load, SegmentLoadError};
use crate::task;

/// Longest path accepted from user memory.
const PATH_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadError {
    Io(FsError),
    Elf(ElfError),
    Segment(SegmentLoadError),
}

impl From<FsError> for LoadError {
    fn from(e: FsError) -> Self {
        LoadError::Io(e)
    }
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        LoadError::Elf(e)
    }
}

impl From<SegmentLoadError> for LoadError {
    fn from(e: SegmentLoadError) -> Self {
        LoadError::Segment(e)
    }
}

/// Read and validate the header plus every PT_LOAD program header.
///
/// Nothing is mapped yet when this returns: validation failures leave the
/// calling image fully intact, which is the atomicity the loader promises.
fn read_load_headers(fd: usize) -> Result<(Elf32Header, Vec<Elf32ProgramHeader>), LoadError> {
    let mut header_buf = [0u8; core::mem::size_of::<Elf32Header>()];
    fs::sys_lseek(fd, 0, Whence::Set)?;
    read_exact(fd, &mut header_buf)?;

    let header = Elf32Header::parse(&header_buf)?;
    header.validate()?;

    let file_size = fs::file_size(fd)?;
    let mut load_phdrs = Vec::new();
    for i in 0..header.e_phnum {
        fs::sys_lseek(fd, header.phdr_offset(i) as i32, Whence::Set)?;
        let mut ph_buf = [0u8; core::mem::size_of::<Elf32ProgramHeader>()];
        read_exact(fd, &mut ph_buf)?;

        let ph = Elf32ProgramHeader::parse(&ph_buf)?;
        if ph.is_load() {
            ph.validate(file_size)?;
            load_phdrs.push(ph);
        }
    }
    Ok((header, load_phdrs))
}

/// Load an executable into the current address space; returns its entry
/// point.
fn load_image(path: &str) -> Result<u32, LoadError> {
    let fd = fs::sys_open(path, O_RDONLY)?;
    let result = (|| {
        let (header, phdrs) = read_load_headers(fd)?;
        for ph in &phdrs {
            segment_load(fd, ph)?;
        }
        Ok(header.e_entry)
    })();
    let _ = fs::sys_close(fd);
    result
}

/// Walk a NUL-terminated C string out of the current address space.
pub(crate) unsafe fn user_cstr<'a>(ptr: *const u8, max: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    // SAFETY: caller vouches the pointer is readable in this address
    // space; length is capped.
    while len < max && unsafe { *ptr.add(len) } != 0 {
        len += 1;
    }
    core::str::from_utf8(unsafe { core::slice::from_raw_parts(ptr, len) }).ok()
}

/// Count argv entries up to the NULL terminator.
unsafe fn count_args(argv: *const *const u8) -> u32 {
    let mut argc = 0;
    // SAFETY: caller vouches argv is a readable NULL-terminated vector.
    while !unsafe { *argv.add(argc as usize) }.is_null() {
        argc += 1;
    }
    argc
}

/// Replace the current process image with the executable at `path`.
///
/// On success control re-enters Ring 3 at the new entry point with
/// `ebx = argv`, `ecx = argc` and `esp` at the stack top; the call never
/// returns. On any failure the image swap is abandoned and −1 comes back.
pub fn sys_execv(path_ptr: *const u8, argv: *const *const u8) -> isize {
    // SAFETY: syscall arguments live in the current address space.
    let Some(path) = (unsafe { user_cstr(path_ptr, PATH_MAX) }) else {
        return -1;
    };
    let argc = if argv.is_null() {
        0
    } else {
        // SAFETY: as above.
        unsafe { count_args(argv) }
    };

    let entry = match load_image(path) {
        Ok(entry) => entry,
        Err(err) => {
            log::warn!("execv: loading {} failed: {:?}", path, err);
            return -1;
        }
    };

    let mut cur = task::current();
    // SAFETY: the current TCB page is live.
    let tcb = unsafe { cur.as_mut() };
    tcb.set_name(path);

    let frame_ptr = tcb.intr_frame_ptr();
    // SAFETY: the frame slot at the top of our own TCB page is reserved
    // for exactly this.
    unsafe {
        let frame = &mut *frame_ptr;
        *frame = crate::process::user_intr_frame(entry);
        frame.ebx = argv as u32;
        frame.ecx = argc;
        frame.esp = USER_STACK_TOP;
    }
    tcb.kstack_top = frame_ptr as usize;

    // The old image's continuation is gone; leave through the only door.
    // SAFETY: the frame was fully built above.
    unsafe { intr_exit(frame_ptr) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::elf::test_images::minimal_elf;
    use crate::task::tcb::set_current;
    use crate::task::test_util::{sched_lock, TcbPage};
    use core::ptr::NonNull;

    fn register(path: &str, image: alloc::vec::Vec<u8>) {
        crate::fs::register_image(path, alloc::boxed::Box::leak(image.into_boxed_slice()));
    }

    #[test]
    fn test_header_prevalidation_accepts_minimal_image() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("exec-test", 5);
        set_current(Some(NonNull::from(&mut *task)));

        register("/bin/mini", minimal_elf());
        let fd = fs::sys_open("/bin/mini", O_RDONLY).unwrap();
        let (header, phdrs) = read_load_headers(fd).unwrap();

        let entry = header.e_entry;
        assert_eq!(entry, 0x0804_8000);
        assert_eq!(phdrs.len(), 1);
        let vaddr = phdrs[0].p_vaddr;
        assert_eq!(vaddr, 0x0804_8000);

        fs::sys_close(fd).unwrap();
        set_current(None);
    }

    #[test]
    fn test_foreign_machine_rejected_before_any_mapping() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("exec-test", 5);
        set_current(Some(NonNull::from(&mut *task)));

        let mut image = minimal_elf();
        image[18..20].copy_from_slice(&0x3Eu16.to_le_bytes()); // x86-64
        register("/bin/wrong-arch", image);

        let fd = fs::sys_open("/bin/wrong-arch", O_RDONLY).unwrap();
        assert_eq!(
            read_load_headers(fd),
            Err(LoadError::Elf(ElfError::InvalidMachine))
        );
        fs::sys_close(fd).unwrap();
        set_current(None);
    }

    #[test]
    fn test_phnum_zero_loads_no_segments() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("exec-test", 5);
        set_current(Some(NonNull::from(&mut *task)));

        let mut image = minimal_elf();
        image[44..46].copy_from_slice(&0u16.to_le_bytes()); // e_phnum = 0
        register("/bin/empty", image);

        let fd = fs::sys_open("/bin/empty", O_RDONLY).unwrap();
        let (header, phdrs) = read_load_headers(fd).unwrap();
        let entry = header.e_entry;
        assert_eq!(entry, 0x0804_8000);
        assert!(phdrs.is_empty());
        fs::sys_close(fd).unwrap();
        set_current(None);
    }

    #[test]
    fn test_user_cstr() {
        let raw = b"program\0junk";
        let s = unsafe { user_cstr(raw.as_ptr(), PATH_MAX) }.unwrap();
        assert_eq!(s, "program");
        assert!(unsafe { user_cstr(core::ptr::null(), PATH_MAX) }.is_none());
    }

    #[test]
    fn test_count_args() {
        let a = b"a\0";
        let b = b"bc\0";
        let argv: [*const u8; 3] = [a.as_ptr(), b.as_ptr(), core::ptr::null()];
        assert_eq!(unsafe { count_args(argv.as_ptr()) }, 2);
    }
}
