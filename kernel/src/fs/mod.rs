//! Read-only byte-stream file layer.
//!
//! Files are byte images registered into a boot-time ramdisk; open files
//! are seekable read-only streams over them. That is the entire contract
//! the program loader needs, and it is all this layer provides: no
//! directories, no writes, no creation.
//!
//! Descriptor plumbing is two-level. A global file table holds the open
//! streams; each task's `fd_table` holds small slots mapping local
//! descriptors to global indices (or [`FD_FREE`]). Local descriptors
//! 0..=2 are the stdio triple and map to the reserved global slots of the
//! same number.

use alloc::string::String;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::config::{MAX_FILES_OPEN_PER_TASK, MAX_FILE_OPEN};

/// Free-slot sentinel in a task's `fd_table`.
pub const FD_FREE: u32 = 0xFFFF_FFFF;

/// The only supported open mode.
pub const O_RDONLY: u32 = 0;

/// Global indices reserved for stdin/stdout/stderr.
const STDIO_SLOTS: usize = 3;

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl Whence {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Whence::Set),
            1 => Some(Whence::Cur),
            2 => Some(Whence::End),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    /// Global file table or the task's descriptor slots are full.
    TooManyOpenFiles,
    BadFileDescriptor,
    /// Write to a ramdisk file, or any write-side operation.
    ReadOnly,
    /// Seek before the start of the file or bad whence.
    InvalidSeek,
    /// Reads from stdin (no keyboard path in this kernel).
    Unsupported,
}

/// An image in the ramdisk.
#[derive(Clone, Copy)]
struct RamFile {
    data: &'static [u8],
    inode: u32,
}

/// An open stream in the global file table.
struct OpenFile {
    data: &'static [u8],
    inode: u32,
    pos: usize,
}

lazy_static! {
    /// Path → image registry, populated during boot.
    static ref RAMDISK: Mutex<HashMap<String, RamFile>> = Mutex::new(HashMap::new());
}

static NEXT_INODE: Mutex<u32> = Mutex::new(0);

const NO_FILE: Option<OpenFile> = None;
static FILE_TABLE: Mutex<[Option<OpenFile>; MAX_FILE_OPEN]> =
    Mutex::new([NO_FILE; MAX_FILE_OPEN]);

pub fn init() {
    log::info!(
        "fs: ramdisk online, {} images, {} file-table slots",
        RAMDISK.lock().len(),
        MAX_FILE_OPEN
    );
}

/// Register a boot image under a path. Later registrations shadow earlier
/// ones.
pub fn register_image(path: &str, data: &'static [u8]) {
    let inode = {
        let mut next = NEXT_INODE.lock();
        *next += 1;
        *next
    };
    RAMDISK
        .lock()
        .insert(String::from(path), RamFile { data, inode });
    log::info!("fs: registered {} ({} bytes)", path, data.len());
}

fn lookup(path: &str) -> Result<RamFile, FsError> {
    RAMDISK.lock().get(path).copied().ok_or(FsError::NotFound)
}

/// Find a free global slot (above the stdio reservations) and fill it.
fn alloc_global_slot(file: OpenFile) -> Result<usize, FsError> {
    let mut table = FILE_TABLE.lock();
    for (idx, slot) in table.iter_mut().enumerate().skip(STDIO_SLOTS) {
        if slot.is_none() {
            *slot = Some(file);
            return Ok(idx);
        }
    }
    Err(FsError::TooManyOpenFiles)
}

/// Map a global index into the current task's first free local slot.
fn install_local_fd(global_idx: usize) -> Result<usize, FsError> {
    let mut cur = crate::task::current();
    // SAFETY: the current TCB page is live.
    let task = unsafe { cur.as_mut() };
    for (fd, slot) in task.fd_table.iter_mut().enumerate() {
        if *slot == FD_FREE {
            *slot = global_idx as u32;
            return Ok(fd);
        }
    }
    Err(FsError::TooManyOpenFiles)
}

/// Resolve a local descriptor to its global index, rejecting stdio.
fn resolve(fd: usize) -> Result<usize, FsError> {
    if fd >= MAX_FILES_OPEN_PER_TASK {
        return Err(FsError::BadFileDescriptor);
    }
    let cur = crate::task::current();
    // SAFETY: the current TCB page is live.
    let global = unsafe { cur.as_ref() }.fd_table[fd];
    if global == FD_FREE {
        return Err(FsError::BadFileDescriptor);
    }
    let global = global as usize;
    if global < STDIO_SLOTS {
        return Err(FsError::Unsupported);
    }
    Ok(global)
}

fn with_file<R>(fd: usize, f: impl FnOnce(&mut OpenFile) -> Result<R, FsError>) -> Result<R, FsError> {
    let global = resolve(fd)?;
    let mut table = FILE_TABLE.lock();
    let file = table[global].as_mut().ok_or(FsError::BadFileDescriptor)?;
    f(file)
}

/// Open a ramdisk file read-only; returns the local descriptor.
pub fn sys_open(path: &str, flags: u32) -> Result<usize, FsError> {
    if flags != O_RDONLY {
        return Err(FsError::ReadOnly);
    }
    let ram = lookup(path)?;
    let global = alloc_global_slot(OpenFile {
        data: ram.data,
        inode: ram.inode,
        pos: 0,
    })?;
    match install_local_fd(global) {
        Ok(fd) => Ok(fd),
        Err(e) => {
            // No local slot: give the global one back.
            FILE_TABLE.lock()[global] = None;
            Err(e)
        }
    }
}

/// Close a local descriptor, releasing both slots.
pub fn sys_close(fd: usize) -> Result<(), FsError> {
    let global = resolve(fd)?;
    FILE_TABLE.lock()[global] = None;
    let mut cur = crate::task::current();
    // SAFETY: the current TCB page is live.
    unsafe { cur.as_mut() }.fd_table[fd] = FD_FREE;
    Ok(())
}

/// Read from the stream position into `buf`; returns bytes read (0 at
/// end of file). Stdin has no backing input path here.
pub fn sys_read(fd: usize, buf: &mut [u8]) -> Result<usize, FsError> {
    if fd == 0 {
        return Err(FsError::Unsupported);
    }
    with_file(fd, |file| {
        let remaining = file.data.len().saturating_sub(file.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&file.data[file.pos..file.pos + n]);
        file.pos += n;
        Ok(n)
    })
}

/// Write `buf` to a descriptor. Only the console descriptors accept
/// writes; ramdisk files are read-only.
pub fn sys_write(fd: usize, buf: &[u8]) -> Result<usize, FsError> {
    if fd == 1 || fd == 2 {
        if let Ok(text) = core::str::from_utf8(buf) {
            crate::drivers::console::put_str(text);
        } else {
            for &b in buf {
                crate::drivers::console::put_char(b as char);
            }
        }
        return Ok(buf.len());
    }
    match resolve(fd) {
        Ok(_) => Err(FsError::ReadOnly),
        Err(e) => Err(e),
    }
}

/// Reposition the stream. `SEEK_END` takes a non-positive offset.
pub fn sys_lseek(fd: usize, offset: i32, whence: Whence) -> Result<u32, FsError> {
    with_file(fd, |file| {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => file.pos as i64,
            Whence::End => file.data.len() as i64,
        };
        let target = base + offset as i64;
        if target < 0 || target > file.data.len() as i64 {
            return Err(FsError::InvalidSeek);
        }
        file.pos = target as usize;
        Ok(file.pos as u32)
    })
}

/// Total size of an open file's backing image.
pub fn file_size(fd: usize) -> Result<usize, FsError> {
    with_file(fd, |file| Ok(file.data.len()))
}

/// Inode of an open file (diagnostics).
pub fn file_inode(fd: usize) -> Result<u32, FsError> {
    with_file(fd, |file| Ok(file.inode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::tcb::set_current;
    use crate::task::test_util::{sched_lock, TcbPage};
    use core::ptr::NonNull;

    static HELLO: [u8; 10] = *b"hello disk";

    fn setup(page: &mut TcbPage) {
        register_image("/bin/hello", &HELLO);
        let task = page.task_mut();
        task.init("fs-test", 5);
        set_current(Some(NonNull::from(&mut *task)));
    }

    #[test]
    fn test_open_read_close_roundtrip() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        setup(&mut page);

        let fd = sys_open("/bin/hello", O_RDONLY).unwrap();
        assert!(fd >= 3, "stdio slots must stay reserved");

        let mut buf = [0u8; 5];
        assert_eq!(sys_read(fd, &mut buf), Ok(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(sys_read(fd, &mut buf), Ok(5));
        assert_eq!(&buf, b" disk");
        assert_eq!(sys_read(fd, &mut buf), Ok(0)); // EOF

        sys_close(fd).unwrap();
        assert_eq!(sys_read(fd, &mut buf), Err(FsError::BadFileDescriptor));
        set_current(None);
    }

    #[test]
    fn test_lseek_whences() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        setup(&mut page);

        let fd = sys_open("/bin/hello", O_RDONLY).unwrap();
        assert_eq!(sys_lseek(fd, 6, Whence::Set), Ok(6));
        let mut buf = [0u8; 4];
        assert_eq!(sys_read(fd, &mut buf), Ok(4));
        assert_eq!(&buf, b"disk");

        assert_eq!(sys_lseek(fd, -4, Whence::Cur), Ok(6));
        assert_eq!(sys_lseek(fd, 0, Whence::End), Ok(10));
        assert_eq!(sys_lseek(fd, -11, Whence::End), Err(FsError::InvalidSeek));

        sys_close(fd).unwrap();
        set_current(None);
    }

    #[test]
    fn test_descriptor_slot_reuse() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        setup(&mut page);

        let a = sys_open("/bin/hello", O_RDONLY).unwrap();
        let b = sys_open("/bin/hello", O_RDONLY).unwrap();
        assert_ne!(a, b);

        sys_close(a).unwrap();
        let c = sys_open("/bin/hello", O_RDONLY).unwrap();
        assert_eq!(c, a, "freed slot is reused first");

        sys_close(b).unwrap();
        sys_close(c).unwrap();
        set_current(None);
    }

    #[test]
    fn test_local_slots_exhaust() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        setup(&mut page);

        // 8 slots, 3 taken by stdio: five opens fit, the sixth fails.
        let fds: alloc::vec::Vec<_> = (0..5)
            .map(|_| sys_open("/bin/hello", O_RDONLY).unwrap())
            .collect();
        assert_eq!(
            sys_open("/bin/hello", O_RDONLY),
            Err(FsError::TooManyOpenFiles)
        );
        for fd in fds {
            sys_close(fd).unwrap();
        }
        set_current(None);
    }

    #[test]
    fn test_missing_file() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        setup(&mut page);
        assert_eq!(sys_open("/no/such", O_RDONLY), Err(FsError::NotFound));
        set_current(None);
    }

    #[test]
    fn test_ramdisk_files_reject_writes() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        setup(&mut page);
        let fd = sys_open("/bin/hello", O_RDONLY).unwrap();
        assert_eq!(sys_write(fd, b"nope"), Err(FsError::ReadOnly));
        sys_close(fd).unwrap();
        set_current(None);
    }
}
