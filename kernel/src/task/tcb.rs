//! Task control blocks.
//!
//! A task, whether kernel thread or user process, lives in exactly one 4 KiB
//! kernel page. The control block sits at the bottom of the page and the
//! task's kernel stack grows down from the top towards it:
//!
//! ```text
//!   page top ─→ ┌────────────────────────┐ tcb_base + 4096
//!               │ interrupt frame        │  (user tasks; rebuilt by execv)
//!               │ initial frame variant  │  (consumed on first switch-in)
//!               │ switch frame           │  ← kstack_top at creation
//!               │          ↓             │
//!               │     kernel stack       │
//!               ├────────────────────────┤
//!               │ Task (control block)   │
//!   page base ─→└────────────────────────┘  stack_magic at offset 0
//! ```
//!
//! The page-sized, page-aligned layout is load-bearing twice over: the
//! running task is recovered from ESP by masking the low 12 bits, and the
//! canary at offset 0 is the first thing a stack overflow tramples.

use core::mem::{align_of, offset_of, size_of};
use core::ptr::NonNull;

use crate::arch::usermode::IntrFrame;
use crate::config::{MAX_FILES_OPEN_PER_TASK, PAGE_SIZE};
use crate::fs::FD_FREE;
use crate::memory::{PageDirectory, VaddrPool};
use crate::task::list::ListTag;

/// Canary stored at offset 0 of every live TCB page.
pub const STACK_MAGIC: u32 = 0x2001_1124;

/// Task names are at most 15 bytes plus a NUL.
pub const TASK_NAME_LEN: usize = 16;

/// Task identifier. Monotonically increasing, never reused.
pub type Pid = u16;

/// Scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Currently on the CPU. Exactly one task at a time.
    Running,
    /// On the ready list, waiting for a slice.
    Ready,
    /// Parked by `block`; wakes only through `unblock`.
    Blocked,
    /// Waiting on a child or event (block variant).
    Waiting,
    /// Suspended pending reaping (block variant).
    Hanging,
    /// Finished; never scheduled again.
    Died,
}

impl TaskStatus {
    /// Statuses a task may be blocked under (and unblocked from).
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            TaskStatus::Blocked | TaskStatus::Waiting | TaskStatus::Hanging
        )
    }
}

/// What a freshly created task does on its first switch-in.
///
/// The low-level switch primitive only knows how to pop a register save
/// area and `ret`; the entry trampoline it returns into dispatches on this
/// variant, stored just above the switch frame on the new task's stack.
#[derive(Debug, Clone, Copy)]
pub enum InitialFrame {
    /// Run `func(arg)` in Ring 0; the task dies when it returns.
    KernelThread { func: fn(usize), arg: usize },
    /// Enter Ring 3 at `entry` through the interrupt-return door.
    UserProcess { entry: u32 },
}

/// Register save area consumed by the switch primitive, in stack order.
///
/// The four callee-saved registers are popped first, then `ret` consumes
/// `eip`. For a brand-new task `eip` is the entry trampoline and the two
/// slots above it form the trampoline's cdecl frame: a fake return address
/// and the `InitialFrame` pointer argument.
#[derive(Debug)]
#[repr(C)]
pub struct SwitchFrame {
    pub esi: usize,
    pub edi: usize,
    pub ebx: usize,
    pub ebp: usize,
    pub eip: usize,
    ret_pad: usize,
    pub arg: usize,
}

/// A task control block. Always the first thing in its page.
#[repr(C)]
pub struct Task {
    /// Must stay the first field: invariant is "magic at page offset 0".
    stack_magic: u32,
    /// Saved kernel stack pointer; read and written by the switch
    /// primitive through a raw pointer to this field.
    pub kstack_top: usize,
    pid: Pid,
    pub status: TaskStatus,
    /// Base priority, 1..=255. Doubles as the slice refill value.
    pub priority: u8,
    /// Ticks left in the current slice.
    pub ticks_remaining: u8,
    /// Cumulative CPU time in ticks.
    pub elapsed_ticks: u32,
    name: [u8; TASK_NAME_LEN],
    /// Virtual address of this process's page directory.
    /// `None` ⇒ kernel thread running on the master directory.
    pub page_dir: Option<NonNull<PageDirectory>>,
    /// User virtual-address allocator (processes only).
    pub user_vaddr_pool: Option<VaddrPool>,
    /// Local descriptor slots holding global file-table indices,
    /// or [`FD_FREE`]. Slots 0..=2 are stdio.
    pub fd_table: [u32; MAX_FILES_OPEN_PER_TASK],
    /// Directory inode for relative path resolution.
    pub cwd_inode_no: u32,
    pub parent_pid: Option<Pid>,
    /// Per-process heap size-class descriptors (opaque to the core).
    pub block_descs: [crate::memory::BlockDesc; crate::memory::BLOCK_DESC_CNT],
    /// Anchor for the ready list; doubles as the wait-queue anchor while
    /// blocked (a blocked task is never on the ready list).
    pub ready_tag: ListTag,
    /// Anchor for the all-tasks list.
    pub all_tag: ListTag,
}

/// PID counter, guarded against concurrent allocation.
static PID_LOCK: spin::Mutex<Pid> = spin::Mutex::new(0);

fn alloc_pid() -> Pid {
    let mut next = PID_LOCK.lock();
    *next += 1;
    *next
}

impl Task {
    /// A blank control block. Only meaningful once written into a
    /// page-aligned kernel page and passed through [`init`](Self::init).
    pub const fn empty() -> Self {
        Task {
            stack_magic: 0,
            kstack_top: 0,
            pid: 0,
            status: TaskStatus::Ready,
            priority: 0,
            ticks_remaining: 0,
            elapsed_ticks: 0,
            name: [0; TASK_NAME_LEN],
            page_dir: None,
            user_vaddr_pool: None,
            fd_table: [FD_FREE; MAX_FILES_OPEN_PER_TASK],
            cwd_inode_no: 0,
            parent_pid: None,
            block_descs: [crate::memory::BlockDesc::empty(); crate::memory::BLOCK_DESC_CNT],
            ready_tag: ListTag::new(),
            all_tag: ListTag::new(),
        }
    }

    /// Initialize identity, priority and the stack bookkeeping.
    ///
    /// The caller must have placed `self` at the base of a zeroed,
    /// page-aligned kernel page.
    pub fn init(&mut self, name: &str, priority: u8) {
        debug_assert!(self.page_base() % PAGE_SIZE == 0);
        assert!(priority >= 1, "task: priority must be at least 1");

        self.stack_magic = STACK_MAGIC;
        self.kstack_top = self.page_base() + PAGE_SIZE;
        self.pid = alloc_pid();
        self.status = TaskStatus::Ready;
        self.priority = priority;
        self.ticks_remaining = priority;
        self.elapsed_ticks = 0;
        self.set_name(name);
        self.page_dir = None;
        self.user_vaddr_pool = None;
        self.fd_table = [FD_FREE; MAX_FILES_OPEN_PER_TASK];
        self.fd_table[0] = 0; // stdin
        self.fd_table[1] = 1; // stdout
        self.fd_table[2] = 2; // stderr
        self.cwd_inode_no = 0;
        self.parent_pid = None;
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TASK_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    /// Set the task name, truncated to 15 bytes plus NUL.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; TASK_NAME_LEN];
        let n = name.len().min(TASK_NAME_LEN - 1);
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    }

    /// Base address of this task's page.
    pub fn page_base(&self) -> usize {
        self as *const Task as usize
    }

    /// Top of this task's kernel stack (one past the page).
    pub fn kstack_bottom(&self) -> usize {
        self.page_base() + PAGE_SIZE
    }

    /// The interrupt frame slot at the top of the page.
    ///
    /// Valid for user tasks, whose creation reserves it; `execv` rewrites
    /// it in place.
    pub fn intr_frame_ptr(&self) -> *mut IntrFrame {
        (self.page_base() + PAGE_SIZE - size_of::<IntrFrame>()) as *mut IntrFrame
    }

    /// Panic if the canary has been trampled.
    pub fn check_stack_guard(&self) {
        assert!(
            self.stack_magic == STACK_MAGIC,
            "task: kernel stack overflow (pid {})",
            self.pid
        );
    }

    /// Lay down the first-switch frames on this task's kernel stack.
    ///
    /// Reserves the top-of-page interrupt frame, stores the initial-frame
    /// variant below it, and below that the switch frame whose `ret` target
    /// is the entry trampoline. `kstack_top` ends up addressing the switch
    /// frame, which is exactly what the switch primitive expects to pop.
    pub fn prepare_initial_frame(&mut self, frame: InitialFrame) {
        let top = self.kstack_bottom();
        let mut sp = top - size_of::<IntrFrame>();

        sp -= size_of::<InitialFrame>();
        sp &= !(align_of::<InitialFrame>() - 1);
        let init_ptr = sp as *mut InitialFrame;

        sp -= size_of::<SwitchFrame>();
        let switch_ptr = sp as *mut SwitchFrame;

        assert!(
            sp > self.page_base() + size_of::<Task>(),
            "task: initial frames overlap the control block"
        );

        // SAFETY: both pointers lie inside this task's own page, above the
        // control block (asserted), and the page is exclusively ours here.
        unsafe {
            init_ptr.write(frame);
            switch_ptr.write(SwitchFrame {
                esi: 0,
                edi: 0,
                ebx: 0,
                ebp: 0,
                eip: task_entry_trampoline as usize,
                ret_pad: 0,
                arg: init_ptr as usize,
            });
        }

        self.kstack_top = sp;
    }

    /// Recover the task owning a linked ready-list tag.
    ///
    /// # Safety
    ///
    /// `tag` must be the `ready_tag` of a live task.
    pub unsafe fn from_ready_tag(tag: NonNull<ListTag>) -> NonNull<Task> {
        let base = tag.as_ptr() as usize - offset_of!(Task, ready_tag);
        // SAFETY: caller guarantees the tag is embedded in a live Task.
        unsafe { NonNull::new_unchecked(base as *mut Task) }
    }

    /// Recover the task owning a linked all-list tag.
    ///
    /// # Safety
    ///
    /// `tag` must be the `all_tag` of a live task.
    pub unsafe fn from_all_tag(tag: NonNull<ListTag>) -> NonNull<Task> {
        let base = tag.as_ptr() as usize - offset_of!(Task, all_tag);
        // SAFETY: caller guarantees the tag is embedded in a live Task.
        unsafe { NonNull::new_unchecked(base as *mut Task) }
    }
}

/// The running task, recovered from the stack pointer.
///
/// Every task runs on the kernel stack inside its own 4 KiB-aligned TCB
/// page, so masking the low 12 bits of ESP yields the control block. This
/// is the kernel's only notion of "current" and must not be called from a
/// stack that is not a TCB page (e.g. before `scheduler::init`).
#[cfg(target_arch = "x86")]
pub fn current() -> NonNull<Task> {
    let esp: u32;
    unsafe {
        core::arch::asm!("mov {}, esp", out(reg) esp, options(nomem, nostack));
    }
    let base = (esp as usize) & !(PAGE_SIZE - 1);
    // SAFETY: a TCB page base is never null.
    unsafe { NonNull::new_unchecked(base as *mut Task) }
}

#[cfg(not(target_arch = "x86"))]
mod host_current {
    use super::Task;
    use core::ptr::NonNull;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CURRENT: AtomicUsize = AtomicUsize::new(0);

    /// Host builds have no TCB-page stacks; tests install a current task
    /// explicitly.
    pub fn current() -> NonNull<Task> {
        NonNull::new(CURRENT.load(Ordering::Relaxed) as *mut Task)
            .expect("task: no current task installed")
    }

    pub fn set_current(task: Option<NonNull<Task>>) {
        CURRENT.store(
            task.map_or(0, |t| t.as_ptr() as usize),
            Ordering::Relaxed,
        );
    }
}

#[cfg(not(target_arch = "x86"))]
pub use host_current::{current, set_current};

/// First code every task executes.
///
/// Reached by the switch primitive's `ret`; the frame pointer argument was
/// planted by [`Task::prepare_initial_frame`]. Interrupts are enabled here
/// because the switch that delivered us ran with them disabled.
extern "C" fn task_entry_trampoline(frame: *const InitialFrame) -> ! {
    crate::arch::cpu::enable_interrupts();
    // SAFETY: the frame was written into this task's stack at creation and
    // nothing below kstack_top has run yet.
    let frame = unsafe { *frame };
    match frame {
        InitialFrame::KernelThread { func, arg } => {
            func(arg);
            crate::task::scheduler::exit_current()
        }
        InitialFrame::UserProcess { entry } => crate::process::start_process(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_util::TcbPage;

    #[test]
    fn test_magic_lands_at_page_offset_zero() {
        assert_eq!(offset_of!(Task, stack_magic), 0);

        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("guard", 31);

        let word = unsafe { *(task.page_base() as *const u32) };
        assert_eq!(word, STACK_MAGIC);
        task.check_stack_guard();
    }

    #[test]
    fn test_init_defaults() {
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("worker", 8);

        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(task.priority, 8);
        assert_eq!(task.ticks_remaining, 8);
        assert_eq!(task.elapsed_ticks, 0);
        assert_eq!(task.kstack_top, task.page_base() + PAGE_SIZE);
        assert!(task.page_dir.is_none());
        assert_eq!(task.parent_pid, None);
        // stdio slots populated, everything else free
        assert_eq!(&task.fd_table[..3], &[0, 1, 2]);
        assert!(task.fd_table[3..].iter().all(|&fd| fd == FD_FREE));
    }

    #[test]
    fn test_pids_are_monotonic() {
        let mut a = TcbPage::new();
        let mut b = TcbPage::new();
        a.task_mut().init("a", 1);
        b.task_mut().init("b", 1);
        assert!(b.task_mut().pid() > a.task_mut().pid());
    }

    #[test]
    fn test_name_truncates_to_fifteen_bytes() {
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("a-task-name-definitely-too-long", 1);
        assert_eq!(task.name().len(), TASK_NAME_LEN - 1);
        assert_eq!(task.name(), "a-task-name-def");
    }

    #[test]
    fn test_initial_frame_layout() {
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("fresh", 31);

        fn body(_arg: usize) {}
        task.prepare_initial_frame(InitialFrame::KernelThread {
            func: body,
            arg: 0xABCD,
        });

        // kstack_top must sit below the reserved interrupt frame.
        assert!(task.kstack_top < task.kstack_bottom() - size_of::<IntrFrame>());
        assert!(task.kstack_top > task.page_base() + size_of::<Task>());

        let frame = unsafe { &*(task.kstack_top as *const SwitchFrame) };
        assert_eq!(frame.eip, task_entry_trampoline as usize);
        assert_eq!(frame.ebp, 0);
        assert_eq!(frame.esi, 0);

        let init = unsafe { &*(frame.arg as *const InitialFrame) };
        match init {
            InitialFrame::KernelThread { arg, .. } => assert_eq!(*arg, 0xABCD),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_user_initial_frame_variant() {
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("proc", 31);
        task.prepare_initial_frame(InitialFrame::UserProcess { entry: 0x0804_8000 });

        let frame = unsafe { &*(task.kstack_top as *const SwitchFrame) };
        let init = unsafe { &*(frame.arg as *const InitialFrame) };
        match init {
            InitialFrame::UserProcess { entry } => assert_eq!(*entry, 0x0804_8000),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_tag_recovery_roundtrip() {
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("tags", 1);

        let ready = NonNull::from(&mut task.ready_tag);
        let all = NonNull::from(&mut task.all_tag);
        unsafe {
            assert_eq!(Task::from_ready_tag(ready).as_ptr(), task as *mut Task);
            assert_eq!(Task::from_all_tag(all).as_ptr(), task as *mut Task);
        }
    }

    #[test]
    #[should_panic(expected = "kernel stack overflow")]
    fn test_trampled_canary_panics() {
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("victim", 1);
        unsafe { (task.page_base() as *mut u32).write(0xDEAD_BEEF) };
        task.check_stack_guard();
    }
}
