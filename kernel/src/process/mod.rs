//! User-process construction.
//!
//! A process is a task that owns an address space: page directory with the
//! kernel half aliased in, a user virtual-address pool, and per-process
//! heap descriptors. Creation builds all of that plus a kernel-thread-style
//! first-switch frame whose trampoline lands in [`start_process`], the
//! routine that crafts the Ring 3 entry frame and leaves through `iretd`.

use core::ptr::NonNull;

use crate::arch::cpu::EFlags;
use crate::arch::gdt::{USER_CS, USER_DS};
use crate::arch::usermode::{intr_exit, IntrFrame};
use crate::config::{DEFAULT_PRIORITY, USER_STACK3_VADDR, USER_STACK_TOP};
use crate::memory::{self, PoolKind};
use crate::task::scheduler;
use crate::task::tcb::{InitialFrame, Task};

/// Create a user process around `entry` and make it runnable.
///
/// Allocation failure here is a boot-time/bring-up failure with no caller
/// that could do anything about it, so it panics rather than propagating.
pub fn process_execute(entry: u32, name: &str) -> NonNull<Task> {
    let page = memory::get_kernel_pages(1).expect("process: out of kernel pages for TCB");
    let task_ptr = page as usize as *mut Task;
    // SAFETY: freshly allocated zeroed kernel page, nobody else sees it.
    unsafe { task_ptr.write(Task::empty()) };
    let task = unsafe { &mut *task_ptr };

    task.init(name, DEFAULT_PRIORITY);
    task.user_vaddr_pool = Some(
        memory::create_user_vaddr_pool().expect("process: out of pages for vaddr bitmap"),
    );
    task.page_dir = Some(memory::create_page_dir().expect("process: out of pages for page dir"));
    task.prepare_initial_frame(InitialFrame::UserProcess { entry });
    memory::init_block_descs(&mut task.block_descs);

    scheduler::enqueue_new(task);

    // SAFETY: task_ptr came from a successful allocation.
    unsafe { NonNull::new_unchecked(task_ptr) }
}

/// Build the Ring 3 interrupt frame for a process entering at `entry`.
///
/// General-purpose slots zeroed; data selectors set to the user data
/// segment except GS, which stays 0 so stray GS-relative accesses fault;
/// EFLAGS carries IF (user code must be preemptible) with IOPL 0.
pub fn user_intr_frame(entry: u32) -> IntrFrame {
    let mut frame = IntrFrame::zeroed();
    frame.ds = USER_DS as u32;
    frame.es = USER_DS as u32;
    frame.fs = USER_DS as u32;
    frame.gs = 0;
    frame.cs = USER_CS as u32;
    frame.ss = USER_DS as u32;
    frame.eip = entry;
    frame.eflags = (EFlags::RESERVED_1 | EFlags::IF).bits();
    frame
}

/// First-switch trampoline target for processes: finish building Ring 3
/// state and enter it.
///
/// Runs on the process's kernel stack with its page directory already
/// active (the scheduler loaded CR3 before switching here). Never
/// returns; the `iretd` drops to Ring 3.
pub fn start_process(entry: u32) -> ! {
    let mut cur = crate::task::current();
    // SAFETY: we are the current task; the TCB page is ours.
    let task = unsafe { cur.as_mut() };

    // Step past the consumed creation frames: from here on the kernel
    // stack for this task begins at the interrupt frame.
    let frame_ptr = task.intr_frame_ptr();
    task.kstack_top = frame_ptr as usize;

    // The single committed user stack page, mapped just below the top.
    memory::get_a_page(PoolKind::User, USER_STACK3_VADDR)
        .expect("process: cannot map user stack page");

    // SAFETY: the frame slot is reserved at the top of our TCB page.
    unsafe {
        let frame = &mut *frame_ptr;
        *frame = user_intr_frame(entry);
        frame.esp = USER_STACK_TOP;
        intr_exit(frame_ptr)
    }
}

/// Fork hook. Duplicating an address space is a collaborator concern
/// (copy-on-write is explicitly out of scope); the syscall keeps its
/// stable slot and reports failure.
pub fn sys_fork() -> isize {
    log::warn!("fork: not supported");
    -1
}
