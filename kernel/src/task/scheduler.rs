//! The scheduler: ready/all registries, context-switch driver, idle task.
//!
//! Scheduling is strict FIFO with priority-as-quantum: tasks of equal
//! priority take turns in arrival order, and a task's priority is the
//! number of ticks its slice is refilled to, so higher priority means a
//! longer turn rather than an earlier one. The single deliberate exception
//! is the wake-up boost: `unblock` puts a task at the *front* of the ready
//! list so it runs promptly after the event it slept on.
//!
//! Every function here requires interrupts to be disabled for its critical
//! section; there is no scheduler lock beyond that. `IntrState` save/restore
//! makes the sections compose under nesting.

use core::ptr::NonNull;

use crate::arch::cpu::{self, IntrState};
use crate::arch::{gdt, switch};
use crate::config::{IDLE_PRIORITY, KERNEL_PAGE_DIR_PHYS, PAGE_SIZE};
use crate::task::list::TagList;
use crate::task::tcb::{current, InitialFrame, Task, TaskStatus};

/// Global scheduler state: the two task registries plus the two
/// distinguished tasks.
struct Scheduler {
    /// Runnable tasks, FIFO. A task is here iff its status is `Ready`.
    ready: TagList,
    /// Every task in the system, in creation order. Administrative walks
    /// (`ps`) only.
    all: TagList,
    /// The idle task; woken whenever the ready list runs dry.
    idle: Option<NonNull<Task>>,
    /// The bootstrap thread, adopted as the first task at init.
    main: Option<NonNull<Task>>,
}

/// Interrupts-off is the lock: the cell is only entered through [`with`],
/// which asserts the interrupt flag is clear.
struct SchedCell(core::cell::UnsafeCell<Scheduler>);

// SAFETY: single CPU; all access happens with interrupts disabled, so
// there is no concurrent entry.
unsafe impl Sync for SchedCell {}

static SCHED: SchedCell = SchedCell(core::cell::UnsafeCell::new(Scheduler {
    ready: TagList::new(),
    all: TagList::new(),
    idle: None,
    main: None,
}));

/// Run `f` over the scheduler state.
///
/// Callers must not re-enter (`f` must not call back into `with`); the
/// public entry points below are structured so that never happens.
fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    assert!(
        !cpu::interrupts_enabled(),
        "scheduler: entered with interrupts enabled"
    );
    // SAFETY: interrupts are off (asserted) and this is a single-CPU
    // kernel, so no other holder of the state exists.
    f(unsafe { &mut *SCHED.0.get() })
}

/// Adopt the bootstrap context and start the idle task.
///
/// Must run on the boot stack, which the platform start-up code places
/// inside a page-aligned TCB page; after this call that context is an
/// ordinary task and may block.
pub fn init() {
    let state = IntrState::off();

    // The context executing right now becomes the `main` task.
    let mut main = current();
    // SAFETY: the boot TCB page is exclusively ours until init finishes.
    let task = unsafe { main.as_mut() };
    task.init("main", crate::config::DEFAULT_PRIORITY);
    task.status = TaskStatus::Running;
    with(|s| {
        assert!(!s.all.contains(&task.all_tag), "scheduler: main already registered");
        // SAFETY: tag is embedded in the live boot TCB.
        unsafe { s.all.push_back(NonNull::from(&mut task.all_tag)) };
        s.main = Some(main);
    });
    state.restore();

    let idle = spawn_kernel_thread("idle", IDLE_PRIORITY, idle_thread, 0)
        .expect("scheduler: cannot allocate idle task");
    let state = IntrState::off();
    with(|s| s.idle = Some(idle));
    state.restore();

    log::info!("scheduler: online, main pid {}", unsafe { main.as_ref() }.pid());
}

/// Create a kernel thread and make it runnable.
///
/// Allocates the one-page TCB, lays down the first-switch frames, and
/// enqueues the task on both registries under interrupts-off.
pub fn spawn_kernel_thread(
    name: &str,
    priority: u8,
    func: fn(usize),
    arg: usize,
) -> Option<NonNull<Task>> {
    let page = crate::memory::get_kernel_pages(1)? as usize;
    let task_ptr = page as *mut Task;
    // SAFETY: get_kernel_pages hands us a zeroed page nobody else sees yet.
    unsafe { task_ptr.write(Task::empty()) };
    let task = unsafe { &mut *task_ptr };

    task.init(name, priority);
    task.prepare_initial_frame(InitialFrame::KernelThread { func, arg });

    enqueue_new(task);

    NonNull::new(task_ptr)
}

/// Register a fully built task on both lists, under interrupts-off.
pub(crate) fn enqueue_new(task: &mut Task) {
    let state = IntrState::off();
    with(|s| {
        assert!(!s.ready.contains(&task.ready_tag), "enqueue: already on ready list");
        assert!(!s.all.contains(&task.all_tag), "enqueue: already on all list");
        // SAFETY: tags are embedded in a live, initialized task.
        unsafe {
            s.ready.push_back(NonNull::from(&mut task.ready_tag));
            s.all.push_back(NonNull::from(&mut task.all_tag));
        }
    });
    state.restore();
}

/// Re-queue the outgoing task if it ran out its slice.
///
/// A task that is still `Running` at a scheduling point has exhausted its
/// quantum: refill the slice from its priority and append it at the tail.
/// A task that blocked (any other status) is left wherever its status says
/// it is.
fn requeue_current(s: &mut Scheduler, cur: &mut Task) {
    if cur.status == TaskStatus::Running {
        assert!(
            !s.ready.contains(&cur.ready_tag),
            "schedule: running task already on ready list"
        );
        // SAFETY: the tag is embedded in the live current task.
        unsafe { s.ready.push_back(NonNull::from(&mut cur.ready_tag)) };
        cur.ticks_remaining = cur.priority;
        cur.status = TaskStatus::Ready;
    }
}

/// Pop the next runnable task, waking idle if the queue is dry.
fn take_next(s: &mut Scheduler) -> NonNull<Task> {
    if s.ready.is_empty() {
        // Wake the idle task in place (front of the queue, wake-up boost),
        // exactly as unblock would.
        let mut idle = s.idle.expect("schedule: ready list empty and no idle task");
        // SAFETY: the idle task lives for the whole kernel lifetime.
        let it = unsafe { idle.as_mut() };
        assert!(
            it.status.is_blocked(),
            "schedule: idle task is neither blocked nor ready"
        );
        unsafe { s.ready.push_front(NonNull::from(&mut it.ready_tag)) };
        it.status = TaskStatus::Ready;
    }

    // SAFETY: list tags all belong to live tasks.
    let tag = unsafe { s.ready.pop_front() }.expect("schedule: ready list empty");
    let mut next = unsafe { Task::from_ready_tag(tag) };
    let task = unsafe { next.as_mut() };
    task.check_stack_guard();
    task.status = TaskStatus::Running;
    next
}

/// Load the incoming task's address space and kernel-stack anchor.
///
/// Kernel threads run on the master page directory; a task with its own
/// directory gets it loaded into CR3 and `tss.esp0` re-pointed at the top
/// of its TCB page, so Ring 3 → 0 entries land on its kernel stack.
fn activate(mut task: NonNull<Task>) {
    // SAFETY: the task was just popped from the ready list and is live.
    let t = unsafe { task.as_mut() };
    let pd_phys = match t.page_dir {
        Some(pd) => crate::memory::addr_v2p(pd.as_ptr() as u32),
        None => KERNEL_PAGE_DIR_PHYS,
    };
    // SAFETY: both directories keep the kernel half mapped.
    unsafe { cpu::load_page_dir(pd_phys) };

    if t.page_dir.is_some() {
        gdt::update_esp0((t.page_base() + PAGE_SIZE) as u32);
    }
}

/// Pick the next task and switch to it.
///
/// Precondition: interrupts disabled. Returns when this task is next
/// scheduled (or immediately, if it is the only runnable task).
pub fn schedule() {
    let mut cur_ptr = current();
    // SAFETY: current() addresses the live TCB page we are running on.
    let cur = unsafe { cur_ptr.as_mut() };
    cur.check_stack_guard();

    let next = with(|s| {
        requeue_current(s, &mut *cur);
        take_next(s)
    });

    if next == cur_ptr {
        // Sole runnable task re-elected itself; nothing to switch.
        return;
    }

    activate(next);
    // SAFETY: both slots point at kstack_top fields of live TCBs and
    // interrupts are off per the precondition.
    unsafe {
        switch::switch_to(
            &mut cur.kstack_top as *mut usize,
            core::ptr::addr_of!((*next.as_ptr()).kstack_top),
        );
    }
}

/// Block the current task under the given status and yield the CPU.
///
/// `status` must be one of the blocked statuses. Returns after some other
/// task calls [`unblock`] on us.
pub fn block(status: TaskStatus) {
    assert!(status.is_blocked(), "block: not a blocked status");
    let state = IntrState::off();
    // SAFETY: the current TCB page is live.
    unsafe { current().as_mut() }.status = status;
    schedule();
    state.restore();
}

/// Make a blocked task runnable again, at the front of the queue.
///
/// The front insertion is the documented wake-up boost: a task that just
/// got what it was waiting for runs before tasks that merely exhausted
/// their slices.
pub fn unblock(mut task: NonNull<Task>) {
    let state = IntrState::off();
    // SAFETY: caller hands us a live task.
    let t = unsafe { task.as_mut() };
    assert!(t.status.is_blocked(), "unblock: task is not blocked");
    with(|s| {
        if s.ready.contains(&t.ready_tag) {
            panic!("unblock: blocked thread in ready list");
        }
        // SAFETY: tag belongs to the live task being woken.
        unsafe { s.ready.push_front(NonNull::from(&mut t.ready_tag)) };
        t.status = TaskStatus::Ready;
    });
    state.restore();
}

/// Voluntarily give up the rest of the slice.
pub fn yield_now() {
    let state = IntrState::off();
    let mut cur_ptr = current();
    // SAFETY: the current TCB page is live.
    let cur = unsafe { cur_ptr.as_mut() };
    with(|s| {
        assert!(
            !s.ready.contains(&cur.ready_tag),
            "yield: running task already on ready list"
        );
        // SAFETY: tag embedded in the live current task.
        unsafe { s.ready.push_back(NonNull::from(&mut cur.ready_tag)) };
        cur.status = TaskStatus::Ready;
    });
    schedule();
    state.restore();
}

/// Timer-tick policy: account a tick, preempt on slice exhaustion.
///
/// Called from the timer interrupt with interrupts disabled.
pub fn on_tick() {
    let mut cur = current();
    // SAFETY: interrupt arrived on a task's kernel stack.
    let t = unsafe { cur.as_mut() };
    t.check_stack_guard();
    t.elapsed_ticks += 1;
    if t.ticks_remaining == 0 {
        schedule();
    } else {
        t.ticks_remaining -= 1;
    }
}

/// Terminate the current task. It stays on the all list as `Died` for
/// `ps` until reaping exists, but is never scheduled again.
pub fn exit_current() -> ! {
    cpu::disable_interrupts();
    // SAFETY: the current TCB page is live.
    unsafe { current().as_mut() }.status = TaskStatus::Died;
    schedule();
    unreachable!("schedule returned into a dead task");
}

/// The idle task: priority 10, runs only when nothing else can.
///
/// It immediately blocks; the scheduler wakes it when the ready list runs
/// dry, at which point it halts until the next interrupt delivers work.
fn idle_thread(_arg: usize) {
    loop {
        block(TaskStatus::Blocked);
        cpu::enable_interrupts_and_halt();
    }
}

/// Administrative walk of every task, for `ps`.
pub fn print_tasks() {
    let state = IntrState::off();
    crate::kprintln!("  PID  PPID STATUS    TICKS NAME");
    with(|s| {
        // SAFETY: the all list is stable while interrupts are off.
        for tag in unsafe { s.all.iter() } {
            let t = unsafe { Task::from_all_tag(tag).as_ref() };
            let ppid = t.parent_pid.map_or(-1, |p| p as i32);
            crate::kprintln!(
                "{:>5} {:>5} {:<9?} {:>5} {}",
                t.pid(),
                ppid,
                t.status,
                t.elapsed_ticks,
                t.name()
            );
        }
    });
    state.restore();
}

/// Drop all scheduler state. Host-test support: the global registries are
/// shared between tests and must be emptied before tags go out of scope.
#[cfg(test)]
pub(crate) fn schedule_test_reset() {
    with(|s| {
        while unsafe { s.ready.pop_front() }.is_some() {}
        while unsafe { s.all.pop_front() }.is_some() {}
        s.idle = None;
        s.main = None;
    });
}
