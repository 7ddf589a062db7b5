//! Task management: control blocks, run queues, and the scheduler.

pub mod list;
pub mod scheduler;
pub mod tcb;

pub use tcb::{current, InitialFrame, Pid, Task, TaskStatus};

#[cfg(test)]
pub(crate) mod test_util {
    use super::tcb::Task;
    use crate::config::PAGE_SIZE;
    use alloc::boxed::Box;
    use core::mem::size_of;

    /// Serializes tests that touch the global scheduler state or the
    /// host-side current-task slot.
    static SCHED_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Take the scheduler test lock, surviving poisoning from
    /// `should_panic` tests.
    pub fn sched_lock() -> std::sync::MutexGuard<'static, ()> {
        SCHED_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A TCB page that is never freed. Tests that deliberately panic while
    /// their task is linked into a global list use this so the list never
    /// holds a dangling tag.
    pub fn leaked_task() -> &'static mut Task {
        let page = Box::leak(Box::new(RawPage([0; PAGE_SIZE])));
        let task_ptr = page.0.as_mut_ptr() as *mut Task;
        // SAFETY: leaked, page-aligned, exclusively ours.
        unsafe {
            task_ptr.write(Task::empty());
            &mut *task_ptr
        }
    }

    #[repr(C, align(4096))]
    pub struct RawPage([u8; PAGE_SIZE]);

    /// A heap-backed stand-in for a TCB page: 4 KiB, page-aligned, with a
    /// blank control block written at its base.
    pub struct TcbPage(Box<RawPage>);

    impl TcbPage {
        pub fn new() -> Self {
            assert!(size_of::<Task>() < PAGE_SIZE);
            let mut page = Box::new(RawPage([0; PAGE_SIZE]));
            let task_ptr = page.0.as_mut_ptr() as *mut Task;
            // SAFETY: the buffer is page-sized, aligned, and exclusively ours.
            unsafe { task_ptr.write(Task::empty()) };
            TcbPage(page)
        }

        pub fn task_mut(&mut self) -> &mut Task {
            // SAFETY: new() initialized a Task at the page base.
            unsafe { &mut *(self.0 .0.as_mut_ptr() as *mut Task) }
        }
    }
}
