//! Recursive mutex.
//!
//! A binary semaphore with an owner and a depth counter on top. The owner
//! may re-acquire freely; the lock is released for real only when the
//! depth drops back to zero. Console output is the main customer: a task
//! holding the console lock can print from nested call paths without
//! deadlocking itself.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::sync::Semaphore;
use crate::task::tcb::{current, Task};

struct LockState {
    /// The task currently holding the lock, if any.
    holder: Option<NonNull<Task>>,
    /// Re-acquisition depth; `>= 1` exactly while `holder` is set.
    depth: u32,
}

/// A recursive mutex.
pub struct Lock {
    state: UnsafeCell<LockState>,
    /// Binary semaphore carrying the actual blocking.
    sema: Semaphore,
}

// SAFETY: single CPU; holder/depth are only written by the task that owns
// (or is taking) the lock, and contended transitions serialize through the
// semaphore.
unsafe impl Sync for Lock {}

impl Lock {
    pub const fn new() -> Self {
        Lock {
            state: UnsafeCell::new(LockState {
                holder: None,
                depth: 0,
            }),
            sema: Semaphore::new(1),
        }
    }

    /// Acquire the lock, blocking if another task holds it.
    ///
    /// Re-acquisition by the holder just bumps the depth.
    pub fn acquire(&self) {
        let me = current();
        // SAFETY: reading holder races only with ourselves; another task
        // can never store *our* pointer there.
        let state = unsafe { &mut *self.state.get() };
        if state.holder == Some(me) {
            state.depth += 1;
            return;
        }

        self.sema.down();
        // We own the semaphore's single unit now.
        state.holder = Some(me);
        assert_eq!(state.depth, 0, "lock: fresh acquire found nonzero depth");
        state.depth = 1;
    }

    /// Release one level of the lock.
    ///
    /// Only the holder may release; the final release hands the semaphore
    /// unit to the oldest blocked acquirer.
    pub fn release(&self) {
        let me = current();
        // SAFETY: only the holder reaches the mutation below (asserted).
        let state = unsafe { &mut *self.state.get() };
        assert!(
            state.holder == Some(me),
            "lock: release by non-holder"
        );

        if state.depth > 1 {
            state.depth -= 1;
            return;
        }

        assert_eq!(state.depth, 1, "lock: held with zero depth");
        state.holder = None;
        state.depth = 0;
        self.sema.up();
    }

    /// Whether the calling task currently holds the lock.
    pub fn held_by_current(&self) -> bool {
        // SAFETY: see acquire().
        unsafe { &*self.state.get() }.holder == Some(current())
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_util::{sched_lock, TcbPage};
    use crate::task::tcb::set_current;

    #[test]
    fn test_recursive_acquire_nests_and_unwinds() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("owner", 5);
        set_current(Some(NonNull::from(&mut *task)));

        let lock = Lock::new();
        lock.acquire();
        lock.acquire();
        lock.acquire();

        let depths = {
            let state = unsafe { &*lock.state.get() };
            assert!(lock.held_by_current());
            state.depth
        };
        assert_eq!(depths, 3);

        lock.release();
        assert_eq!(unsafe { &*lock.state.get() }.depth, 2);
        lock.release();
        assert_eq!(unsafe { &*lock.state.get() }.depth, 1);
        lock.release();

        let state = unsafe { &*lock.state.get() };
        assert_eq!(state.depth, 0);
        assert!(state.holder.is_none());
        // Free lock ⇔ semaphore back at 1.
        assert_eq!(lock.sema.value(), 1);

        set_current(None);
    }

    #[test]
    fn test_holder_iff_sema_taken() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("owner", 5);
        set_current(Some(NonNull::from(&mut *task)));

        let lock = Lock::new();
        assert_eq!(lock.sema.value(), 1);

        lock.acquire();
        let state = unsafe { &*lock.state.get() };
        assert!(state.holder.is_some());
        assert_eq!(lock.sema.value(), 0);

        lock.release();
        set_current(None);
    }

    #[test]
    #[should_panic(expected = "release by non-holder")]
    fn test_release_without_acquire_panics() {
        let _guard = sched_lock();
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("thief", 5);
        set_current(Some(NonNull::from(&mut *task)));

        let lock = Lock::new();
        lock.release();
    }
}
