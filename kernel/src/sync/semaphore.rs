//! Counting semaphore.
//!
//! The waiter queue is intrusive: a blocked task is parked on the
//! semaphore through its `ready_tag`, which is free while the task is off
//! the ready list. Down and up bodies run with interrupts disabled, which
//! on a single CPU is the whole mutual-exclusion story.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::arch::cpu::IntrState;
use crate::task::list::TagList;
use crate::task::scheduler;
use crate::task::tcb::{current, Task, TaskStatus};

struct SemaState {
    /// Remaining capacity. If `value > 0` the wait queue is empty.
    value: u8,
    /// Tasks blocked on this semaphore, FIFO.
    waiters: TagList,
}

/// A counting semaphore.
pub struct Semaphore {
    state: UnsafeCell<SemaState>,
}

// SAFETY: single CPU; the state is only touched with interrupts disabled.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(value: u8) -> Self {
        Semaphore {
            state: UnsafeCell::new(SemaState {
                value,
                waiters: TagList::new(),
            }),
        }
    }

    /// P operation: take one unit, blocking while none are available.
    ///
    /// The re-check loop (rather than a single `if`) is what makes a
    /// spurious wake-up harmless: a woken task that loses the race for the
    /// unit simply parks itself again.
    pub fn down(&self) {
        let istate = IntrState::off();
        loop {
            // SAFETY: interrupts are off; no other accessor exists.
            let state = unsafe { &mut *self.state.get() };
            if state.value > 0 {
                state.value -= 1;
                break;
            }

            let mut cur = current();
            // SAFETY: the current TCB page is live.
            let task = unsafe { cur.as_mut() };
            if state.waiters.contains(&task.ready_tag) {
                panic!("semaphore: pid {} is already waiting", task.pid());
            }
            // SAFETY: a task about to block is on no other queue, so its
            // ready_tag is free to park here.
            unsafe { state.waiters.push_back(NonNull::from(&mut task.ready_tag)) };

            // Gives up the CPU; returns once somebody ups the semaphore.
            // The interrupt flag is still off when block returns.
            scheduler::block(TaskStatus::Blocked);
        }
        istate.restore();
    }

    /// V operation: return one unit, waking the oldest waiter if any.
    pub fn up(&self) {
        let istate = IntrState::off();
        // SAFETY: interrupts are off; no other accessor exists.
        let state = unsafe { &mut *self.state.get() };

        // SAFETY: every parked tag belongs to a live blocked task.
        if let Some(tag) = unsafe { state.waiters.pop_front() } {
            let waiter = unsafe { Task::from_ready_tag(tag) };
            scheduler::unblock(waiter);
        }

        assert!(state.value < u8::MAX, "semaphore: value overflow");
        state.value += 1;
        istate.restore();
    }

    /// Current value. Snapshot for assertions and diagnostics.
    pub fn value(&self) -> u8 {
        let istate = IntrState::off();
        // SAFETY: interrupts are off; no other accessor exists.
        let value = unsafe { &*self.state.get() }.value;
        istate.restore();
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_util::{sched_lock, TcbPage};

    #[test]
    fn test_down_up_restores_value() {
        let sema = Semaphore::new(1);
        sema.down();
        assert_eq!(sema.value(), 0);
        sema.up();
        assert_eq!(sema.value(), 1);
    }

    #[test]
    fn test_counting_semaphore_counts() {
        let sema = Semaphore::new(3);
        sema.down();
        sema.down();
        assert_eq!(sema.value(), 1);
        sema.up();
        assert_eq!(sema.value(), 2);
    }

    #[test]
    fn test_up_with_waiter_wakes_it_first() {
        let _guard = sched_lock();

        let sema = Semaphore::new(0);
        let mut page = TcbPage::new();
        let task = page.task_mut();
        task.init("waiter", 5);
        task.status = TaskStatus::Blocked;

        // Park the task by hand, as down() would have before blocking.
        {
            // SAFETY: test-local task, no other queue holds its tag.
            let state = unsafe { &mut *sema.state.get() };
            unsafe { state.waiters.push_back(NonNull::from(&mut task.ready_tag)) };
        }

        sema.up();
        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(sema.value(), 1);
        // value > 0 ⇒ waiters drained
        let state = unsafe { &*sema.state.get() };
        assert!(state.waiters.is_empty());

        // Drop the ready-list entry unblock created.
        crate::task::scheduler::schedule_test_reset();
    }
}
