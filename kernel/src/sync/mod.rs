//! Blocking synchronization primitives.
//!
//! Built directly on the scheduler: a task that cannot make progress is
//! parked on the primitive's wait queue and `block`ed; releasing wakes the
//! FIFO-oldest waiter through `unblock`. Short critical sections are
//! guarded by disabling interrupts, never by spinning.

pub mod lock;
pub mod semaphore;

pub use lock::Lock;
pub use semaphore::Semaphore;
