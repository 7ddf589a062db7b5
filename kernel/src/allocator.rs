//! Kernel heap allocator.
//!
//! A linked-list allocator over a window reserved inside the kernel
//! image. The task core never touches it (TCBs and page tables come from
//! the page pools); the ramdisk registry and the loader's staging
//! buffers live here.

use linked_list_allocator::LockedHeap;

use crate::config::KERNEL_HEAP_SIZE;

/// Global heap allocator. Host test builds use the platform allocator
/// instead.
#[cfg_attr(not(test), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Backing storage, reserved in .bss.
static mut HEAP_SPACE: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

/// Hand the heap window to the allocator. Must run before the first
/// `alloc` use and exactly once.
pub fn init() {
    // SAFETY: HEAP_SPACE is reserved for exactly this and handed over
    // once.
    unsafe {
        ALLOCATOR
            .lock()
            .init(core::ptr::addr_of_mut!(HEAP_SPACE) as *mut u8, KERNEL_HEAP_SIZE);
    }
    log::info!("heap: {} KiB online", KERNEL_HEAP_SIZE / 1024);
}
