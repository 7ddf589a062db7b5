//! Per-process address-space construction.
//!
//! Every process owns a page directory whose upper quarter aliases the
//! kernel's master directory, so the kernel is mapped identically in
//! every address space and a context switch never unmaps the code that
//! performs it. The last entry self-maps the directory, which is what the
//! [`pde_ptr`](crate::memory::pde_ptr)/[`pte_ptr`](crate::memory::pte_ptr)
//! accessors rely on.

use core::ptr::NonNull;

use crate::config::{PAGE_SIZE, USER_STACK_TOP, USER_VADDR_START};
use crate::memory::pool::{self, VaddrPool};

/// A 32-bit page directory: 1024 entries covering 4 GiB.
pub type PageDirectory = [u32; 1024];

/// First directory index of the kernel half (0xC0000000 >> 22).
pub const PD_KERNEL_FIRST: usize = 768;

/// Index of the recursive self-map entry.
pub const PD_SELF_MAP: usize = 1023;

/// Self-map entry bits: present, writable, user.
const SELF_MAP_FLAGS: u32 = 0x7;

/// Copy the kernel mappings (entries 768..=1023) from `src` into `dst`.
pub fn clone_kernel_half(dst: &mut PageDirectory, src: &PageDirectory) {
    dst[PD_KERNEL_FIRST..].copy_from_slice(&src[PD_KERNEL_FIRST..]);
}

/// Point `dst`'s last entry at its own physical frame.
pub fn install_self_map(dst: &mut PageDirectory, pd_phys: u32) {
    dst[PD_SELF_MAP] = (pd_phys & 0xFFFF_F000) | SELF_MAP_FLAGS;
}

/// Build a fresh process page directory.
///
/// One zeroed kernel page: user half empty, kernel half cloned from the
/// directory that is currently live (whose kernel half is by invariant the
/// master's), self-map installed last. Returns the directory's kernel
/// virtual address.
pub fn create_page_dir() -> Option<NonNull<PageDirectory>> {
    let vaddr = pool::get_kernel_pages(1)?;
    let pd = vaddr as usize as *mut PageDirectory;

    // The live directory is always visible at the self-map window.
    let current_pd = 0xFFFF_F000usize as *const PageDirectory;

    // SAFETY: `pd` is a private zeroed page; the self-map window is valid
    // whenever paging is on.
    unsafe {
        clone_kernel_half(&mut *pd, &*current_pd);
        let pd_phys = pool::addr_v2p(vaddr);
        install_self_map(&mut *pd, pd_phys);
    }

    NonNull::new(pd)
}

/// Bytes of bitmap needed to track the whole user virtual window.
pub const fn user_bitmap_len() -> usize {
    (USER_STACK_TOP - USER_VADDR_START) as usize / PAGE_SIZE / 8
}

/// Pages of kernel memory backing one user vaddr bitmap.
pub const fn user_bitmap_pages() -> usize {
    user_bitmap_len().div_ceil(PAGE_SIZE)
}

/// Build the user virtual-address pool for a new process.
///
/// The bitmap covers `[USER_VADDR_START, USER_STACK_TOP)` at a bit per
/// page and is backed by zeroed kernel pages owned by the process for its
/// lifetime.
pub fn create_user_vaddr_pool() -> Option<VaddrPool> {
    let buf = pool::get_kernel_pages(user_bitmap_pages())?;
    // SAFETY: freshly allocated zeroed pages, exclusively this pool's.
    Some(unsafe {
        VaddrPool::from_raw(buf as usize as *mut u8, user_bitmap_len(), USER_VADDR_START)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test]
    fn test_kernel_half_is_cloned_verbatim() {
        let mut master: Box<PageDirectory> = Box::new([0; 1024]);
        for (i, entry) in master.iter_mut().enumerate() {
            *entry = (i as u32) << 12 | 0x3;
        }

        let mut fresh: Box<PageDirectory> = Box::new([0; 1024]);
        clone_kernel_half(&mut fresh, &master);

        assert_eq!(&fresh[768..], &master[768..]);
        // User half untouched.
        assert!(fresh[..768].iter().all(|&e| e == 0));
    }

    #[test]
    fn test_self_map_overrides_cloned_tail() {
        let mut master: Box<PageDirectory> = Box::new([0x1111_1003; 1024]);
        let mut fresh: Box<PageDirectory> = Box::new([0; 1024]);

        clone_kernel_half(&mut fresh, &master);
        install_self_map(&mut fresh, 0x0030_4000);

        // Entries 768..1023 mirror the master; 1023 points home.
        assert_eq!(&fresh[768..1023], &master[768..1023]);
        assert_eq!(fresh[PD_SELF_MAP], 0x0030_4007);
    }

    #[test]
    fn test_self_map_flags() {
        let mut pd: Box<PageDirectory> = Box::new([0; 1024]);
        install_self_map(&mut pd, 0xABCD_E123);
        // Physical address is page-truncated; P|RW|US set.
        assert_eq!(pd[PD_SELF_MAP], 0xABCD_E007);
    }

    #[test]
    fn test_user_bitmap_geometry() {
        // (0xC0000000 - 0x08048000) / 4096 / 8 bytes of bitmap.
        assert_eq!(user_bitmap_len(), 0xB7FB_8000usize / 4096 / 8);
        assert_eq!(user_bitmap_len(), 94_199);
        // Rounded up to whole kernel pages.
        assert_eq!(user_bitmap_pages(), 23);
    }
}
