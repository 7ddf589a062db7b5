//! Page pools and page-table plumbing.
//!
//! Physical memory above the kernel image is split into a kernel pool and
//! a user pool, each fronted by a bitmap. Virtual allocation is a separate
//! bitmap per address space: one static pool for kernel virtual space,
//! and one [`VaddrPool`] owned by each process for the user range.
//!
//! All page-table access goes through the recursive self-map. With the
//! page directory's last entry pointing at itself, the directory appears
//! at `0xFFFFF000` and every page table at `0xFFC00000 + pde_index(v) * 4096`,
//! in whatever address space is currently loaded.

use bitflags::bitflags;
use spin::Mutex;

use crate::config::{
    KERNEL_VADDR_START, MEM_BITMAP_BASE, PAGE_SIZE, USER_STACK_TOP, USER_VADDR_START,
};
use crate::memory::Bitmap;

bitflags! {
    /// x86 page-table entry bits the kernel sets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

/// Which physical pool (and which virtual pool) an allocation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Kernel,
    User,
}

/// Physical memory assumed consumed before the pools begin: the low
/// megabyte plus the kernel image and its boot page tables.
const RESERVED_PHYS: u32 = 0x0020_0000;

/// A bitmap-fronted physical page pool.
pub struct PhysPool {
    bitmap: Bitmap,
    phys_start: u32,
}

impl PhysPool {
    /// Allocate one physical page.
    fn alloc_page(&mut self) -> Option<u32> {
        let idx = self.bitmap.alloc(1)?;
        Some(self.phys_start + (idx * PAGE_SIZE) as u32)
    }

    /// Return a page to the pool.
    fn free_page(&mut self, paddr: u32) {
        let idx = (paddr - self.phys_start) as usize / PAGE_SIZE;
        self.bitmap.free(idx, 1);
    }
}

/// A virtual-address window with one allocation bit per page.
pub struct VaddrPool {
    bitmap: Bitmap,
    vaddr_start: u32,
}

impl VaddrPool {
    /// Wrap a raw bitmap buffer as a virtual pool starting at `vaddr_start`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Bitmap::from_raw`]; the buffer must outlive the
    /// pool.
    pub unsafe fn from_raw(bits: *mut u8, len_bytes: usize, vaddr_start: u32) -> Self {
        VaddrPool {
            // SAFETY: forwarded caller contract.
            bitmap: unsafe { Bitmap::from_raw(bits, len_bytes) },
            vaddr_start,
        }
    }

    /// Reserve `cnt` consecutive pages anywhere in the window.
    pub fn alloc(&mut self, cnt: usize) -> Option<u32> {
        let idx = self.bitmap.alloc(cnt)?;
        Some(self.vaddr_start + (idx * PAGE_SIZE) as u32)
    }

    /// Reserve the page containing a fixed address.
    ///
    /// Panics if the page is already reserved: callers check the page
    /// tables first, so a taken bit here means corrupted bookkeeping.
    pub fn mark_fixed(&mut self, vaddr: u32) {
        let idx = self.page_index(vaddr);
        assert!(!self.bitmap.test(idx), "vaddr pool: page already allocated");
        self.bitmap.set(idx, true);
    }

    pub fn is_allocated(&self, vaddr: u32) -> bool {
        self.bitmap.test(self.page_index(vaddr))
    }

    fn page_index(&self, vaddr: u32) -> usize {
        assert!(vaddr >= self.vaddr_start, "vaddr pool: address below window");
        (vaddr - self.vaddr_start) as usize / PAGE_SIZE
    }
}

static KERNEL_POOL: Mutex<Option<PhysPool>> = Mutex::new(None);
static USER_POOL: Mutex<Option<PhysPool>> = Mutex::new(None);
static KERNEL_VADDR_POOL: Mutex<Option<VaddrPool>> = Mutex::new(None);

/// Carve the physical pools and the kernel virtual pool out of the memory
/// the platform reports. Bitmaps live at a fixed kernel virtual base the
/// boot mapping already covers.
pub fn init(total_memory: u32) {
    let free = total_memory.saturating_sub(RESERVED_PHYS);
    let free_pages = free as usize / PAGE_SIZE;
    let kernel_pages = free_pages / 2;
    let user_pages = free_pages - kernel_pages;

    let kernel_bm_len = kernel_pages / 8;
    let user_bm_len = user_pages / 8;

    let kernel_bm = MEM_BITMAP_BASE as *mut u8;
    let user_bm = (MEM_BITMAP_BASE as usize + kernel_bm_len) as *mut u8;
    let kvaddr_bm = (MEM_BITMAP_BASE as usize + kernel_bm_len + user_bm_len) as *mut u8;

    // SAFETY: the bitmap window is kernel-reserved and mapped by boot;
    // init runs once, before any allocation.
    unsafe {
        let mut kp = PhysPool {
            bitmap: Bitmap::from_raw(kernel_bm, kernel_bm_len),
            phys_start: RESERVED_PHYS,
        };
        kp.bitmap.reset();

        let mut up = PhysPool {
            bitmap: Bitmap::from_raw(user_bm, user_bm_len),
            phys_start: RESERVED_PHYS + (kernel_pages * PAGE_SIZE) as u32,
        };
        up.bitmap.reset();

        let mut kv = VaddrPool::from_raw(kvaddr_bm, kernel_bm_len, KERNEL_VADDR_START);
        kv.bitmap.reset();

        *KERNEL_POOL.lock() = Some(kp);
        *USER_POOL.lock() = Some(up);
        *KERNEL_VADDR_POOL.lock() = Some(kv);
    }

    log::info!(
        "memory: pools online, kernel {} KiB / user {} KiB",
        kernel_pages * PAGE_SIZE / 1024,
        user_pages * PAGE_SIZE / 1024
    );
}

/// Page-directory index of a virtual address (top 10 bits).
pub const fn pde_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

/// Page-table index of a virtual address (middle 10 bits).
pub const fn pte_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3FF) as usize
}

/// Virtual address of the PDE mapping `vaddr`, via the self-map.
pub const fn pde_ptr(vaddr: u32) -> *mut u32 {
    (0xFFFF_F000u32 + (pde_index(vaddr) as u32) * 4) as *mut u32
}

/// Virtual address of the PTE mapping `vaddr`, via the self-map.
pub const fn pte_ptr(vaddr: u32) -> *mut u32 {
    (0xFFC0_0000u32 + ((vaddr & 0xFFC0_0000) >> 10) + (pte_index(vaddr) as u32) * 4) as *mut u32
}

/// Translate a mapped kernel virtual address to its physical address.
pub fn addr_v2p(vaddr: u32) -> u32 {
    // SAFETY: the self-map makes the PTE addressable; presence asserted.
    let pte = unsafe { *pte_ptr(vaddr) };
    assert!(
        pte & PageFlags::PRESENT.bits() != 0,
        "v2p: address {vaddr:#x} is not mapped"
    );
    (pte & 0xFFFF_F000) | (vaddr & 0xFFF)
}

/// Install `paddr` at `vaddr` in the current page directory.
///
/// Allocates (from the kernel pool) and zeroes an intermediate page table
/// if the covering PDE is absent.
///
/// # Safety
///
/// Must run with paging and the self-map live; `vaddr` must not already
/// be mapped.
unsafe fn page_table_add(vaddr: u32, paddr: u32, flags: PageFlags) {
    let pde = pde_ptr(vaddr);
    let pte = pte_ptr(vaddr);
    let entry_flags = (flags | PageFlags::PRESENT).bits();

    // SAFETY: self-map addresses, valid while paging is on.
    unsafe {
        if *pde & PageFlags::PRESENT.bits() == 0 {
            let table_phys = KERNEL_POOL
                .lock()
                .as_mut()
                .and_then(PhysPool::alloc_page)
                .expect("page_table_add: out of kernel pages for page table");
            // Intermediate tables carry the weakest restrictions; the
            // leaf PTE decides the real permissions.
            *pde = table_phys
                | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits();

            // The new table is now visible through the self-map; zero it.
            let table_base = (pte as usize & !(PAGE_SIZE - 1)) as *mut u8;
            core::ptr::write_bytes(table_base, 0, PAGE_SIZE);
        }

        assert!(
            *pte & PageFlags::PRESENT.bits() == 0,
            "page_table_add: {vaddr:#x} already mapped"
        );
        *pte = (paddr & 0xFFFF_F000) | entry_flags;
    }
}

/// Allocate `cnt` zeroed, virtually contiguous kernel pages.
///
/// This is the allocator everything page-sized in the kernel uses: TCB
/// pages, page directories, bitmap backings. Returns `None` when either
/// the virtual window or the physical pool is exhausted.
pub fn get_kernel_pages(cnt: usize) -> Option<u32> {
    let vaddr = KERNEL_VADDR_POOL.lock().as_mut()?.alloc(cnt)?;

    let mut page = vaddr;
    for _ in 0..cnt {
        let paddr = KERNEL_POOL.lock().as_mut()?.alloc_page()?;
        // SAFETY: the virtual range was just reserved and is unmapped.
        unsafe { page_table_add(page, paddr, PageFlags::WRITABLE) };
        page += PAGE_SIZE as u32;
    }

    // SAFETY: the whole range is mapped writable now.
    unsafe { core::ptr::write_bytes(vaddr as usize as *mut u8, 0, cnt * PAGE_SIZE) };
    Some(vaddr)
}

/// Map one zeroed page at a fixed virtual address in the current address
/// space.
///
/// Kernel allocations mark the static kernel virtual pool; user
/// allocations mark the current process's own pool and get the user bit.
pub fn get_a_page(kind: PoolKind, vaddr: u32) -> Option<u32> {
    match kind {
        PoolKind::Kernel => {
            KERNEL_VADDR_POOL.lock().as_mut()?.mark_fixed(vaddr);
            let paddr = KERNEL_POOL.lock().as_mut()?.alloc_page()?;
            // SAFETY: page checked absent by the caller's contract.
            unsafe { page_table_add(vaddr, paddr, PageFlags::WRITABLE) };
        }
        PoolKind::User => {
            assert!(
                (USER_VADDR_START..USER_STACK_TOP).contains(&vaddr),
                "get_a_page: {vaddr:#x} outside the user window"
            );
            {
                let mut cur = crate::task::current();
                // SAFETY: the current TCB page is live.
                let task = unsafe { cur.as_mut() };
                task.user_vaddr_pool
                    .as_mut()
                    .expect("get_a_page: user pool on a kernel thread")
                    .mark_fixed(vaddr);
            }
            let paddr = USER_POOL.lock().as_mut()?.alloc_page()?;
            // SAFETY: page checked absent by the caller's contract.
            unsafe { page_table_add(vaddr, paddr, PageFlags::WRITABLE | PageFlags::USER) };
        }
    }

    // SAFETY: just mapped writable in the current address space.
    unsafe { core::ptr::write_bytes(vaddr as usize as *mut u8, 0, PAGE_SIZE) };
    Some(vaddr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_page_table_indices() {
        assert_eq!(pde_index(0xC000_0000), 768);
        assert_eq!(pde_index(0x0804_8000), 32);
        assert_eq!(pte_index(0x0804_8000), 72);
        assert_eq!(pte_index(0xC010_1000), 257);
    }

    #[test]
    fn test_self_map_addresses() {
        // PDE array lives in the last page of virtual memory.
        assert_eq!(pde_ptr(0xC000_0000) as usize, 0xFFFF_FC00);
        assert_eq!(pde_ptr(0) as usize, 0xFFFF_F000);
        // Page table for the kernel base: window 0xFFC00000 + 768 * 4 KiB.
        assert_eq!(pte_ptr(0xC000_0000) as usize, 0xFFF0_0000);
        assert_eq!(pte_ptr(0xC000_1000) as usize, 0xFFF0_0004);
    }

    #[test]
    fn test_phys_pool_hands_out_distinct_pages() {
        let mut buf = vec![0u8; 2];
        let mut pool = PhysPool {
            bitmap: unsafe { Bitmap::from_raw(buf.as_mut_ptr(), 2) },
            phys_start: 0x0020_0000,
        };

        let a = pool.alloc_page().unwrap();
        let b = pool.alloc_page().unwrap();
        assert_eq!(a, 0x0020_0000);
        assert_eq!(b, 0x0020_1000);

        pool.free_page(a);
        assert_eq!(pool.alloc_page(), Some(a));
    }

    #[test]
    fn test_vaddr_pool_window() {
        let mut buf = vec![0u8; 4];
        let mut pool =
            unsafe { VaddrPool::from_raw(buf.as_mut_ptr(), 4, USER_VADDR_START) };

        let first = pool.alloc(2).unwrap();
        assert_eq!(first, USER_VADDR_START);
        let second = pool.alloc(1).unwrap();
        assert_eq!(second, USER_VADDR_START + 2 * PAGE_SIZE as u32);

        assert!(pool.is_allocated(USER_VADDR_START));
        assert!(!pool.is_allocated(USER_VADDR_START + 3 * PAGE_SIZE as u32));
    }

    #[test]
    fn test_mark_fixed_reserves_one_page() {
        let mut buf = vec![0u8; 4];
        let mut pool =
            unsafe { VaddrPool::from_raw(buf.as_mut_ptr(), 4, USER_VADDR_START) };

        let stack_page = USER_VADDR_START + 5 * PAGE_SIZE as u32;
        pool.mark_fixed(stack_page);
        assert!(pool.is_allocated(stack_page));
        // Offsets within the page hit the same bit.
        assert!(pool.is_allocated(stack_page + 0xFFF));
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn test_mark_fixed_twice_panics() {
        let mut buf = vec![0u8; 4];
        let mut pool =
            unsafe { VaddrPool::from_raw(buf.as_mut_ptr(), 4, USER_VADDR_START) };
        pool.mark_fixed(USER_VADDR_START);
        pool.mark_fixed(USER_VADDR_START);
    }
}
