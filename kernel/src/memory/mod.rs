//! Physical and virtual memory management.
//!
//! Page-granular allocation over two physical pools (kernel and user) plus
//! per-address-space virtual pools, all bitmap-backed. Page tables are
//! reached through the recursive self-map: the last page-directory entry
//! points at the directory itself, which makes every PDE and PTE
//! addressable at a fixed virtual location without auxiliary mappings.

pub mod bitmap;
pub mod page_dir;
pub mod pool;

pub use bitmap::Bitmap;
pub use page_dir::{create_page_dir, create_user_vaddr_pool, PageDirectory};
pub use pool::{
    addr_v2p, get_a_page, get_kernel_pages, init, pde_ptr, pte_ptr, PageFlags, PoolKind, VaddrPool,
};

use core::ptr::NonNull;

/// Number of per-process heap size classes (16 B .. 1 KiB, doubling).
pub const BLOCK_DESC_CNT: usize = 7;

/// Rounded-up size of the arena header at the front of each heap page.
const ARENA_HEADER_SIZE: u32 = 16;

/// A free heap block, threaded through the free memory itself.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// One size class of a process heap: block geometry plus the free list
/// head. The allocator living on top of these is outside the task core;
/// the core only guarantees each process gets its descriptors initialized
/// exactly once, before it first runs.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockDesc {
    pub block_size: u32,
    pub blocks_per_arena: u32,
    free_head: Option<NonNull<FreeBlock>>,
    free_count: u32,
}

impl BlockDesc {
    pub const fn empty() -> Self {
        BlockDesc {
            block_size: 0,
            blocks_per_arena: 0,
            free_head: None,
            free_count: 0,
        }
    }
}

/// Populate a process's size-class descriptors: 16, 32, ... 1024 bytes.
pub fn init_block_descs(descs: &mut [BlockDesc; BLOCK_DESC_CNT]) {
    let mut size = 16u32;
    for desc in descs.iter_mut() {
        desc.block_size = size;
        desc.blocks_per_arena = (crate::config::PAGE_SIZE as u32 - ARENA_HEADER_SIZE) / size;
        desc.free_head = None;
        desc.free_count = 0;
        size *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_desc_size_classes() {
        let mut descs = [BlockDesc::empty(); BLOCK_DESC_CNT];
        init_block_descs(&mut descs);

        let sizes: alloc::vec::Vec<u32> = descs.iter().map(|d| d.block_size).collect();
        assert_eq!(sizes, [16, 32, 64, 128, 256, 512, 1024]);

        // Counts shrink as blocks grow, and every arena fits in a page.
        for pair in descs.windows(2) {
            assert!(pair[0].blocks_per_arena > pair[1].blocks_per_arena);
        }
        for d in &descs {
            assert!(d.block_size * d.blocks_per_arena + ARENA_HEADER_SIZE <= 4096);
            assert!(d.free_head.is_none());
        }
    }
}
