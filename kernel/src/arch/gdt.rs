//! GDT (Global Descriptor Table) and TSS initialization.
//!
//! The kernel runs in the flat model: code and data segments span the whole
//! 4 GiB address space and paging does the real protection work. The GDT
//! still matters for two things:
//! - Ring 3 descriptors (DPL 3 code/data) that user processes execute under
//! - the single TSS whose `esp0` tells the CPU which kernel stack to switch
//!   to on a Ring 3 → Ring 0 transition
//!
//! ## GDT Layout
//!
//! | Index | Byte Offset | Selector (RPL) | Description          |
//! |-------|-------------|----------------|----------------------|
//! |   0   |    0x00     |      —         | Null descriptor      |
//! |   1   |    0x08     |    0x08        | Kernel Code (Ring 0) |
//! |   2   |    0x10     |    0x10        | Kernel Data (Ring 0) |
//! |   3   |    0x18     |      —         | (unused)             |
//! |   4   |    0x20     |      —         | (unused)             |
//! |   5   |    0x28     |    0x28        | TSS (32-bit, avail)  |
//! |   6   |    0x30     |    0x33        | User Code (Ring 3)   |
//! |   7   |    0x38     |    0x3B        | User Data (Ring 3)   |
//!
//! There is exactly one TSS for the whole system. It is never used for
//! hardware task switching; only `ss0:esp0` (and `io_base`) are live.

use core::mem::size_of;

/// Kernel code segment selector (Ring 0).
pub const KERNEL_CS: u16 = 0x08;

/// Kernel data segment selector (Ring 0).
pub const KERNEL_DS: u16 = 0x10;

/// TSS selector. GDT index 5, RPL 0.
pub const TSS_SELECTOR: u16 = 0x28;

/// User code segment selector. GDT index 6, RPL 3 → (6 << 3) | 3 = 0x33.
pub const USER_CS: u16 = 0x33;

/// User data segment selector. GDT index 7, RPL 3 → (7 << 3) | 3 = 0x3B.
pub const USER_DS: u16 = 0x3B;

/// Number of GDT entries.
const GDT_ENTRIES: usize = 8;

// Access-byte bits (descriptor bits 40..47).
const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_DPL3: u8 = 3 << 5;
const ACCESS_CODE_OR_DATA: u8 = 1 << 4;
const ACCESS_EXECUTABLE: u8 = 1 << 3;
const ACCESS_READ_WRITE: u8 = 1 << 1;
/// 32-bit available TSS (system descriptor type 0b1001).
const ACCESS_TSS_32: u8 = 0x09;

// Flag-nibble bits (descriptor bits 52..55).
const FLAG_GRANULARITY_4K: u8 = 1 << 3;
const FLAG_SIZE_32: u8 = 1 << 2;

/// 32-bit Task State Segment.
///
/// Only `ss0`, `esp0` and `io_base` are ever consumed: the CPU reads
/// `ss0:esp0` on every privilege-raising interrupt, and `io_base` pointing
/// past the end of the segment disables the I/O permission bitmap.
#[repr(C, packed)]
pub struct TaskStateSegment {
    prev_task_link: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt_selector: u32,
    trap: u16,
    pub io_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        TaskStateSegment {
            prev_task_link: 0,
            esp0: 0,
            ss0: KERNEL_DS as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt_selector: 0,
            trap: 0,
            // No I/O bitmap: point past the segment limit.
            io_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

/// The single system-wide TSS.
///
/// Mutable static so the scheduler can rewrite `esp0` when switching in a
/// user task. All access goes through `addr_of_mut!` raw pointers.
static mut TSS: TaskStateSegment = TaskStateSegment::new();

/// The GDT itself. Entry 5 (TSS base) is patched in `init()` because the
/// TSS address is not a constant.
static mut GDT: [u64; GDT_ENTRIES] = [
    0,
    descriptor(0, 0xFFFFF, ACCESS_PRESENT | ACCESS_CODE_OR_DATA | ACCESS_EXECUTABLE | ACCESS_READ_WRITE, FLAG_GRANULARITY_4K | FLAG_SIZE_32),
    descriptor(0, 0xFFFFF, ACCESS_PRESENT | ACCESS_CODE_OR_DATA | ACCESS_READ_WRITE, FLAG_GRANULARITY_4K | FLAG_SIZE_32),
    0,
    0,
    0, // TSS descriptor, patched at init
    descriptor(0, 0xFFFFF, ACCESS_PRESENT | ACCESS_DPL3 | ACCESS_CODE_OR_DATA | ACCESS_EXECUTABLE | ACCESS_READ_WRITE, FLAG_GRANULARITY_4K | FLAG_SIZE_32),
    descriptor(0, 0xFFFFF, ACCESS_PRESENT | ACCESS_DPL3 | ACCESS_CODE_OR_DATA | ACCESS_READ_WRITE, FLAG_GRANULARITY_4K | FLAG_SIZE_32),
];

/// Pointer operand for `lgdt`.
#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// Encode a segment descriptor.
///
/// `limit` is in units selected by the granularity flag (bytes or 4 KiB
/// pages) and must fit in 20 bits.
const fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    (limit as u64 & 0xFFFF)
        | ((base as u64 & 0xFFFF) << 16)
        | (((base as u64 >> 16) & 0xFF) << 32)
        | ((access as u64) << 40)
        | (((limit as u64 >> 16) & 0xF) << 48)
        | ((flags as u64 & 0xF) << 52)
        | (((base as u64 >> 24) & 0xFF) << 56)
}

/// Initialize the GDT and load the task register.
///
/// Must be called exactly once, early in boot, before the first switch
/// into a user task. Patches the TSS descriptor (its base is only known
/// at runtime), loads the new GDT, reloads the segment registers, and
/// executes `ltr`.
#[cfg(target_arch = "x86")]
pub fn init() {
    unsafe {
        let tss_base = core::ptr::addr_of!(TSS) as u32;
        let tss_limit = (size_of::<TaskStateSegment>() - 1) as u32;
        let gdt = core::ptr::addr_of_mut!(GDT);
        (*gdt)[(TSS_SELECTOR >> 3) as usize] =
            descriptor(tss_base, tss_limit, ACCESS_PRESENT | ACCESS_TSS_32, 0);

        let ptr = DescriptorTablePointer {
            limit: (size_of::<[u64; GDT_ENTRIES]>() - 1) as u16,
            base: gdt as u32,
        };

        core::arch::asm!(
            "lgdt [{ptr}]",
            // Reload data segment registers from the new table.
            "mov ds, {sel:x}",
            "mov es, {sel:x}",
            "mov fs, {sel:x}",
            "mov ss, {sel:x}",
            // Reload CS with a far return.
            "push {cs}",
            "lea {scratch}, [2f]",
            "push {scratch}",
            "retf",
            "2:",
            ptr = in(reg) &ptr,
            sel = in(reg) KERNEL_DS as u32,
            cs = const KERNEL_CS as u32,
            scratch = out(reg) _,
        );

        core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR as u32, options(nostack));
    }

    log::info!("gdt: loaded, tr={:#x}", TSS_SELECTOR);
}

#[cfg(not(target_arch = "x86"))]
pub fn init() {}

/// Point `tss.esp0` at the given kernel stack top.
///
/// This is the only writer of the TSS. The scheduler calls it on every
/// switch into a task that owns a page directory, so that a Ring 3 → 0
/// transition lands on the incoming task's kernel stack.
pub fn update_esp0(kstack_top: u32) {
    unsafe {
        (*core::ptr::addr_of_mut!(TSS)).esp0 = kstack_top;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_values() {
        // TSS: GDT index 5, RPL 0 → 5 << 3 = 0x28
        assert_eq!(TSS_SELECTOR, 0x28);
        // User code: GDT index 6, RPL 3 → (6 << 3) | 3 = 0x33
        assert_eq!(USER_CS, 0x33);
        // User data: GDT index 7, RPL 3 → (7 << 3) | 3 = 0x3B
        assert_eq!(USER_DS, 0x3B);
    }

    #[test]
    fn test_segment_rpl() {
        assert_eq!(USER_CS & 0x3, 3);
        assert_eq!(USER_DS & 0x3, 3);
        assert_eq!(KERNEL_CS & 0x3, 0);
        assert_eq!(KERNEL_DS & 0x3, 0);
    }

    #[test]
    fn test_flat_descriptor_encoding() {
        // Well-known flat-model encodings.
        let kcode = descriptor(
            0,
            0xFFFFF,
            ACCESS_PRESENT | ACCESS_CODE_OR_DATA | ACCESS_EXECUTABLE | ACCESS_READ_WRITE,
            FLAG_GRANULARITY_4K | FLAG_SIZE_32,
        );
        let kdata = descriptor(
            0,
            0xFFFFF,
            ACCESS_PRESENT | ACCESS_CODE_OR_DATA | ACCESS_READ_WRITE,
            FLAG_GRANULARITY_4K | FLAG_SIZE_32,
        );
        assert_eq!(kcode, 0x00CF_9A00_0000_FFFF);
        assert_eq!(kdata, 0x00CF_9200_0000_FFFF);
    }

    #[test]
    fn test_user_descriptor_dpl() {
        let ucode = descriptor(
            0,
            0xFFFFF,
            ACCESS_PRESENT | ACCESS_DPL3 | ACCESS_CODE_OR_DATA | ACCESS_EXECUTABLE | ACCESS_READ_WRITE,
            FLAG_GRANULARITY_4K | FLAG_SIZE_32,
        );
        // DPL field (descriptor bits 45..46) must be 3.
        assert_eq!((ucode >> 45) & 0x3, 3);
        assert_eq!(ucode, 0x00CF_FA00_0000_FFFF);
    }

    #[test]
    fn test_tss_descriptor_encoding() {
        // TSS at an arbitrary base, byte granularity.
        let d = descriptor(0x0012_3456, 103, ACCESS_PRESENT | ACCESS_TSS_32, 0);
        assert_eq!(d & 0xFFFF, 103); // limit low
        assert_eq!((d >> 16) & 0xFFFF, 0x3456); // base low
        assert_eq!((d >> 32) & 0xFF, 0x12); // base mid
        assert_eq!((d >> 40) & 0xFF, 0x89); // present | type 9
        assert_eq!((d >> 56) & 0xFF, 0x00); // base high
    }

    #[test]
    fn test_tss_layout() {
        // The hardware format is exactly 104 bytes.
        assert_eq!(size_of::<TaskStateSegment>(), 104);
        assert_eq!(core::mem::offset_of!(TaskStateSegment, esp0), 4);
        assert_eq!(core::mem::offset_of!(TaskStateSegment, ss0), 8);
        assert_eq!(core::mem::offset_of!(TaskStateSegment, io_base), 102);
    }

    #[test]
    fn test_tss_defaults() {
        let tss = TaskStateSegment::new();
        let ss0 = tss.ss0;
        let io_base = tss.io_base;
        assert_eq!(ss0, KERNEL_DS as u32);
        // io_base == segment size ⇒ no I/O permission bitmap.
        assert_eq!(io_base as usize, size_of::<TaskStateSegment>());
    }
}
