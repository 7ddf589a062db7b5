//! ELF32 parser and validator.
//!
//! Accepts exactly one shape of binary: little-endian ELF32 `ET_EXEC` for
//! i386, version 1. Anything else is a validation error, surfaced as −1
//! at the syscall boundary.

use core::mem::size_of;

/// ELF magic number: 0x7F 'E' 'L' 'F'.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 32-bit.
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: little endian.
pub const ELFDATA2LSB: u8 = 1;

/// ELF identification version.
pub const EV_CURRENT: u8 = 1;

/// ELF type: executable.
pub const ET_EXEC: u16 = 2;

/// Machine type: Intel 80386.
pub const EM_386: u16 = 3;

/// Program header type: loadable segment.
pub const PT_LOAD: u32 = 1;

/// Upper bound on program header count we will walk.
pub const MAX_PHNUM: u16 = 1024;

/// ELF32 file header (52 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct Elf32Header {
    /// Magic number and other info.
    pub e_ident: [u8; 16],
    /// Object file type.
    pub e_type: u16,
    /// Machine type.
    pub e_machine: u16,
    /// Object file version.
    pub e_version: u32,
    /// Entry point virtual address.
    pub e_entry: u32,
    /// Program header table file offset.
    pub e_phoff: u32,
    /// Section header table file offset.
    pub e_shoff: u32,
    /// Processor-specific flags.
    pub e_flags: u32,
    /// ELF header size.
    pub e_ehsize: u16,
    /// Program header table entry size.
    pub e_phentsize: u16,
    /// Program header table entry count.
    pub e_phnum: u16,
    /// Section header table entry size.
    pub e_shentsize: u16,
    /// Section header table entry count.
    pub e_shnum: u16,
    /// Section name string table index.
    pub e_shstrndx: u16,
}

/// ELF32 program header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct Elf32ProgramHeader {
    /// Segment type.
    pub p_type: u32,
    /// Segment file offset.
    pub p_offset: u32,
    /// Segment virtual address.
    pub p_vaddr: u32,
    /// Segment physical address (unused).
    pub p_paddr: u32,
    /// Segment size in file.
    pub p_filesz: u32,
    /// Segment size in memory.
    pub p_memsz: u32,
    /// Segment flags.
    pub p_flags: u32,
    /// Segment alignment.
    pub p_align: u32,
}

/// ELF validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// File too small to contain the structure being read.
    TooSmall,
    /// The identification bytes are not `\x7fELF\x01\x01\x01`.
    InvalidIdent,
    /// Not an `ET_EXEC` image.
    InvalidType,
    /// Not an i386 image.
    InvalidMachine,
    /// `e_version` is not 1.
    InvalidVersion,
    /// Program header entry size does not match ELF32.
    InvalidPhentsize,
    /// More program headers than the loader will walk.
    TooManyHeaders,
    /// Segment data extends beyond the file.
    SegmentOutOfBounds,
}

impl Elf32Header {
    /// Read a header from raw bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, ElfError> {
        if buf.len() < size_of::<Elf32Header>() {
            return Err(ElfError::TooSmall);
        }
        // SAFETY: length checked; the struct is repr(C, packed) plain data.
        Ok(unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const Elf32Header) })
    }

    /// Validate everything the loader relies on.
    pub fn validate(&self) -> Result<(), ElfError> {
        // Magic, class, encoding, ident version in one shot.
        let expected = [
            ELF_MAGIC[0],
            ELF_MAGIC[1],
            ELF_MAGIC[2],
            ELF_MAGIC[3],
            ELFCLASS32,
            ELFDATA2LSB,
            EV_CURRENT,
        ];
        if self.e_ident[..7] != expected {
            return Err(ElfError::InvalidIdent);
        }
        if self.e_type != ET_EXEC {
            return Err(ElfError::InvalidType);
        }
        if self.e_machine != EM_386 {
            return Err(ElfError::InvalidMachine);
        }
        if self.e_version != 1 {
            return Err(ElfError::InvalidVersion);
        }
        if self.e_phentsize as usize != size_of::<Elf32ProgramHeader>() {
            return Err(ElfError::InvalidPhentsize);
        }
        if self.e_phnum > MAX_PHNUM {
            return Err(ElfError::TooManyHeaders);
        }
        Ok(())
    }

    /// File offset of program header `idx`.
    pub fn phdr_offset(&self, idx: u16) -> u32 {
        self.e_phoff + idx as u32 * self.e_phentsize as u32
    }
}

impl Elf32ProgramHeader {
    /// Read a program header from raw bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, ElfError> {
        if buf.len() < size_of::<Elf32ProgramHeader>() {
            return Err(ElfError::TooSmall);
        }
        // SAFETY: length checked; the struct is repr(C, packed) plain data.
        Ok(unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const Elf32ProgramHeader) })
    }

    /// Check the segment's file extent against the file size.
    pub fn validate(&self, file_size: usize) -> Result<(), ElfError> {
        let end = self
            .p_offset
            .checked_add(self.p_filesz)
            .ok_or(ElfError::SegmentOutOfBounds)?;
        if end as usize > file_size {
            return Err(ElfError::SegmentOutOfBounds);
        }
        Ok(())
    }

    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}


#[cfg(test)]
mod tests {
    use super::test_images::minimal_elf;
    use super::*;

    #[test]
    fn test_struct_sizes_match_the_format() {
        assert_eq!(size_of::<Elf32Header>(), 52);
        assert_eq!(size_of::<Elf32ProgramHeader>(), 32);
    }

    #[test]
    fn test_parse_minimal_elf() {
        let elf = minimal_elf();
        let header = Elf32Header::parse(&elf).unwrap();
        header.validate().unwrap();

        let entry = header.e_entry;
        let phnum = header.e_phnum;
        assert_eq!(entry, 0x0804_8000);
        assert_eq!(phnum, 1);

        let ph = Elf32ProgramHeader::parse(&elf[header.phdr_offset(0) as usize..]).unwrap();
        assert!(ph.is_load());
        let vaddr = ph.p_vaddr;
        let filesz = ph.p_filesz;
        assert_eq!(vaddr, 0x0804_8000);
        assert_eq!(filesz, 16);
        ph.validate(elf.len()).unwrap();
    }

    #[test]
    fn test_x86_64_image_is_rejected() {
        let mut elf = minimal_elf();
        // e_machine = 0x3E (x86-64)
        elf[18..20].copy_from_slice(&0x3Eu16.to_le_bytes());
        let header = Elf32Header::parse(&elf).unwrap();
        assert_eq!(header.validate(), Err(ElfError::InvalidMachine));
    }

    #[test]
    fn test_corrupt_ident_is_rejected() {
        for byte in 0..7 {
            let mut elf = minimal_elf();
            elf[byte] ^= 0xFF;
            let header = Elf32Header::parse(&elf).unwrap();
            assert_eq!(header.validate(), Err(ElfError::InvalidIdent), "ident byte {byte}");
        }
    }

    #[test]
    fn test_shared_object_is_rejected() {
        let mut elf = minimal_elf();
        elf[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        let header = Elf32Header::parse(&elf).unwrap();
        assert_eq!(header.validate(), Err(ElfError::InvalidType));
    }

    #[test]
    fn test_wrong_phentsize_is_rejected() {
        let mut elf = minimal_elf();
        elf[42..44].copy_from_slice(&56u16.to_le_bytes()); // ELF64 size
        let header = Elf32Header::parse(&elf).unwrap();
        assert_eq!(header.validate(), Err(ElfError::InvalidPhentsize));
    }

    #[test]
    fn test_absurd_phnum_is_rejected() {
        let mut elf = minimal_elf();
        elf[44..46].copy_from_slice(&2000u16.to_le_bytes());
        let header = Elf32Header::parse(&elf).unwrap();
        assert_eq!(header.validate(), Err(ElfError::TooManyHeaders));
    }

    #[test]
    fn test_truncated_header() {
        let elf = [0x7F, b'E', b'L', b'F'];
        assert_eq!(Elf32Header::parse(&elf), Err(ElfError::TooSmall));
    }

    #[test]
    fn test_segment_beyond_file_is_rejected() {
        let elf = minimal_elf();
        let header = Elf32Header::parse(&elf).unwrap();
        let ph = Elf32ProgramHeader::parse(&elf[header.phdr_offset(0) as usize..]).unwrap();
        // Pretend the file were shorter than the segment extent.
        assert_eq!(ph.validate(90), Err(ElfError::SegmentOutOfBounds));
    }
}
