use crate::error::{Error, Result};

use super::cursor::{Endian, Reader};

pub const ET_NONE: u16 = 0;
pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const EM_386: u16 = 3;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

pub const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    /// Size of the ELF header for this class.
    pub const fn header_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }
}

/// The ELF header fields the resolver needs, decoded for the image's own
/// class and byte order rather than the host's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub endian: Endian,
    /// The Elf file type, see the ET_.* constants.
    pub e_type: u16,
    /// The target architecture, see the EM_.* constants.
    pub e_machine: u16,
    /// The virtual address to which the kernel or dynamic linker will jump when beginning execution.
    pub e_entry: u64,
    /// The offset into the file at which the section header table resides.
    pub e_shoff: u64,
    /// The size of each Elf section header table entry in bytes.
    pub e_shentsize: u16,
    /// The number of Elf section header table entries.
    pub e_shnum: u16,
    /// The index into the section header table at which the section name string table resides.
    pub e_shstrndx: u16,
}

impl ElfHeader {
    /// Decodes the identification bytes and header at the start of `data`.
    ///
    /// The returned reader covers all of `data` and uses the image's byte order.
    pub fn parse(data: &[u8]) -> Result<(Self, Reader<'_>)> {
        let ident = data
            .get(..16)
            .ok_or_else(|| Error::malformed("file is shorter than e_ident"))?;
        if ident[..4] != ELFMAG {
            return Err(Error::malformed("bad ELF magic"));
        }

        let class = match ident[EI_CLASS] {
            ELFCLASS32 => ElfClass::Elf32,
            ELFCLASS64 => ElfClass::Elf64,
            other => return Err(Error::malformed(format!("unknown ELF class {other}"))),
        };
        let endian = match ident[EI_DATA] {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            other => return Err(Error::malformed(format!("unknown ELF data encoding {other}"))),
        };

        let reader = Reader::new(data, endian);
        // Touch the last header byte up front so a truncated header fails as a whole.
        reader.bytes(0, class.header_size())?;

        let (entry_at, shoff_at, tail_at) = match class {
            ElfClass::Elf32 => (24, 32, 46),
            ElfClass::Elf64 => (24, 40, 58),
        };

        let header = ElfHeader {
            class,
            endian,
            e_type: reader.u16(16)?,
            e_machine: reader.u16(18)?,
            e_entry: reader.word(entry_at, class)?,
            e_shoff: reader.word(shoff_at, class)?,
            e_shentsize: reader.u16(tail_at)?,
            e_shnum: reader.u16(tail_at + 2)?,
            e_shstrndx: reader.u16(tail_at + 4)?,
        };
        Ok((header, reader))
    }

    /// Shared objects and PIEs carry link-time offsets that must be added to
    /// the runtime load base; only `ET_EXEC` images are fixed-address.
    #[inline(always)]
    pub const fn needs_relocation(&self) -> bool {
        self.e_type != ET_EXEC
    }
}
