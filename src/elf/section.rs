use crate::error::{Error, Result};

use super::cursor::Reader;
use super::header::{ElfClass, ElfHeader};
use super::string_table::StringTable;

pub const SHN_XINDEX: u16 = 0xffff;
pub const SHT_NOBITS: u32 = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionHeader {
    /// Offset of the section name in the section-name string table.
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_entsize: u64,
}

impl SectionHeader {
    /// `SHT_NOBITS` sections occupy no bytes in the file.
    #[inline(always)]
    pub const fn has_file_data(&self) -> bool {
        self.sh_type != SHT_NOBITS
    }

    pub const fn entry_size(class: ElfClass) -> usize {
        match class {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }

    fn read(reader: &Reader<'_>, offset: usize, class: ElfClass) -> Result<Self> {
        Ok(match class {
            ElfClass::Elf32 => SectionHeader {
                sh_name: reader.u32(offset)?,
                sh_type: reader.u32(offset + 4)?,
                sh_offset: reader.u32(offset + 16)?.into(),
                sh_size: reader.u32(offset + 20)?.into(),
                sh_link: reader.u32(offset + 24)?,
                sh_entsize: reader.u32(offset + 36)?.into(),
            },
            ElfClass::Elf64 => SectionHeader {
                sh_name: reader.u32(offset)?,
                sh_type: reader.u32(offset + 4)?,
                sh_offset: reader.u64(offset + 24)?,
                sh_size: reader.u64(offset + 32)?,
                sh_link: reader.u32(offset + 40)?,
                sh_entsize: reader.u64(offset + 56)?,
            },
        })
    }
}

/// The section header table of an image together with its name table.
pub struct SectionTable<'data> {
    headers: Vec<SectionHeader>,
    names: StringTable<'data>,
}

impl<'data> SectionTable<'data> {
    /// Reads every section header and resolves the section-name string table.
    ///
    /// An image without a section header table (`e_shoff == 0`) yields an
    /// empty table rather than an error.
    pub fn parse(header: &ElfHeader, reader: &Reader<'data>) -> Result<Self> {
        if header.e_shoff == 0 {
            return Ok(Self {
                headers: Vec::new(),
                names: StringTable::empty(),
            });
        }

        let entry_size = usize::from(header.e_shentsize);
        if entry_size < SectionHeader::entry_size(header.class) {
            return Err(Error::malformed(format!(
                "e_shentsize {entry_size} is below {}",
                SectionHeader::entry_size(header.class)
            )));
        }
        let base = usize::try_from(header.e_shoff)
            .map_err(|_| Error::malformed("e_shoff does not fit in memory"))?;

        // Extended numbering: the real counts live in section zero.
        let first = SectionHeader::read(reader, base, header.class)?;
        let count = match header.e_shnum {
            0 => usize::try_from(first.sh_size)
                .map_err(|_| Error::malformed("extended section count overflows"))?,
            count => usize::from(count),
        };
        let name_index = match header.e_shstrndx {
            SHN_XINDEX => first.sh_link as usize,
            index => usize::from(index),
        };

        let table_size = count
            .checked_mul(entry_size)
            .ok_or_else(|| Error::malformed("section header table size overflows"))?;
        reader.bytes(base, table_size)?;

        let headers = (0..count)
            .map(|index| SectionHeader::read(reader, base + index * entry_size, header.class))
            .collect::<Result<Vec<_>>>()?;

        // Index 0 is SHN_UNDEF: no names, so no named sections will be found.
        let names = if name_index == 0 {
            StringTable::empty()
        } else {
            let names_header = headers.get(name_index).ok_or_else(|| {
                Error::malformed(format!(
                    "e_shstrndx {name_index} out of range ({count} sections)"
                ))
            })?;
            StringTable::new(reader.range(names_header.sh_offset, names_header.sh_size)?)
        };

        Ok(Self { headers, names })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    #[inline(always)]
    pub fn name_of(&self, section: &SectionHeader) -> &'data [u8] {
        self.names.get_bytes(section.sh_name as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionHeader> {
        self.headers.iter()
    }
}
