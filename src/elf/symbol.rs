use crate::error::{Error, Result};

use super::cursor::Reader;
use super::header::ElfClass;
use super::string_table::StringTable;

pub const SHN_UNDEF: u16 = 0;

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolVisibility {
    Default = 0,
    Internal = 1,
    Hidden = 2,
    Protected = 3,
}

impl SymbolVisibility {
    #[inline(always)]
    pub const fn from_other(st_other: u8) -> Self {
        match st_other & 3 {
            0 => SymbolVisibility::Default,
            1 => SymbolVisibility::Internal,
            2 => SymbolVisibility::Hidden,
            _ => SymbolVisibility::Protected,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// String table index of the symbol name.
    pub st_name: u32,
    pub st_value: u64,
    pub st_size: u64,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

impl Symbol {
    /// On-disk entry size for the given class.
    pub const fn entry_size(class: ElfClass) -> usize {
        match class {
            ElfClass::Elf32 => 16,
            ElfClass::Elf64 => 24,
        }
    }

    fn read(reader: &Reader<'_>, offset: usize, class: ElfClass) -> Result<Self> {
        Ok(match class {
            ElfClass::Elf32 => Symbol {
                st_name: reader.u32(offset)?,
                st_value: reader.u32(offset + 4)?.into(),
                st_size: reader.u32(offset + 8)?.into(),
                st_info: reader.u8(offset + 12)?,
                st_other: reader.u8(offset + 13)?,
                st_shndx: reader.u16(offset + 14)?,
            },
            ElfClass::Elf64 => Symbol {
                st_name: reader.u32(offset)?,
                st_info: reader.u8(offset + 4)?,
                st_other: reader.u8(offset + 5)?,
                st_shndx: reader.u16(offset + 6)?,
                st_value: reader.u64(offset + 8)?,
                st_size: reader.u64(offset + 16)?,
            },
        })
    }

    #[inline(always)]
    pub const fn symbol_type(&self) -> u8 {
        self.st_info & 0xf
    }

    #[inline(always)]
    pub const fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    #[inline(always)]
    pub const fn visibility(&self) -> SymbolVisibility {
        SymbolVisibility::from_other(self.st_other)
    }

    /// Undefined entries and zero values never satisfy a lookup.
    #[inline(always)]
    pub const fn is_defined(&self) -> bool {
        self.st_shndx != SHN_UNDEF && self.st_value != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    /// `.symtab` + `.strtab`
    Static,
    /// `.dynsym` + `.dynstr`
    Dynamic,
}

impl TableKind {
    pub const fn section_names(self) -> (&'static [u8], &'static [u8]) {
        match self {
            TableKind::Static => (b".symtab", b".strtab"),
            TableKind::Dynamic => (b".dynsym", b".dynstr"),
        }
    }
}

/// A symbol-entry array paired with the string table its names index into.
#[derive(Clone, Copy)]
pub struct SymbolTable<'data> {
    kind: TableKind,
    class: ElfClass,
    entries: Reader<'data>,
    entry_size: usize,
    count: usize,
    strings: StringTable<'data>,
}

impl<'data> SymbolTable<'data> {
    /// `entries` must already be bounded to the section; `entry_size` is the
    /// section's `sh_entsize`.
    pub fn new(
        kind: TableKind,
        class: ElfClass,
        entries: Reader<'data>,
        entry_size: usize,
        strings: StringTable<'data>,
    ) -> Result<Self> {
        if entry_size < Symbol::entry_size(class) {
            return Err(Error::malformed(format!(
                "{kind:?} symbol entry size {entry_size} is below {}",
                Symbol::entry_size(class)
            )));
        }
        Ok(Self {
            kind,
            class,
            entries,
            entry_size,
            count: entries.len() / entry_size,
            strings,
        })
    }

    #[inline(always)]
    pub const fn kind(&self) -> TableKind {
        self.kind
    }

    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<Symbol> {
        if index >= self.count {
            return None;
        }
        Symbol::read(&self.entries, index * self.entry_size, self.class).ok()
    }

    #[inline(always)]
    pub fn name_of(&self, symbol: &Symbol) -> &'data [u8] {
        self.strings.get_bytes(symbol.st_name as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = Symbol> + '_ {
        (0..self.count).filter_map(move |index| self.get(index))
    }

    /// Exact byte-for-byte name match against defined entries.
    pub fn find(&self, name: &[u8]) -> Option<Symbol> {
        if name.is_empty() || self.strings.is_empty() {
            return None;
        }
        self.iter()
            .find(|symbol| symbol.is_defined() && self.name_of(symbol) == name)
    }
}
