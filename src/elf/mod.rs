//! Section-table level ELF parsing for symbol lookup.
//!
//! Only what the resolver needs is decoded: the header, the section header
//! table and the two symbol/string table pairs. Every offset is validated
//! against the image size through [`cursor::Reader`].

pub mod cursor;
pub mod header;
pub mod section;
pub mod string_table;
pub mod symbol;

use log::{debug, warn};
use smallvec::SmallVec;

use crate::error::{Error, Result};
use cursor::Reader;
use header::{ElfHeader, EM_ARM};
use section::SectionTable;
use string_table::StringTable;
use symbol::{Symbol, SymbolTable, TableKind};

/// Symbol tables are consulted in this order; the first definition wins.
pub const LOOKUP_ORDER: [TableKind; 2] = [TableKind::Static, TableKind::Dynamic];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    offset: u64,
    size: u64,
}

#[derive(Clone, Copy, Debug)]
struct TableLocation {
    kind: TableKind,
    symbols: Span,
    entry_size: usize,
    strings: Option<Span>,
}

#[derive(Default)]
struct TableSlot {
    symbols: Option<(Span, usize)>,
    strings: Option<Span>,
}

/// Where the symbol tables of an image live, as offsets into its bytes.
///
/// The layout holds no borrows, so it can sit next to the mapping it was
/// parsed from; views are rebuilt from the bytes on demand.
#[derive(Clone, Debug)]
pub struct ElfLayout {
    header: ElfHeader,
    tables: SmallVec<[TableLocation; 2]>,
}

impl ElfLayout {
    /// Parses the header and scans the section table once, recording the
    /// `.symtab`/`.strtab` and `.dynsym`/`.dynstr` sections.
    ///
    /// Missing tables are not an error: lookups against them find nothing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, reader) = ElfHeader::parse(data)?;
        debug!(
            "class={:?} endian={:?} e_type={} e_machine={} e_shoff={:#x} e_shentsize={} e_shnum={}",
            header.class,
            header.endian,
            header.e_type,
            header.e_machine,
            header.e_shoff,
            header.e_shentsize,
            header.e_shnum
        );

        let sections = SectionTable::parse(&header, &reader)?;
        let mut slots: [TableSlot; 2] = Default::default();

        for section in sections.iter().filter(|section| section.has_file_data()) {
            let name = sections.name_of(section);
            for (slot, kind) in slots.iter_mut().zip(LOOKUP_ORDER) {
                let (symbols_name, strings_name) = kind.section_names();
                let span = Span {
                    offset: section.sh_offset,
                    size: section.sh_size,
                };

                if name == symbols_name {
                    reader.range(span.offset, span.size)?;
                    let entry_size = usize::try_from(section.sh_entsize).unwrap_or(0);
                    if entry_size < Symbol::entry_size(header.class) {
                        return Err(Error::malformed(format!(
                            "{} has entry size {}",
                            String::from_utf8_lossy(name),
                            section.sh_entsize
                        )));
                    }
                    debug!(
                        "found {} ({} entries) at {:#x}",
                        String::from_utf8_lossy(name),
                        span.size / section.sh_entsize,
                        span.offset
                    );
                    slot.symbols = Some((span, entry_size));
                } else if name == strings_name {
                    reader.range(span.offset, span.size)?;
                    debug!(
                        "found {} at {:#x}",
                        String::from_utf8_lossy(name),
                        span.offset
                    );
                    slot.strings = Some(span);
                }
            }
        }

        let tables = slots
            .into_iter()
            .zip(LOOKUP_ORDER)
            .filter_map(|(slot, kind)| {
                let (symbols, entry_size) = slot.symbols?;
                Some(TableLocation {
                    kind,
                    symbols,
                    entry_size,
                    strings: slot.strings,
                })
            })
            .collect();

        Ok(Self { header, tables })
    }

    #[inline(always)]
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    #[inline(always)]
    pub fn needs_relocation(&self) -> bool {
        self.header.needs_relocation()
    }

    /// The symbol tables present in the image, in [`LOOKUP_ORDER`].
    ///
    /// `data` must be the same bytes the layout was parsed from.
    pub fn symbol_tables<'d>(&'d self, data: &'d [u8]) -> impl Iterator<Item = SymbolTable<'d>> + 'd {
        let reader = Reader::new(data, self.header.endian);
        let class = self.header.class;
        self.tables.iter().filter_map(move |location| {
            let entries = reader
                .sub(location.symbols.offset, location.symbols.size)
                .ok()?;
            let strings = match location.strings {
                Some(span) => StringTable::new(reader.range(span.offset, span.size).ok()?),
                None => StringTable::empty(),
            };
            SymbolTable::new(location.kind, class, entries, location.entry_size, strings).ok()
        })
    }

    /// First defined symbol named `name`, and the table it came from.
    ///
    /// Names are compared byte for byte; they need not be UTF-8.
    pub fn lookup<N>(&self, data: &[u8], name: &N) -> Option<(TableKind, Symbol)>
    where
        N: AsRef<[u8]> + ?Sized,
    {
        let name = name.as_ref();
        let mut tables = self.symbol_tables(data);
        let found = tables.find_map(|table| {
            let symbol = table.find(name);
            if symbol.is_none() && table.kind() == TableKind::Static {
                debug!("{} not found in symtab, trying dynsym", name.escape_ascii());
            }
            symbol.map(|symbol| (table.kind(), symbol))
        });
        if found.is_none() {
            warn!("{} not found in symtab or dynsym", name.escape_ascii());
        }
        found
    }

    /// Resolves `name` to its symbol value, with the ARM Thumb bit cleared.
    ///
    /// For images where [`ElfLayout::needs_relocation`] is true the result is
    /// an offset from the image's load base.
    pub fn resolve<N>(&self, data: &[u8], name: &N) -> Option<usize>
    where
        N: AsRef<[u8]> + ?Sized,
    {
        let name = name.as_ref();
        let (_, symbol) = self.lookup(data, name)?;
        let value = self.fixup(symbol.st_value);
        match usize::try_from(value) {
            Ok(address) => Some(address),
            Err(_) => {
                warn!("{} value {value:#x} does not fit in a pointer", name.escape_ascii());
                None
            }
        }
    }

    /// Strips the Thumb mode bit from ARM code addresses.
    #[inline(always)]
    fn fixup(&self, value: u64) -> u64 {
        if self.header.e_machine == EM_ARM {
            value & !1
        } else {
            value
        }
    }
}
