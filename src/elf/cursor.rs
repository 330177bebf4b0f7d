use crate::error::{Error, Result};

use super::header::ElfClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A bounds-checked view over raw ELF bytes.
///
/// Every read validates `offset + width` against the length of the underlying
/// slice, so a truncated or hostile image produces [`Error::Malformed`]
/// instead of reading past the mapping.
#[derive(Clone, Copy)]
pub struct Reader<'data> {
    data: &'data [u8],
    endian: Endian,
}

impl<'data> Reader<'data> {
    #[inline(always)]
    pub const fn new(data: &'data [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub const fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'data [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                Error::malformed(format!(
                    "range {offset:#x}+{len:#x} exceeds image size {:#x}",
                    self.data.len()
                ))
            })
    }

    /// Same as [`Reader::bytes`] but takes file-sized (`u64`) coordinates.
    pub fn range(&self, offset: u64, len: u64) -> Result<&'data [u8]> {
        let offset = usize::try_from(offset)
            .map_err(|_| Error::malformed(format!("offset {offset:#x} does not fit in memory")))?;
        let len = usize::try_from(len)
            .map_err(|_| Error::malformed(format!("size {len:#x} does not fit in memory")))?;
        self.bytes(offset, len)
    }

    #[inline]
    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    pub fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.array::<1>(offset)?[0])
    }

    pub fn u16(&self, offset: usize) -> Result<u16> {
        let raw = self.array(offset)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        let raw = self.array(offset)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    pub fn u64(&self, offset: usize) -> Result<u64> {
        let raw = self.array(offset)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Reads an address-sized field: 4 bytes for ELF32, 8 for ELF64.
    pub fn word(&self, offset: usize, class: ElfClass) -> Result<u64> {
        match class {
            ElfClass::Elf32 => self.u32(offset).map(u64::from),
            ElfClass::Elf64 => self.u64(offset),
        }
    }

    /// Narrows the reader to `len` bytes at `offset`, keeping the byte order.
    pub fn sub(&self, offset: u64, len: u64) -> Result<Reader<'data>> {
        Ok(Reader::new(self.range(offset, len)?, self.endian))
    }
}
