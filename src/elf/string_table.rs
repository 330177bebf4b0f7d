use memchr::memchr;

/// A collection of null-terminated strings stored in contiguous memory.
///
/// Symbol entries and section headers refer to names by byte offset into one of
/// these blobs (`.strtab`, `.dynstr`, `.shstrtab`). To get the string at index
/// `i`, start at the `i`th byte and read until a null byte is encountered.
///
/// The following shows a string table with 38 bytes and example string locations:
/// ```text
/// |    |  0  |  1  |  2  |  3  |  4  |  5  |  6  |  7  |  8  |  9  |
/// |:--:|:---:|:---:|:---:|:---:|:---:|:---:|:---:|:---:|:---:|:---:|
/// | 0x | \0  |  H  |  e  |  l  |  l  |  o  | \0  |  W  |  o  |  r  |
/// | 1x |  l  |  d  |  !  | \0  |  T  |  h  |  a  |  n  |  k  |  s  |
/// | 2x | \0  |  f  |  o  |  r  | \0  |  A  |  l  |  l  | \0  |  t  |
/// | 3x |  h  |  e  | \0  |  F  |  i  |  s  |  h  | \0  |     |     |
/// ```
///
/// Example string lookups:
/// ```text
/// | Index | String |
/// |:-----:|--------|
/// |   0   |  None  |
/// |   1   |  Hello |
/// |   3   |  llo   |
/// |   32  |  None  |
/// |   33  |  Fish  |
/// ```
#[derive(Clone, Copy, Default)]
pub struct StringTable<'data> {
    bytes: &'data [u8],
}

impl<'data> StringTable<'data> {
    #[inline(always)]
    pub const fn new(bytes: &'data [u8]) -> Self {
        Self { bytes }
    }

    /// An absent table: every lookup yields the empty string.
    #[inline(always)]
    pub const fn empty() -> Self {
        Self { bytes: &[] }
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `&[]` if the index is OOB or the first byte is NUL. A string
    /// running off the end of the table is cut at the table boundary.
    #[inline(always)]
    pub fn get_bytes(&self, index: usize) -> &'data [u8] {
        let Some(tail) = self.bytes.get(index..) else {
            return &[];
        };
        match memchr(0, tail) {
            Some(len) => &tail[..len],
            None => tail,
        }
    }

    /// Lossless only for UTF-8 names; used for diagnostics.
    pub fn get_lossy(&self, index: usize) -> std::borrow::Cow<'data, str> {
        String::from_utf8_lossy(self.get_bytes(index))
    }
}
