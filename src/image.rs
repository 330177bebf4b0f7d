//! File-backed ELF images: open, map, resolve, close.

use std::fs::File;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use log::debug;

use crate::elf::header::{ElfClass, ElfHeader};
use crate::elf::symbol::{Symbol, SymbolTable, TableKind};
use crate::elf::ElfLayout;
use crate::error::{Error, Result};

/// A read-only `MAP_PRIVATE` mapping of a whole file.
///
/// Unmapped on drop, or explicitly through [`Mapping::unmap`] to observe the
/// `munmap` result.
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is never written through and has no interior state.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub fn map_readonly(file: &File, len: usize) -> Result<Self> {
        let raw = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(Error::last_os("mmap"));
        }
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| Error::last_os("mmap"))?;
        Ok(Self { ptr, len })
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn unmap(self) -> Result<()> {
        let this = core::mem::ManuallyDrop::new(self);
        if unsafe { libc::munmap(this.ptr.as_ptr().cast(), this.len) } != 0 {
            return Err(Error::last_os("munmap"));
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

/// An ELF image mapped from disk, with its symbol tables located.
///
/// The handle owns both the descriptor and the mapping. Addresses returned by
/// [`ElfImage::resolve`] are plain integers and stay meaningful after the
/// handle is closed.
pub struct ElfImage {
    path: PathBuf,
    // Field order matters for the implicit drop: unmap before close.
    mapping: Mapping,
    file: File,
    layout: ElfLayout,
}

impl ElfImage {
    /// Opens `path` read-only, maps it whole and parses its section table.
    ///
    /// On failure everything acquired so far is released.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().as_bytes().contains(&0) {
            return Err(Error::InvalidPath);
        }

        let file = File::open(path).map_err(|source| Error::Io { op: "open", source })?;
        let len = file
            .metadata()
            .map_err(|source| Error::Io { op: "fstat", source })?
            .len();
        let len = usize::try_from(len)
            .map_err(|_| Error::malformed(format!("file size {len:#x} does not fit in memory")))?;
        if len == 0 {
            return Err(Error::malformed("file is empty"));
        }

        let mapping = Mapping::map_readonly(&file, len)?;
        let layout = ElfLayout::parse(mapping.as_slice())?;
        debug!("opened {} ({len} bytes)", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            mapping,
            file,
            layout,
        })
    }

    /// Unmaps the image and closes its descriptor, reporting either failure.
    ///
    /// Both resources are released even when the first step fails.
    pub fn close(self) -> Result<()> {
        let ElfImage { mapping, file, .. } = self;
        let unmapped = mapping.unmap();
        let fd = file.into_raw_fd();
        let closed = if unsafe { libc::close(fd) } != 0 {
            Err(Error::last_os("close"))
        } else {
            Ok(())
        };
        unmapped.and(closed)
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    #[inline(always)]
    pub fn header(&self) -> &ElfHeader {
        self.layout.header()
    }

    #[inline(always)]
    pub fn class(&self) -> ElfClass {
        self.layout.header().class
    }

    #[inline(always)]
    pub fn machine(&self) -> u16 {
        self.layout.header().e_machine
    }

    #[inline(always)]
    pub fn elf_type(&self) -> u16 {
        self.layout.header().e_type
    }

    /// True for shared objects and PIEs: resolved values are offsets from
    /// the runtime load base.
    #[inline(always)]
    pub fn needs_relocation(&self) -> bool {
        self.layout.needs_relocation()
    }

    pub fn symbol_tables(&self) -> impl Iterator<Item = SymbolTable<'_>> {
        self.layout.symbol_tables(self.mapping.as_slice())
    }

    /// Like [`ElfImage::resolve`] but returns the raw entry and its table.
    pub fn lookup<N: AsRef<[u8]> + ?Sized>(&self, name: &N) -> Option<(TableKind, Symbol)> {
        self.layout.lookup(self.mapping.as_slice(), name)
    }

    /// Looks `name` up in `.symtab`, then `.dynsym`.
    ///
    /// `None` means no defined symbol of that name exists in either table.
    /// `name` may be a `&str` or raw bytes; matching is exact and bytewise.
    pub fn resolve<N: AsRef<[u8]> + ?Sized>(&self, name: &N) -> Option<usize> {
        self.layout.resolve(self.mapping.as_slice(), name)
    }
}

impl std::fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfImage")
            .field("path", &self.path)
            .field("len", &self.mapping.len())
            .field("header", self.layout.header())
            .finish()
    }
}

