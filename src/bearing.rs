//! The bearing record: parameters staged by the injector in shared memory.
//!
//! The layout is `#[repr(C)]` and agreed out-of-band with the injector. The
//! record carries its argument strings inline so that a copy taken before
//! detaching the segment is self-contained.

use core::ffi::{c_char, c_int, CStr};
use core::marker::PhantomData;

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Size of the opaque block handed to the payload's `preinit`.
pub const USER_CONFIG_SIZE: usize = 256;
/// Size of the inline area holding `argc` NUL-terminated strings.
pub const ARGV_AREA_SIZE: usize = 4096;
pub const MAX_ARGS: usize = 64;

/// Size of the shared segment the injector creates.
pub const MAPPING_SIZE: usize = core::mem::size_of::<Bearing>();

const _: () = assert!(
    MAPPING_SIZE
        == USER_CONFIG_SIZE
            + core::mem::size_of::<usize>()
            + 2 * core::mem::size_of::<u32>()
            + ARGV_AREA_SIZE
);

/// Payload-defined configuration. This crate never interprets it.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct UserConfig {
    pub data: [u8; USER_CONFIG_SIZE],
}

impl UserConfig {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; USER_CONFIG_SIZE],
        }
    }

    /// Copies `bytes` into the front of the block.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > USER_CONFIG_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "user config of {} bytes exceeds {USER_CONFIG_SIZE}",
                bytes.len()
            )));
        }
        let mut config = Self::zeroed();
        config.data[..bytes.len()].copy_from_slice(bytes);
        Ok(config)
    }
}

impl core::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let used = self.data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        write!(f, "UserConfig({used} bytes)")
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Bearing {
    pub user: UserConfig,
    /// Address of the injector's scaffolding attachment in this process, 0 if none.
    pub mapped_mem: usize,
    pub argc: c_int,
    // Occupies what would otherwise be trailing padding, so `as_bytes` never
    // reads uninitialized memory.
    _reserved: u32,
    pub argv: [u8; ARGV_AREA_SIZE],
}

impl Bearing {
    pub const fn new(user: UserConfig, mapped_mem: usize) -> Self {
        Self {
            user,
            mapped_mem,
            argc: 0,
            _reserved: 0,
            argv: [0; ARGV_AREA_SIZE],
        }
    }

    /// Copies a record out of shared memory.
    ///
    /// # Safety
    ///
    /// `source` must be readable for [`MAPPING_SIZE`] bytes.
    #[inline(always)]
    pub unsafe fn read_from(source: *const u8) -> Self {
        core::ptr::read_unaligned(source.cast::<Bearing>())
    }

    /// The raw record, as an injector writes it into the segment.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts((self as *const Bearing).cast::<u8>(), MAPPING_SIZE)
        }
    }

    /// Appends one argument string. Used by injector-side staging.
    pub fn push_arg(&mut self, arg: &[u8]) -> Result<()> {
        if arg.contains(&0) {
            return Err(Error::ProtocolViolation("argument contains a NUL byte".into()));
        }
        if self.argc as usize >= MAX_ARGS {
            return Err(Error::ProtocolViolation(format!("more than {MAX_ARGS} arguments")));
        }
        let used = self.argv_used()?;
        let end = used + arg.len() + 1;
        if end > ARGV_AREA_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "arguments exceed {ARGV_AREA_SIZE} bytes"
            )));
        }
        self.argv[used..end - 1].copy_from_slice(arg);
        self.argv[end - 1] = 0;
        self.argc += 1;
        Ok(())
    }

    /// Byte offsets of each argument string inside `argv`.
    fn arg_offsets(&self) -> Result<SmallVec<[usize; 8]>> {
        let argc = usize::try_from(self.argc)
            .map_err(|_| Error::ProtocolViolation(format!("negative argc {}", self.argc)))?;
        if argc > MAX_ARGS {
            return Err(Error::ProtocolViolation(format!(
                "argc {argc} exceeds {MAX_ARGS}"
            )));
        }

        let mut offsets = SmallVec::with_capacity(argc);
        let mut cursor = 0usize;
        for index in 0..argc {
            let tail = self.argv.get(cursor..).unwrap_or(&[]);
            let arg = CStr::from_bytes_until_nul(tail).map_err(|_| {
                Error::ProtocolViolation(format!("argument {index} is not NUL-terminated"))
            })?;
            offsets.push(cursor);
            cursor += arg.to_bytes_with_nul().len();
        }
        Ok(offsets)
    }

    fn argv_used(&self) -> Result<usize> {
        let offsets = self.arg_offsets()?;
        Ok(match offsets.last() {
            Some(&last) => {
                last + CStr::from_bytes_until_nul(&self.argv[last..])
                    .map(|arg| arg.to_bytes_with_nul().len())
                    .unwrap_or(0)
            }
            None => 0,
        })
    }

    /// Builds a C-style argument vector backed by this record's `argv` area.
    pub fn args(&mut self) -> Result<Args<'_>> {
        let offsets = self.arg_offsets()?;
        let base = self.argv.as_mut_ptr();
        let mut pointers: SmallVec<[*mut c_char; 9]> = offsets
            .iter()
            .map(|&offset| unsafe { base.add(offset).cast::<c_char>() })
            .collect();
        pointers.push(core::ptr::null_mut());
        Ok(Args {
            pointers,
            _area: PhantomData,
        })
    }
}

impl core::fmt::Debug for Bearing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bearing")
            .field("user", &self.user)
            .field("mapped_mem", &format_args!("{:#x}", self.mapped_mem))
            .field("argc", &self.argc)
            .finish_non_exhaustive()
    }
}

/// `argc`/`argv` as a program entry point receives them: a NULL-terminated
/// array of pointers to NUL-terminated strings.
pub struct Args<'a> {
    pointers: SmallVec<[*mut c_char; 9]>,
    _area: PhantomData<&'a mut [u8]>,
}

impl<'a> Args<'a> {
    #[inline(always)]
    pub fn argc(&self) -> c_int {
        (self.pointers.len() - 1) as c_int
    }

    /// The `argv` array, NULL-terminated. Valid while `self` is alive.
    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.pointers.as_mut_ptr()
    }

    pub fn get(&self, index: usize) -> Option<&CStr> {
        let pointer = *self.pointers.get(index)?;
        if pointer.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(pointer) })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> + '_ {
        (0..self.pointers.len() - 1).filter_map(move |index| self.get(index))
    }

    pub fn to_strings_lossy(&self) -> Vec<String> {
        self.iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}
