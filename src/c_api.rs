use crate::image::ElfImage;
use core::ffi::{c_char, c_void};
use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;

use log::error;

/// Opens and parses the ELF image at `path`.
///
/// Returns NULL on any failure; nothing is left allocated in that case. A
/// non-NULL handle must be released with `rsinject_elf_close`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rsinject_elf_open(path: *const c_char) -> *mut ElfImage {
    if path.is_null() {
        return core::ptr::null_mut();
    }
    let path = OsStr::from_bytes(CStr::from_ptr(path).to_bytes());

    let result = std::panic::catch_unwind(|| ElfImage::open(path));
    match result {
        Ok(Ok(image)) => Box::into_raw(Box::new(image)),
        Ok(Err(err)) => {
            error!("{}: {err}", path.to_string_lossy());
            core::ptr::null_mut()
        }
        Err(_) => core::ptr::null_mut(),
    }
}

/// 1 if resolved values are load-base relative, 0 if absolute, -1 for a NULL handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rsinject_elf_needs_relocation(handle: *const ElfImage) -> i32 {
    match handle.as_ref() {
        Some(image) => image.needs_relocation() as i32,
        None => -1,
    }
}

/// Resolves `name` via `.symtab`, then `.dynsym`. NULL when not found.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rsinject_elf_resolve(
    handle: *const ElfImage,
    name: *const c_char,
) -> *mut c_void {
    let Some(image) = handle.as_ref() else {
        return core::ptr::null_mut();
    };
    if name.is_null() {
        return core::ptr::null_mut();
    }
    match image.resolve(CStr::from_ptr(name).to_bytes()) {
        Some(address) => address as *mut c_void,
        None => core::ptr::null_mut(),
    }
}

/// Unmaps the image and closes its descriptor. NULL is ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rsinject_elf_close(handle: *mut ElfImage) {
    if handle.is_null() {
        return;
    }
    let image = Box::from_raw(handle);
    if let Err(err) = image.close() {
        error!("close: {err}");
    }
}
