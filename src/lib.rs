//! In-target half of a shared-object injection.
//!
//! Two pieces:
//!
//! - [`ElfImage`]: maps an ELF file read-only and resolves symbol names to
//!   their values through `.symtab`, falling back to `.dynsym`.
//! - [`bootstrap`]: the handshake run once when the injected object becomes
//!   active. It copies the [`Bearing`] record the injector staged in SysV
//!   shared memory keyed by our PID, releases the injector's attachments,
//!   signals the injector through the matching semaphore and then calls the
//!   payload.

pub mod bearing;
pub mod bootstrap;
pub mod elf;
pub mod error;
pub mod image;
pub mod ipc;

#[cfg(feature = "c-api")]
mod c_api;

pub use bearing::{Args, Bearing, UserConfig, MAPPING_SIZE};
pub use bootstrap::{CPayload, Handshake, Outcome, Payload, Step};
pub use elf::symbol::TableKind;
pub use error::{Error, Result};
pub use image::ElfImage;
pub use ipc::{Ipc, IpcKey, SysvIpc};
