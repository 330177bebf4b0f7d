//! SysV shared memory and semaphore access for the bootstrap side.
//!
//! The injector creates and eventually removes both objects; this side only
//! opens them, reads once, detaches and signals.

use core::ptr::NonNull;

use crate::bearing::{Bearing, MAPPING_SIZE};
use crate::error::{Error, Result};

/// A SysV IPC key. Both objects of one injection share it.
///
/// Keys are derived from the target's PID, so at most one injection may be in
/// flight per process at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpcKey(pub libc::key_t);

impl IpcKey {
    #[inline(always)]
    pub const fn for_pid(pid: libc::pid_t) -> Self {
        Self(pid as libc::key_t)
    }

    #[inline(always)]
    pub fn current_process() -> Self {
        Self::for_pid(unsafe { libc::getpid() })
    }
}

/// The system calls the handshake is made of.
///
/// Split out so the ordering rules of the handshake can be exercised against
/// a scripted implementation.
pub trait Ipc {
    type Segment;
    type Semaphore;

    /// Opens the existing shared segment for `key` and attaches it read-only.
    fn open_segment(&mut self, key: IpcKey) -> Result<Self::Segment>;

    /// Opens the existing single-semaphore set for `key`.
    fn open_semaphore(&mut self, key: IpcKey) -> Result<Self::Semaphore>;

    /// Copies the bearing record out of the attached segment.
    fn read_bearing(&mut self, segment: &Self::Segment) -> Bearing;

    /// Releases the injector's scaffolding attachment at `address`.
    fn release_mapping(&mut self, address: usize) -> Result<()>;

    fn detach(&mut self, segment: Self::Segment) -> Result<()>;

    /// Decrements the semaphore by one.
    fn signal(&mut self, semaphore: &Self::Semaphore) -> Result<()>;
}

/// A read-only attachment of the injector's segment.
///
/// Detached on drop if the handshake aborts before detaching it explicitly.
pub struct SysvSegment {
    id: libc::c_int,
    address: NonNull<u8>,
}

impl SysvSegment {
    #[inline(always)]
    pub fn id(&self) -> libc::c_int {
        self.id
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const u8 {
        self.address.as_ptr()
    }
}

impl Drop for SysvSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.address.as_ptr().cast());
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SysvSemaphore {
    id: libc::c_int,
}

impl SysvSemaphore {
    #[inline(always)]
    pub fn id(&self) -> libc::c_int {
        self.id
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SysvIpc;

impl Ipc for SysvIpc {
    type Segment = SysvSegment;
    type Semaphore = SysvSemaphore;

    fn open_segment(&mut self, key: IpcKey) -> Result<SysvSegment> {
        let id = unsafe { libc::shmget(key.0, MAPPING_SIZE, 0) };
        if id < 0 {
            return Err(Error::last_os("shmget"));
        }
        let raw = unsafe { libc::shmat(id, core::ptr::null(), libc::SHM_RDONLY) };
        if raw as isize == -1 {
            return Err(Error::last_os("shmat"));
        }
        let address = NonNull::new(raw.cast::<u8>()).ok_or_else(|| Error::last_os("shmat"))?;
        Ok(SysvSegment { id, address })
    }

    fn open_semaphore(&mut self, key: IpcKey) -> Result<SysvSemaphore> {
        let id = unsafe { libc::semget(key.0, 1, 0) };
        if id < 0 {
            return Err(Error::last_os("semget"));
        }
        Ok(SysvSemaphore { id })
    }

    fn read_bearing(&mut self, segment: &SysvSegment) -> Bearing {
        // shmget with an explicit size guarantees the attachment spans the record.
        unsafe { Bearing::read_from(segment.as_ptr()) }
    }

    fn release_mapping(&mut self, address: usize) -> Result<()> {
        if unsafe { libc::shmdt(address as *const libc::c_void) } != 0 {
            return Err(Error::last_os("shmdt"));
        }
        Ok(())
    }

    fn detach(&mut self, segment: SysvSegment) -> Result<()> {
        let segment = core::mem::ManuallyDrop::new(segment);
        if unsafe { libc::shmdt(segment.address.as_ptr().cast()) } != 0 {
            return Err(Error::last_os("shmdt"));
        }
        Ok(())
    }

    fn signal(&mut self, semaphore: &SysvSemaphore) -> Result<()> {
        let mut operation = libc::sembuf {
            sem_num: 0,
            sem_op: -1,
            sem_flg: 0,
        };
        if unsafe { libc::semop(semaphore.id, &mut operation, 1) } < 0 {
            return Err(Error::last_os("semop"));
        }
        Ok(())
    }
}
