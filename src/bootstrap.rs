//! The first code to run inside the target after injection.
//!
//! The sequence is strictly ordered:
//!
//! 1. open the shared segment keyed by our PID (read-only)
//! 2. open the semaphore keyed by our PID
//! 3. copy the bearing record locally
//! 4. release the injector's scaffolding attachment (`mapped_mem`)
//! 5. detach the shared segment
//! 6. decrement the semaphore, letting the injector tear the IPC objects down
//! 7. call the payload's `preinit`
//! 8. call the payload's `main`
//!
//! Nothing after a failed step runs. In particular the semaphore is never
//! signalled while this process still has anything of the injector attached.
//! A failed step is logged and also written to stderr as `"<step>: <error>"`.

use core::ffi::{c_char, c_int};
use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};

use crate::bearing::{Args, UserConfig};
use crate::error::Error;
use crate::ipc::{Ipc, IpcKey, SysvIpc};

/// The injected payload's two entry points.
pub trait Payload {
    fn preinit(&mut self, user: &mut UserConfig);

    /// Receives the arguments the injector staged; returns an exit status.
    fn main(&mut self, args: &mut Args<'_>) -> i32;
}

/// A payload exposing the conventional C entry points, e.g. `lib_preinit`
/// and `lib_main` from a C shared object.
#[derive(Clone, Copy)]
pub struct CPayload {
    preinit: unsafe extern "C" fn(*mut UserConfig),
    main: unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int,
}

impl CPayload {
    pub const fn new(
        preinit: unsafe extern "C" fn(*mut UserConfig),
        main: unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int,
    ) -> Self {
        Self { preinit, main }
    }
}

impl Payload for CPayload {
    fn preinit(&mut self, user: &mut UserConfig) {
        unsafe { (self.preinit)(user) }
    }

    fn main(&mut self, args: &mut Args<'_>) -> i32 {
        let argc = args.argc();
        unsafe { (self.main)(argc, args.as_mut_ptr()) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    OpenSegment,
    OpenSemaphore,
    ReleaseMapping,
    Detach,
    Signal,
    DecodeArgs,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::OpenSegment => "open shared segment",
            Step::OpenSemaphore => "open semaphore",
            Step::ReleaseMapping => "release injector mapping",
            Step::Detach => "detach shared segment",
            Step::Signal => "signal injector",
            Step::DecodeArgs => "decode arguments",
        })
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// The payload ran; `exit_code` is what its `main` returned.
    Completed { exit_code: i32 },
    /// The sequence stopped at `step`; later steps and the payload did not run.
    Aborted { step: Step, error: Error },
    /// [`entry`] had already run in this process.
    AlreadyRan,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

pub struct Handshake<I: Ipc> {
    ipc: I,
    key: IpcKey,
}

impl Handshake<SysvIpc> {
    /// SysV IPC keyed by the calling process's PID.
    pub fn for_current_process() -> Self {
        Self::new(SysvIpc, IpcKey::current_process())
    }
}

impl<I: Ipc> Handshake<I> {
    pub const fn new(ipc: I, key: IpcKey) -> Self {
        Self { ipc, key }
    }

    #[inline(always)]
    pub fn key(&self) -> IpcKey {
        self.key
    }

    /// Runs the whole sequence once, then hands control to `payload`.
    pub fn run<P: Payload + ?Sized>(mut self, payload: &mut P) -> Outcome {
        macro_rules! attempt {
            ($step:expr, $call:expr) => {
                match $call {
                    Ok(value) => value,
                    Err(error) => {
                        error!("{}: {error}", $step);
                        // No logger is installed this early in a real injection.
                        eprintln!("{}: {error}", $step);
                        return Outcome::Aborted { step: $step, error };
                    }
                }
            };
        }

        let segment = attempt!(Step::OpenSegment, self.ipc.open_segment(self.key));
        let semaphore = attempt!(Step::OpenSemaphore, self.ipc.open_semaphore(self.key));

        let mut bearing = self.ipc.read_bearing(&segment);

        if bearing.mapped_mem != 0 {
            attempt!(
                Step::ReleaseMapping,
                self.ipc.release_mapping(bearing.mapped_mem)
            );
        }
        attempt!(Step::Detach, self.ipc.detach(segment));
        attempt!(Step::Signal, self.ipc.signal(&semaphore));

        let mut user = bearing.user;
        let mut args = attempt!(Step::DecodeArgs, bearing.args());

        payload.preinit(&mut user);
        let exit_code = payload.main(&mut args);
        info!("payload main returned {exit_code}");

        Outcome::Completed { exit_code }
    }
}

static ENTERED: AtomicBool = AtomicBool::new(false);

/// Runs the handshake for the current process, at most once per process.
///
/// This is what the exported entry symbol calls; see [`bootstrap_entry!`].
///
/// [`bootstrap_entry!`]: crate::bootstrap_entry
pub fn entry<P: Payload + ?Sized>(payload: &mut P) -> Outcome {
    if ENTERED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        warn!("bootstrap entry invoked more than once; ignoring");
        return Outcome::AlreadyRan;
    }
    Handshake::for_current_process().run(payload)
}

/// Exports a `#[no_mangle] extern "C" fn $name()` that runs [`entry`] with
/// the given payload.
///
/// The loading mechanism is responsible for calling the exported function
/// once after the object is mapped. Panics are contained so they never unwind
/// into the target's frames.
///
/// ```ignore
/// extern "C" {
///     fn lib_preinit(user: *mut rsinject::UserConfig);
///     fn lib_main(argc: c_int, argv: *mut *mut c_char) -> c_int;
/// }
///
/// rsinject::bootstrap_entry!(rsinject_entry, rsinject::CPayload::new(lib_preinit, lib_main));
/// ```
#[macro_export]
macro_rules! bootstrap_entry {
    ($name:ident, $payload:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name() {
            let _ = ::std::panic::catch_unwind(|| {
                let mut payload = $payload;
                $crate::bootstrap::entry(&mut payload)
            });
        }
    };
}
