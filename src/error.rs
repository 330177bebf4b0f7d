use std::io;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A system call failed. `op` names the call, `source` carries the errno.
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("malformed ELF image: {0}")]
    Malformed(String),

    #[error("bearing record rejected: {0}")]
    ProtocolViolation(String),

    #[error("path contains an interior NUL byte")]
    InvalidPath,
}

impl Error {
    /// Captures `errno` right after a failed libc call.
    #[inline]
    pub(crate) fn last_os(op: &'static str) -> Self {
        Error::Io {
            op,
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::Malformed(message.into())
    }

    /// The raw OS error code behind an `Io` error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
