//! Error types for the sequencer transport.
//!
//! Every failure is an ordinary return value. Callers that speak the numeric
//! protocol get the negative code from [`SeqError::code`].

use std::fmt;

use crate::version::ProtocolVersion;

/// First library-specific error code, above the errno range.
pub const ERROR_BEGIN: i32 = 500_000;

/// Numeric code for an incompatible kernel protocol version.
pub const ERROR_INCOMPATIBLE_VERSION: i32 = ERROR_BEGIN;

/// A raw `errno` value reported by the kernel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const EBADF: Errno = Errno(libc::EBADF);
    pub const EAGAIN: Errno = Errno(libc::EAGAIN);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    pub const ENOTTY: Errno = Errno(libc::ENOTTY);
    pub const EBUSY: Errno = Errno(libc::EBUSY);

    /// The calling thread's current `errno`.
    pub fn last() -> Self {
        Self::from(std::io::Error::last_os_error())
    }
}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        Errno(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({})", self.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

/// Error type for sequencer transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeqError {
    /// A failed system call or control transaction.
    #[error("system error: {0}")]
    Sys(Errno),

    #[error("incompatible sequencer protocol: kernel {kernel}, library {user}")]
    IncompatibleVersion {
        kernel: ProtocolVersion,
        user: ProtocolVersion,
    },

    /// A field the negotiated protocol cannot carry, or a malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An operation the negotiated protocol does not provide.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SeqError {
    /// Negative numeric code, as returned by the C sequencer API.
    pub fn code(&self) -> i32 {
        match self {
            SeqError::Sys(errno) => -errno.0,
            SeqError::IncompatibleVersion { .. } => -ERROR_INCOMPATIBLE_VERSION,
            SeqError::InvalidArgument(_) | SeqError::Config(_) => -libc::EINVAL,
            SeqError::NotSupported(_) => -libc::ENOTTY,
            SeqError::OutOfMemory { .. } => -libc::ENOMEM,
        }
    }

    /// The descriptor is nonblocking and the transfer would have blocked.
    pub fn is_would_block(&self) -> bool {
        matches!(self, SeqError::Sys(errno) if errno.0 == libc::EAGAIN || errno.0 == libc::EWOULDBLOCK)
    }

    /// The underlying errno, if this is a system error.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            SeqError::Sys(errno) => Some(*errno),
            _ => None,
        }
    }
}

impl From<Errno> for SeqError {
    fn from(errno: Errno) -> Self {
        SeqError::Sys(errno)
    }
}

pub type SeqResult<T> = Result<T, SeqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative() {
        let errors = [
            SeqError::Sys(Errno::ENOENT),
            SeqError::IncompatibleVersion {
                kernel: ProtocolVersion::new(2, 0, 0),
                user: ProtocolVersion::new(1, 0, 4),
            },
            SeqError::InvalidArgument("midi_version"),
            SeqError::NotSupported("ump info"),
            SeqError::OutOfMemory { bytes: 16 },
            SeqError::Config("unknown field".to_string()),
        ];
        for err in errors {
            assert!(err.code() < 0, "{err:?} should have a negative code");
        }
    }

    #[test]
    fn test_specific_codes() {
        assert_eq!(SeqError::Sys(Errno::ENOENT).code(), -libc::ENOENT);
        assert_eq!(SeqError::NotSupported("x").code(), -libc::ENOTTY);
        assert_eq!(SeqError::OutOfMemory { bytes: 1 }.code(), -libc::ENOMEM);
        assert_eq!(
            SeqError::IncompatibleVersion {
                kernel: ProtocolVersion::new(0, 9, 0),
                user: ProtocolVersion::new(1, 0, 4),
            }
            .code(),
            -500_000
        );
    }

    #[test]
    fn test_would_block() {
        assert!(SeqError::Sys(Errno::EAGAIN).is_would_block());
        assert!(!SeqError::Sys(Errno::EBADF).is_would_block());
        assert!(!SeqError::InvalidArgument("x").is_would_block());
    }
}
