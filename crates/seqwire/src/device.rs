//! The raw descriptor underneath a session.
//!
//! [`Device`] is the smallest surface the transport needs from an open
//! sequencer node: one control transaction, byte reads and writes, status
//! flags, and close. [`SystemDevice`] is the real character device;
//! [`crate::mock`] provides an in-memory one.

use std::ffi::c_int;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::{trace, warn};

use crate::error::Errno;
use crate::request::Request;
use crate::wire::WireRecord;

/// Access mode the device is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Flags for opening the sequencer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub access: Access,
    pub nonblock: bool,
}

impl OpenFlags {
    /// The equivalent `open(2)` flags. The descriptor is always close-on-exec.
    pub fn bits(self) -> c_int {
        let access = match self.access {
            Access::ReadOnly => libc::O_RDONLY,
            Access::WriteOnly => libc::O_WRONLY,
            Access::ReadWrite => libc::O_RDWR,
        };
        let nonblock = if self.nonblock { libc::O_NONBLOCK } else { 0 };
        access | nonblock | libc::O_CLOEXEC
    }
}

/// An open sequencer descriptor.
///
/// Implementations perform exactly one system-level action per call and
/// report the raw errno on failure.
pub trait Device: Send {
    /// Run one control transaction, letting the kernel read and/or fill
    /// `record`.
    fn control(&mut self, request: Request, record: &mut dyn WireRecord) -> Result<(), Errno>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno>;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno>;

    /// `fcntl(F_GETFL)`.
    fn status_flags(&mut self) -> Result<c_int, Errno>;

    /// `fcntl(F_SETFL)`.
    fn set_status_flags(&mut self, flags: c_int) -> Result<(), Errno>;

    /// Descriptor for external readiness polling.
    fn poll_fd(&self) -> RawFd;

    /// Release the descriptor, reporting a failed close.
    fn close(self: Box<Self>) -> Result<(), Errno>;
}

/// Reject a record whose size differs from the one encoded in `request`.
///
/// The kernel copies exactly the encoded size in and out, so a smaller
/// record would be overrun.
pub fn check_record(request: Request, record: &dyn WireRecord) -> Result<(), Errno> {
    if record.wire_size() != request.record_size() {
        warn!(
            request = request.name(),
            expected = request.record_size(),
            got = record.wire_size(),
            "record size mismatch"
        );
        return Err(Errno::EINVAL);
    }
    Ok(())
}

/// Opens device nodes.
pub trait DeviceOpener {
    fn open(&mut self, path: &Path, flags: OpenFlags) -> Result<Box<dyn Device>, Errno>;
}

/// A real sequencer character device.
#[derive(Debug)]
pub struct SystemDevice {
    file: File,
}

impl SystemDevice {
    pub fn open(path: &Path, flags: OpenFlags) -> Result<Self, Errno> {
        // std masks out the access mode bits and takes them from read/write
        let file = OpenOptions::new()
            .read(flags.access.readable())
            .write(flags.access.writable())
            .custom_flags(flags.bits())
            .open(path)
            .map_err(Errno::from)?;
        trace!(path = %path.display(), fd = file.as_raw_fd(), "opened sequencer device");
        Ok(Self { file })
    }
}

impl Device for SystemDevice {
    fn control(&mut self, request: Request, record: &mut dyn WireRecord) -> Result<(), Errno> {
        check_record(request, &*record)?;
        // SAFETY: the record is a live, exclusively borrowed repr(C) value
        // whose size was just checked against the one encoded in the request.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request.code() as _,
                record.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        self.file.read(buf).map_err(Errno::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        self.file.write(buf).map_err(Errno::from)
    }

    fn status_flags(&mut self) -> Result<c_int, Errno> {
        // SAFETY: F_GETFL takes no argument and the fd is owned by self.
        let flags = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(Errno::last());
        }
        Ok(flags)
    }

    fn set_status_flags(&mut self, flags: c_int) -> Result<(), Errno> {
        // SAFETY: F_SETFL takes an int argument and the fd is owned by self.
        if unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_SETFL, flags) } < 0 {
            return Err(Errno::last());
        }
        Ok(())
    }

    fn poll_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn close(self: Box<Self>) -> Result<(), Errno> {
        let fd = self.file.into_raw_fd();
        // SAFETY: ownership of fd was just released by into_raw_fd, so it is
        // closed exactly once here.
        if unsafe { libc::close(fd) } < 0 {
            return Err(Errno::last());
        }
        Ok(())
    }
}

/// Opens real device nodes with [`SystemDevice`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl DeviceOpener for SystemOpener {
    fn open(&mut self, path: &Path, flags: OpenFlags) -> Result<Box<dyn Device>, Errno> {
        Ok(Box::new(SystemDevice::open(path, flags)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp(access: Access) -> (tempfile::NamedTempFile, SystemDevice) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let device = SystemDevice::open(
            file.path(),
            OpenFlags {
                access,
                nonblock: false,
            },
        )
        .unwrap();
        (file, device)
    }

    #[test]
    fn test_open_flags_bits() {
        let flags = OpenFlags {
            access: Access::WriteOnly,
            nonblock: true,
        };
        assert_eq!(
            flags.bits(),
            libc::O_WRONLY | libc::O_NONBLOCK | libc::O_CLOEXEC
        );
    }

    #[test]
    fn test_open_missing_node() {
        let err = SystemDevice::open(
            Path::new("/nonexistent/snd/seq"),
            OpenFlags {
                access: Access::ReadWrite,
                nonblock: false,
            },
        )
        .unwrap_err();
        assert_eq!(err, Errno::ENOENT);
    }

    #[test]
    fn test_control_on_regular_file_is_enotty() {
        let (_file, mut device) = open_temp(Access::ReadWrite);
        let mut version = 0i32;
        let err = device.control(Request::Pversion, &mut version).unwrap_err();
        assert_eq!(err, Errno::ENOTTY);
    }

    #[test]
    fn test_control_rejects_undersized_record() {
        let (_file, mut device) = open_temp(Access::ReadWrite);
        let mut too_small = 0i32;
        // EINVAL rather than ENOTTY: the ioctl is never issued
        let err = device
            .control(Request::GetClientInfo, &mut too_small)
            .unwrap_err();
        assert_eq!(err, Errno::EINVAL);
    }

    #[test]
    fn test_check_record_matches_request_size() {
        let info = crate::wire::ClientInfo::for_client(0);
        assert_eq!(check_record(Request::GetClientInfo, &info), Ok(()));
        assert_eq!(check_record(Request::Pversion, &info), Err(Errno::EINVAL));
        assert_eq!(check_record(Request::Pversion, &0i32), Ok(()));
    }

    #[test]
    fn test_status_flags_roundtrip() {
        let (_file, mut device) = open_temp(Access::ReadWrite);
        let flags = device.status_flags().unwrap();
        assert_eq!(flags & libc::O_NONBLOCK, 0);

        device.set_status_flags(flags | libc::O_NONBLOCK).unwrap();
        assert_ne!(device.status_flags().unwrap() & libc::O_NONBLOCK, 0);
    }

    #[test]
    fn test_write_on_read_only_is_ebadf() {
        let (_file, mut device) = open_temp(Access::ReadOnly);
        assert_eq!(device.write(b"abc").unwrap_err(), Errno::EBADF);
        assert_eq!(Box::new(device).close(), Ok(()));
    }
}
