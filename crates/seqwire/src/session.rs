//! The open, negotiated, buffered channel handed to callers.

use std::fmt;
use std::os::fd::RawFd;

use tracing::debug;

use crate::buffers::Buffers;
use crate::device::Access;
use crate::error::{Errno, SeqError, SeqResult};
use crate::ops::{ClientId, SeqKind, SeqOps};
use crate::version::ProtocolVersion;
use crate::wire::{PacketMode, PacketRecord};

/// Raw direction value for output only.
pub const OPEN_OUTPUT: i32 = 1;
/// Raw direction value for input only.
pub const OPEN_INPUT: i32 = 2;
/// Raw direction value for both directions.
pub const OPEN_DUPLEX: i32 = OPEN_OUTPUT | OPEN_INPUT;

/// Raw open-mode bit for nonblocking I/O.
pub const NONBLOCK: i32 = 1;

/// Which directions a session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Streams {
    Output,
    Input,
    Duplex,
}

impl Streams {
    pub fn has_output(self) -> bool {
        matches!(self, Streams::Output | Streams::Duplex)
    }

    pub fn has_input(self) -> bool {
        matches!(self, Streams::Input | Streams::Duplex)
    }

    /// Device access mode for this direction set.
    pub fn access(self) -> Access {
        match self {
            Streams::Output => Access::WriteOnly,
            Streams::Input => Access::ReadOnly,
            Streams::Duplex => Access::ReadWrite,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Streams::Output => OPEN_OUTPUT,
            Streams::Input => OPEN_INPUT,
            Streams::Duplex => OPEN_DUPLEX,
        }
    }
}

impl TryFrom<i32> for Streams {
    type Error = SeqError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            OPEN_OUTPUT => Ok(Streams::Output),
            OPEN_INPUT => Ok(Streams::Input),
            OPEN_DUPLEX => Ok(Streams::Duplex),
            _ => Err(SeqError::InvalidArgument(
                "streams must be output, input or duplex",
            )),
        }
    }
}

impl fmt::Display for Streams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Streams::Output => write!(f, "output"),
            Streams::Input => write!(f, "input"),
            Streams::Duplex => write!(f, "duplex"),
        }
    }
}

/// Open-time mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenMode {
    pub nonblock: bool,
}

impl OpenMode {
    pub const BLOCKING: OpenMode = OpenMode { nonblock: false };
    pub const NONBLOCKING: OpenMode = OpenMode { nonblock: true };

    pub fn from_raw(raw: i32) -> Self {
        Self {
            nonblock: raw & NONBLOCK != 0,
        }
    }

    pub fn to_raw(self) -> i32 {
        if self.nonblock {
            NONBLOCK
        } else {
            0
        }
    }
}

/// One open channel to the sequencer.
///
/// Operations go through [`Session::ops`]; the session itself only adds
/// buffer handling and bookkeeping. Not internally synchronized: `&mut self`
/// everywhere means one transaction at a time.
pub struct Session {
    name: Option<String>,
    streams: Streams,
    mode: OpenMode,
    buffers: Buffers,
    ops: Box<dyn SeqOps>,
}

impl Session {
    pub(crate) fn new(
        name: Option<String>,
        streams: Streams,
        mode: OpenMode,
        buffers: Buffers,
        ops: Box<dyn SeqOps>,
    ) -> Self {
        Self {
            name,
            streams,
            mode,
            buffers,
            ops,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> SeqKind {
        self.ops.kind()
    }

    pub fn streams(&self) -> Streams {
        self.streams
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn version(&self) -> ProtocolVersion {
        self.ops.version()
    }

    pub fn client_id(&self) -> ClientId {
        self.ops.client_id()
    }

    pub fn packet_mode(&self) -> PacketMode {
        self.ops.packet_mode()
    }

    /// Size of one packet record in the current mode.
    pub fn packet_size(&self) -> usize {
        self.packet_mode().record_size()
    }

    pub fn tempo_base_supported(&self) -> bool {
        self.ops.tempo_base_supported()
    }

    pub fn input_capacity(&self) -> usize {
        self.buffers.input_capacity()
    }

    pub fn output_capacity(&self) -> usize {
        self.buffers.output_capacity()
    }

    pub fn poll_fd(&self) -> RawFd {
        self.ops.poll_fd()
    }

    /// The dispatch table.
    pub fn ops(&mut self) -> &mut dyn SeqOps {
        self.ops.as_mut()
    }

    /// Toggle nonblocking I/O. On error the mode is unknown and the caller
    /// should retry or close.
    pub fn set_nonblock(&mut self, nonblock: bool) -> SeqResult<()> {
        self.ops.nonblock(nonblock)?;
        self.mode.nonblock = nonblock;
        Ok(())
    }

    /// Send one packet through the output buffer.
    ///
    /// The record layout must match the current packet mode.
    pub fn write_packet<P: PacketRecord>(&mut self, packet: &P) -> SeqResult<usize> {
        if !self.streams.has_output() {
            return Err(SeqError::Sys(Errno::EBADF));
        }
        if P::MODE != self.packet_mode() {
            return Err(SeqError::InvalidArgument(
                "packet layout does not match the client's MIDI version",
            ));
        }
        let bytes = packet.as_bytes();
        let out = &mut self.buffers.output[..bytes.len()];
        out.copy_from_slice(bytes);
        self.ops.write(out)
    }

    /// Read whatever complete packets are pending into the input buffer.
    ///
    /// Returns the filled part of the buffer; in nonblocking mode an empty
    /// queue is reported as would-block.
    pub fn read_packets(&mut self) -> SeqResult<&[u8]> {
        if !self.streams.has_input() {
            return Err(SeqError::Sys(Errno::EBADF));
        }
        let size = self.packet_size();
        let usable = self.buffers.input.len() / size * size;
        let n = self.ops.read(&mut self.buffers.input[..usable])?;
        Ok(&self.buffers.input[..n])
    }

    /// Close the session. Buffers are released even when closing the
    /// descriptor fails; the error is still reported.
    pub fn close(self) -> SeqResult<()> {
        let Session {
            name,
            ops,
            buffers,
            ..
        } = self;
        let client = ops.client_id();
        let result = ops.close();
        drop(buffers);
        debug!(%client, name = name.as_deref().unwrap_or(""), ok = result.is_ok(), "session closed");
        result
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("streams", &self.streams)
            .field("mode", &self.mode)
            .field("version", &self.version())
            .field("client", &self.client_id())
            .field("packet_mode", &self.packet_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_from_raw() {
        assert_eq!(Streams::try_from(1), Ok(Streams::Output));
        assert_eq!(Streams::try_from(2), Ok(Streams::Input));
        assert_eq!(Streams::try_from(3), Ok(Streams::Duplex));
        assert!(matches!(
            Streams::try_from(0),
            Err(SeqError::InvalidArgument(_))
        ));
        assert!(matches!(
            Streams::try_from(4),
            Err(SeqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_streams_access() {
        assert_eq!(Streams::Output.access(), Access::WriteOnly);
        assert_eq!(Streams::Input.access(), Access::ReadOnly);
        assert_eq!(Streams::Duplex.access(), Access::ReadWrite);
        for s in [Streams::Output, Streams::Input, Streams::Duplex] {
            assert_eq!(Streams::try_from(s.to_raw()), Ok(s));
        }
    }

    #[test]
    fn test_open_mode_raw() {
        assert_eq!(OpenMode::from_raw(NONBLOCK), OpenMode::NONBLOCKING);
        assert_eq!(OpenMode::from_raw(0), OpenMode::BLOCKING);
        assert_eq!(OpenMode::NONBLOCKING.to_raw(), NONBLOCK);
    }
}
