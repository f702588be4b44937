//! Input/output buffer allocation for a session.

use tracing::trace;

use crate::error::{SeqError, SeqResult};
use crate::session::Streams;
use crate::wire::PacketMode;

/// Output buffer capacity in bytes.
pub const OBUF_SIZE: usize = 16 * 1024;

/// Input buffer capacity in packet records.
pub const IBUF_RECORDS: usize = 500;

/// Input buffer capacity in bytes; sized for the larger packet layout since
/// the layout is only known after client negotiation.
pub const IBUF_SIZE: usize = IBUF_RECORDS * PacketMode::MAX_RECORD_SIZE;

/// Fallible source of zeroed byte buffers.
pub trait BufferAlloc {
    fn allocate(&mut self, len: usize) -> SeqResult<Vec<u8>>;
}

/// Allocates from the global heap, reporting exhaustion instead of aborting.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAlloc;

impl BufferAlloc for HeapAlloc {
    fn allocate(&mut self, len: usize) -> SeqResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| SeqError::OutOfMemory { bytes: len })?;
        buf.resize(len, 0);
        Ok(buf)
    }
}

/// The byte regions owned by a session. An absent direction is an empty
/// buffer.
#[derive(Debug, Default)]
pub struct Buffers {
    pub input: Vec<u8>,
    pub output: Vec<u8>,
}

impl Buffers {
    /// Allocate the buffers `streams` needs: output first, then input.
    ///
    /// On failure nothing allocated so far is retained.
    pub fn allocate(streams: Streams, alloc: &mut dyn BufferAlloc) -> SeqResult<Self> {
        let output = if streams.has_output() {
            alloc.allocate(OBUF_SIZE)?
        } else {
            Vec::new()
        };
        // `output` is dropped on the early return below
        let input = if streams.has_input() {
            alloc.allocate(IBUF_SIZE)?
        } else {
            Vec::new()
        };
        trace!(
            input = input.len(),
            output = output.len(),
            "allocated session buffers"
        );
        Ok(Self { input, output })
    }

    pub fn input_capacity(&self) -> usize {
        self.input.len()
    }

    pub fn output_capacity(&self) -> usize {
        self.output.len()
    }
}
