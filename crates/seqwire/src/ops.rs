//! The dispatch table every session operation goes through.
//!
//! A [`Session`](crate::Session) holds one `Box<dyn SeqOps>` bound at open
//! time and never looks behind it. [`HwSeq`](crate::hw::HwSeq) is the kernel
//! device implementation.

use std::fmt;
use std::os::fd::RawFd;

use crate::error::SeqResult;
use crate::version::ProtocolVersion;
use crate::wire::{
    ClientInfo, ClientPool, PacketMode, PortInfo, PortSubscribe, QuerySubs, QueueClient,
    QueueInfo, QueueStatus, QueueTempo, QueueTimer, RemoveEvents, SystemInfo, UmpInfoKind,
};

/// Transport families a session can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqKind {
    /// The kernel sequencer character device.
    Hw,
}

impl fmt::Display for SeqKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqKind::Hw => write!(f, "hw"),
        }
    }
}

/// Client number assigned by the sequencer core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u8);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One slot per logical sequencer operation.
///
/// Read-style operations fill the record they are given; write-style ones
/// only read it. Each call performs at most one control transaction.
pub trait SeqOps: Send {
    fn kind(&self) -> SeqKind;

    /// Protocol version negotiated at open time.
    fn version(&self) -> ProtocolVersion;

    fn client_id(&self) -> ClientId;

    /// Current packet layout, following the client's MIDI version.
    fn packet_mode(&self) -> PacketMode;

    /// Whether queue tempo reports carry a real tempo base.
    fn tempo_base_supported(&self) -> bool;

    /// Descriptor for external readiness polling.
    fn poll_fd(&self) -> RawFd;

    /// Release the transport. The descriptor is gone even when an error is
    /// returned.
    fn close(self: Box<Self>) -> SeqResult<()>;

    /// Switch between blocking and nonblocking I/O. On error the mode is
    /// unknown.
    fn nonblock(&mut self, nonblock: bool) -> SeqResult<()>;

    fn system_info(&mut self, info: &mut SystemInfo) -> SeqResult<()>;

    fn get_client_info(&mut self, info: &mut ClientInfo) -> SeqResult<()>;

    fn set_client_info(&mut self, info: &ClientInfo) -> SeqResult<()>;

    /// Copy `client`'s UMP endpoint or block description into `info`, which
    /// must hold at least `kind.payload_len()` bytes.
    fn get_ump_info(&mut self, client: i32, kind: UmpInfoKind, info: &mut [u8]) -> SeqResult<()>;

    /// Publish this client's UMP endpoint or block description.
    fn set_ump_info(&mut self, kind: UmpInfoKind, info: &[u8]) -> SeqResult<()>;

    fn create_port(&mut self, port: &mut PortInfo) -> SeqResult<()>;

    fn delete_port(&mut self, port: &PortInfo) -> SeqResult<()>;

    fn get_port_info(&mut self, info: &mut PortInfo) -> SeqResult<()>;

    fn set_port_info(&mut self, info: &PortInfo) -> SeqResult<()>;

    fn get_port_subscription(&mut self, sub: &mut PortSubscribe) -> SeqResult<()>;

    fn subscribe_port(&mut self, sub: &PortSubscribe) -> SeqResult<()>;

    fn unsubscribe_port(&mut self, sub: &PortSubscribe) -> SeqResult<()>;

    fn query_port_subscribers(&mut self, subs: &mut QuerySubs) -> SeqResult<()>;

    fn get_queue_status(&mut self, status: &mut QueueStatus) -> SeqResult<()>;

    fn get_queue_tempo(&mut self, tempo: &mut QueueTempo) -> SeqResult<()>;

    fn set_queue_tempo(&mut self, tempo: &QueueTempo) -> SeqResult<()>;

    fn get_queue_timer(&mut self, timer: &mut QueueTimer) -> SeqResult<()>;

    fn set_queue_timer(&mut self, timer: &QueueTimer) -> SeqResult<()>;

    fn get_queue_client(&mut self, info: &mut QueueClient) -> SeqResult<()>;

    fn set_queue_client(&mut self, info: &QueueClient) -> SeqResult<()>;

    fn create_queue(&mut self, info: &mut QueueInfo) -> SeqResult<()>;

    fn delete_queue(&mut self, info: &QueueInfo) -> SeqResult<()>;

    fn get_queue_info(&mut self, info: &mut QueueInfo) -> SeqResult<()>;

    fn set_queue_info(&mut self, info: &mut QueueInfo) -> SeqResult<()>;

    fn get_named_queue(&mut self, info: &mut QueueInfo) -> SeqResult<()>;

    /// Raw write of packet bytes; returns the accepted length.
    fn write(&mut self, buf: &[u8]) -> SeqResult<usize>;

    /// Raw read of packet bytes; returns the received length.
    fn read(&mut self, buf: &mut [u8]) -> SeqResult<usize>;

    fn remove_events(&mut self, remove: &RemoveEvents) -> SeqResult<()>;

    fn get_client_pool(&mut self, pool: &mut ClientPool) -> SeqResult<()>;

    fn set_client_pool(&mut self, pool: &ClientPool) -> SeqResult<()>;

    /// Advance `info.client` to the next existing client and fill `info`.
    fn query_next_client(&mut self, info: &mut ClientInfo) -> SeqResult<()>;

    /// Advance `info.addr.port` to the next port of `info.addr.client`.
    fn query_next_port(&mut self, info: &mut PortInfo) -> SeqResult<()>;
}
