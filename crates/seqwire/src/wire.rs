//! Fixed-layout records exchanged with the kernel sequencer.
//!
//! Every struct here is `#[repr(C)]` and mirrors `<sound/asequencer.h>`
//! byte for byte; the sizes are checked at compile time at the bottom of
//! the file. Records are created zeroed, like the kernel expects for the
//! reserved tails.

use std::any::Any;
use std::ffi::c_void;

use bytemuck::{Pod, Zeroable};

/// Client filter: receive broadcast events.
pub const FILTER_BROADCAST: u32 = 1 << 0;
/// Client filter: receive multicast events.
pub const FILTER_MULTICAST: u32 = 1 << 1;
/// Client filter: receive bounced error events.
pub const FILTER_BOUNCE: u32 = 1 << 2;
/// Client filter: disable automatic legacy/UMP event conversion.
pub const FILTER_NO_CONVERT: u32 = 1 << 30;
/// Client filter: restrict delivery to `event_filter` types.
pub const FILTER_USE_EVENT: u32 = 1 << 31;

/// Wire type of the UMP endpoint record in [`ClientUmpInfo`].
pub const CLIENT_UMP_INFO_ENDPOINT: i32 = 0;
/// Wire type of the first UMP block record; block `n` is `BLOCK + n`.
pub const CLIENT_UMP_INFO_BLOCK: i32 = 1;
/// Number of UMP function blocks a client may describe.
pub const UMP_MAX_BLOCKS: u8 = 32;

/// Size of `struct snd_ump_endpoint_info`.
pub const UMP_ENDPOINT_INFO_SIZE: usize = 328;
/// Size of `struct snd_ump_block_info`.
pub const UMP_BLOCK_INFO_SIZE: usize = 180;

/// Raw access to a record for the control transaction.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or primitive) types whose layout
/// matches the kernel structure of every request that carries them, and
/// that are valid for any bit pattern the kernel may write back.
pub unsafe trait WireRecord: Any + Send {
    /// Pointer handed to `ioctl`.
    fn as_mut_ptr(&mut self) -> *mut c_void;

    /// Size in bytes; must equal the size encoded in the request code.
    fn wire_size(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

macro_rules! wire_records {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: every listed type is repr(C) or a primitive integer and
            // derives Zeroable, so all-bits patterns are valid.
            unsafe impl WireRecord for $ty {
                fn as_mut_ptr(&mut self) -> *mut c_void {
                    (self as *mut Self).cast()
                }

                fn wire_size(&self) -> usize {
                    std::mem::size_of::<Self>()
                }

                fn as_any(&self) -> &dyn Any {
                    self
                }

                fn as_any_mut(&mut self) -> &mut dyn Any {
                    self
                }
            }
        )*
    };
}

macro_rules! zeroed_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    Zeroable::zeroed()
                }
            }
        )*
    };
}

fn read_c_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn write_c_str(dst: &mut [u8], value: &str) {
    dst.fill(0);
    let len = value.len().min(dst.len().saturating_sub(1));
    dst[..len].copy_from_slice(&value.as_bytes()[..len]);
}

/// A `client:port` address.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Addr {
    pub client: u8,
    pub port: u8,
}

impl Addr {
    pub const fn new(client: u8, port: u8) -> Self {
        Self { client, port }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RealTime {
    pub sec: u32,
    pub nsec: u32,
}

/// Global limits and usage of the sequencer core.
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct SystemInfo {
    pub queues: i32,
    pub clients: i32,
    pub ports: i32,
    pub channels: i32,
    pub cur_clients: i32,
    pub cur_queues: i32,
    pub reserved: [u8; 24],
}

/// Byte order and word size announcement for 32/64-bit compat handling.
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct RunningInfo {
    pub client: u8,
    pub big_endian: u8,
    pub cpu_mode: u8,
    pub pad: u8,
    pub reserved: [u8; 12],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct ClientInfo {
    pub client: i32,
    pub kind: i32,
    pub name: [u8; 64],
    pub filter: u32,
    pub multicast_filter: [u8; 8],
    pub event_filter: [u8; 32],
    pub num_ports: i32,
    pub event_lost: i32,
    /// Owning sound card, or -1. Meaningful from protocol 1.0.2.
    pub card: i32,
    /// Owning process, or -1. Meaningful from protocol 1.0.2.
    pub pid: i32,
    /// 0 for legacy events, 1/2 for UMP. Meaningful from protocol 1.0.3.
    pub midi_version: u32,
    pub group_filter: u32,
    pub reserved: [u8; 48],
}

impl ClientInfo {
    pub fn for_client(client: i32) -> Self {
        Self {
            client,
            ..Self::default()
        }
    }

    pub fn name(&self) -> String {
        read_c_str(&self.name)
    }

    pub fn set_name(&mut self, name: &str) {
        write_c_str(&mut self.name, name);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct ClientPool {
    pub client: i32,
    pub output_pool: i32,
    pub input_pool: i32,
    pub output_room: i32,
    pub output_free: i32,
    pub input_free: i32,
    pub reserved: [u8; 64],
}

/// Payload of a UMP endpoint or block info exchange.
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct ClientUmpInfo {
    pub client: i32,
    pub kind: i32,
    pub info: [u8; 512],
}

/// Which UMP description a [`ClientUmpInfo`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UmpInfoKind {
    Endpoint,
    /// Function block by index, below [`UMP_MAX_BLOCKS`].
    Block(u8),
}

impl UmpInfoKind {
    /// Decode a raw wire type; out-of-range values yield `None`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            CLIENT_UMP_INFO_ENDPOINT => Some(UmpInfoKind::Endpoint),
            n if (CLIENT_UMP_INFO_BLOCK..CLIENT_UMP_INFO_BLOCK + UMP_MAX_BLOCKS as i32)
                .contains(&n) =>
            {
                Some(UmpInfoKind::Block((n - CLIENT_UMP_INFO_BLOCK) as u8))
            }
            _ => None,
        }
    }

    /// Wire type, or `None` for a block index out of range.
    pub fn to_raw(self) -> Option<i32> {
        match self {
            UmpInfoKind::Endpoint => Some(CLIENT_UMP_INFO_ENDPOINT),
            UmpInfoKind::Block(n) if n < UMP_MAX_BLOCKS => Some(CLIENT_UMP_INFO_BLOCK + n as i32),
            UmpInfoKind::Block(_) => None,
        }
    }

    /// Bytes of `ClientUmpInfo::info` that belong to this description.
    pub fn payload_len(self) -> usize {
        match self {
            UmpInfoKind::Endpoint => UMP_ENDPOINT_INFO_SIZE,
            UmpInfoKind::Block(_) => UMP_BLOCK_INFO_SIZE,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct PortInfo {
    pub addr: Addr,
    pub name: [u8; 64],
    pub capability: u32,
    pub kind: u32,
    pub midi_channels: i32,
    pub midi_voices: i32,
    pub synth_voices: i32,
    pub read_use: i32,
    pub write_use: i32,
    /// Kernel-private pointer slot; always zero from user space.
    pub kernel: usize,
    pub flags: u32,
    pub time_queue: u8,
    pub direction: u8,
    pub ump_group: u8,
    pub reserved: [u8; 57],
}

impl PortInfo {
    pub fn at(addr: Addr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    pub fn name(&self) -> String {
        read_c_str(&self.name)
    }

    pub fn set_name(&mut self, name: &str) {
        write_c_str(&mut self.name, name);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct PortSubscribe {
    pub sender: Addr,
    pub dest: Addr,
    pub voices: u32,
    pub flags: u32,
    pub queue: u8,
    pub pad: [u8; 3],
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct QuerySubs {
    pub root: Addr,
    pub kind: i32,
    pub index: i32,
    pub num_subs: i32,
    pub addr: Addr,
    pub queue: u8,
    pub flags: u32,
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct QueueInfo {
    pub queue: i32,
    pub owner: i32,
    /// Bit 0 is the `locked` bitfield.
    pub locked: u32,
    pub name: [u8; 64],
    pub flags: u32,
    pub reserved: [u8; 60],
}

impl QueueInfo {
    pub fn name(&self) -> String {
        read_c_str(&self.name)
    }

    pub fn set_name(&mut self, name: &str) {
        write_c_str(&mut self.name, name);
    }

    pub fn is_locked(&self) -> bool {
        self.locked & 1 != 0
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = (self.locked & !1) | locked as u32;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct QueueStatus {
    pub queue: i32,
    pub events: i32,
    pub tick: u32,
    pub time: RealTime,
    pub running: i32,
    pub flags: i32,
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct QueueTempo {
    pub queue: i32,
    pub tempo: u32,
    pub ppq: i32,
    pub skew_value: u32,
    pub skew_base: u32,
    /// Tempo unit in nanoseconds (10 or 1000). Meaningful from protocol 1.0.4.
    pub tempo_base: u16,
    pub reserved: [u8; 22],
}

/// Tempo base the kernel applies when it predates configurable bases.
pub const DEFAULT_TEMPO_BASE: u16 = 1000;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Zeroable)]
pub struct TimerId {
    pub dev_class: i32,
    pub dev_sclass: i32,
    pub card: i32,
    pub device: i32,
    pub subdevice: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct QueueTimer {
    pub queue: i32,
    pub kind: i32,
    pub id: TimerId,
    pub resolution: u32,
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct QueueClient {
    pub queue: i32,
    pub client: i32,
    pub used: i32,
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct RemoveEvents {
    pub remove_mode: u32,
    pub time: [u32; 2],
    pub queue: u8,
    pub dest: Addr,
    pub channel: u8,
    pub kind: i32,
    pub tag: i8,
    pub pad: [u8; 3],
    pub reserved: [i32; 10],
}

/// Fields shared by both packet layouts.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EventHeader {
    pub kind: u8,
    pub flags: u8,
    pub tag: i8,
    pub queue: u8,
    /// Tick, or seconds/nanoseconds, depending on `flags`.
    pub time: [u32; 2],
    pub source: Addr,
    pub dest: Addr,
}

/// Legacy sequencer event.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Event {
    pub header: EventHeader,
    pub data: [u8; 12],
}

/// UMP (MIDI 2.0) sequencer event.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UmpEvent {
    pub header: EventHeader,
    pub ump: [u32; 4],
}

/// The two mutually exclusive packet layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketMode {
    #[default]
    Legacy,
    Ump,
}

impl PacketMode {
    /// Size of the largest layout; input buffers are sized for it up front.
    pub const MAX_RECORD_SIZE: usize = std::mem::size_of::<UmpEvent>();

    pub fn from_midi_version(midi_version: u32) -> Self {
        if midi_version > 0 {
            PacketMode::Ump
        } else {
            PacketMode::Legacy
        }
    }

    pub const fn record_size(self) -> usize {
        match self {
            PacketMode::Legacy => std::mem::size_of::<Event>(),
            PacketMode::Ump => std::mem::size_of::<UmpEvent>(),
        }
    }
}

/// A packet record in one of the two layouts.
pub trait PacketRecord: Pod {
    const MODE: PacketMode;

    fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode one record from the start of `bytes`.
    fn read_from(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..std::mem::size_of::<Self>())
            .map(bytemuck::pod_read_unaligned)
    }
}

impl PacketRecord for Event {
    const MODE: PacketMode = PacketMode::Legacy;
}

impl PacketRecord for UmpEvent {
    const MODE: PacketMode = PacketMode::Ump;
}

wire_records!(
    i32,
    u32,
    SystemInfo,
    RunningInfo,
    ClientInfo,
    ClientPool,
    ClientUmpInfo,
    PortInfo,
    PortSubscribe,
    QuerySubs,
    QueueInfo,
    QueueStatus,
    QueueTempo,
    QueueTimer,
    QueueClient,
    RemoveEvents,
);

zeroed_default!(
    SystemInfo,
    RunningInfo,
    ClientInfo,
    ClientPool,
    ClientUmpInfo,
    PortInfo,
    PortSubscribe,
    QuerySubs,
    QueueInfo,
    QueueStatus,
    QueueTempo,
    QueueTimer,
    QueueClient,
    RemoveEvents,
);

const _: () = {
    use std::mem::size_of;
    assert!(size_of::<Addr>() == 2);
    assert!(size_of::<SystemInfo>() == 48);
    assert!(size_of::<RunningInfo>() == 16);
    assert!(size_of::<ClientInfo>() == 188);
    assert!(size_of::<ClientPool>() == 88);
    assert!(size_of::<ClientUmpInfo>() == 520);
    assert!(size_of::<PortSubscribe>() == 80);
    assert!(size_of::<QuerySubs>() == 88);
    assert!(size_of::<QueueInfo>() == 140);
    assert!(size_of::<QueueStatus>() == 92);
    assert!(size_of::<QueueTempo>() == 44);
    assert!(size_of::<QueueTimer>() == 96);
    assert!(size_of::<QueueClient>() == 76);
    assert!(size_of::<RemoveEvents>() == 64);
    assert!(size_of::<EventHeader>() == 16);
    assert!(size_of::<Event>() == 28);
    assert!(size_of::<UmpEvent>() == 32);
    assert!(UMP_ENDPOINT_INFO_SIZE <= 512 && UMP_BLOCK_INFO_SIZE <= 512);
};

#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<PortInfo>() == 168);

#[cfg(target_pointer_width = "32")]
const _: () = assert!(std::mem::size_of::<PortInfo>() == 164);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_client_info_offsets() {
        assert_eq!(offset_of!(ClientInfo, name), 8);
        assert_eq!(offset_of!(ClientInfo, filter), 72);
        assert_eq!(offset_of!(ClientInfo, card), 124);
        assert_eq!(offset_of!(ClientInfo, pid), 128);
        assert_eq!(offset_of!(ClientInfo, midi_version), 132);
        assert_eq!(offset_of!(ClientInfo, group_filter), 136);
    }

    #[test]
    fn test_port_info_offsets() {
        assert_eq!(offset_of!(PortInfo, name), 2);
        assert_eq!(offset_of!(PortInfo, capability), 68);
        assert_eq!(offset_of!(PortInfo, write_use), 92);
    }

    #[test]
    fn test_queue_tempo_offsets() {
        assert_eq!(offset_of!(QueueTempo, tempo_base), 20);
        assert_eq!(offset_of!(QueueTempo, reserved), 22);
    }

    #[test]
    fn test_remove_events_offsets() {
        assert_eq!(offset_of!(RemoveEvents, queue), 12);
        assert_eq!(offset_of!(RemoveEvents, kind), 16);
        assert_eq!(offset_of!(RemoveEvents, reserved), 24);
    }

    #[test]
    fn test_names_truncate_and_terminate() {
        let mut info = ClientInfo::default();
        info.set_name("seqwire");
        assert_eq!(info.name(), "seqwire");

        let long = "x".repeat(100);
        info.set_name(&long);
        assert_eq!(info.name().len(), 63);
        assert_eq!(info.name[63], 0);
    }

    #[test]
    fn test_queue_locked_bit() {
        let mut queue = QueueInfo::default();
        queue.flags = 7;
        queue.set_locked(true);
        assert!(queue.is_locked());
        queue.set_locked(false);
        assert!(!queue.is_locked());
        assert_eq!(queue.flags, 7);
    }

    #[test]
    fn test_ump_info_kind() {
        assert_eq!(UmpInfoKind::Endpoint.to_raw(), Some(0));
        assert_eq!(UmpInfoKind::Block(0).to_raw(), Some(1));
        assert_eq!(UmpInfoKind::Block(31).to_raw(), Some(32));
        assert_eq!(UmpInfoKind::Block(32).to_raw(), None);
        assert_eq!(UmpInfoKind::from_raw(32), Some(UmpInfoKind::Block(31)));
        assert_eq!(UmpInfoKind::from_raw(33), None);
        assert_eq!(UmpInfoKind::from_raw(-1), None);
        assert_eq!(UmpInfoKind::Endpoint.payload_len(), 328);
        assert_eq!(UmpInfoKind::Block(3).payload_len(), 180);
    }

    #[test]
    fn test_packet_mode_sizes() {
        assert_eq!(PacketMode::Legacy.record_size(), 28);
        assert_eq!(PacketMode::Ump.record_size(), 32);
        assert_eq!(PacketMode::MAX_RECORD_SIZE, 32);
        assert_eq!(PacketMode::from_midi_version(0), PacketMode::Legacy);
        assert_eq!(PacketMode::from_midi_version(2), PacketMode::Ump);
    }

    #[test]
    fn test_event_bytes_decode() {
        let mut ev = Event::default();
        ev.header.kind = 6; // note on
        ev.header.dest = Addr::new(128, 0);
        ev.data[..3].copy_from_slice(&[0, 60, 100]);

        let bytes = ev.as_bytes().to_vec();
        assert_eq!(bytes.len(), 28);
        assert_eq!(Event::read_from(&bytes), Some(ev));
        assert_eq!(Event::read_from(&bytes[..10]), None);
    }
}
