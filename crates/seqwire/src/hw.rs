//! Kernel sequencer device implementation of [`SeqOps`].

use std::os::fd::RawFd;

use tracing::{debug, trace, warn};

use crate::device::Device;
use crate::error::{SeqError, SeqResult};
use crate::ops::{ClientId, SeqKind, SeqOps};
use crate::request::Request;
use crate::version::{Feature, ProtocolVersion};
use crate::wire::{
    ClientInfo, ClientPool, ClientUmpInfo, PacketMode, PortInfo, PortSubscribe, QuerySubs,
    QueueClient, QueueInfo, QueueStatus, QueueTempo, QueueTimer, RemoveEvents, SystemInfo,
    UmpInfoKind, WireRecord, DEFAULT_TEMPO_BASE, FILTER_NO_CONVERT,
};

/// A negotiated session on the sequencer device.
pub struct HwSeq {
    device: Box<dyn Device>,
    version: ProtocolVersion,
    client: ClientId,
    midi_version: u32,
}

impl HwSeq {
    /// Bind an open, version-checked device. The client starts in legacy
    /// packet mode.
    pub fn new(device: Box<dyn Device>, version: ProtocolVersion, client: ClientId) -> Self {
        Self {
            device,
            version,
            client,
            midi_version: 0,
        }
    }

    fn transact<R: WireRecord>(&mut self, request: Request, record: &mut R) -> SeqResult<()> {
        self.device.control(request, record).map_err(|errno| {
            trace!(request = request.name(), %errno, "control request failed");
            SeqError::Sys(errno)
        })
    }

    /// Send a record the kernel only reads, without exposing the caller's
    /// copy to mutation.
    fn send<R: WireRecord + Copy>(&mut self, request: Request, record: &R) -> SeqResult<()> {
        let mut copy = *record;
        self.transact(request, &mut copy)
    }

    /// Fields added in 1.0.2 hold garbage on older kernels.
    fn mask_client_fields(&self, info: &mut ClientInfo) {
        if !self.version.supports(Feature::ClientCardPid) {
            info.card = -1;
            info.pid = -1;
        }
    }

    fn update_midi_version(&mut self, info: &ClientInfo) {
        if self.version.supports(Feature::MidiPacket) && self.midi_version != info.midi_version {
            let old = self.packet_mode();
            self.midi_version = info.midi_version;
            debug!(
                midi_version = info.midi_version,
                from = ?old,
                to = ?self.packet_mode(),
                "client packet mode updated"
            );
        }
    }

    fn check_ump_kind(&self, kind: UmpInfoKind, len: usize) -> SeqResult<i32> {
        let raw = kind
            .to_raw()
            .ok_or(SeqError::InvalidArgument("UMP block index out of range"))?;
        if !self.version.supports(Feature::UmpInfo) {
            return Err(SeqError::NotSupported("UMP info needs protocol 1.0.3"));
        }
        if len < kind.payload_len() {
            return Err(SeqError::InvalidArgument("UMP info buffer too small"));
        }
        Ok(raw)
    }
}

impl SeqOps for HwSeq {
    fn kind(&self) -> SeqKind {
        SeqKind::Hw
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn client_id(&self) -> ClientId {
        self.client
    }

    fn packet_mode(&self) -> PacketMode {
        PacketMode::from_midi_version(self.midi_version)
    }

    fn tempo_base_supported(&self) -> bool {
        self.version.supports(Feature::QueueTempoBase)
    }

    fn poll_fd(&self) -> RawFd {
        self.device.poll_fd()
    }

    fn close(self: Box<Self>) -> SeqResult<()> {
        let client = self.client;
        self.device.close().map_err(|errno| {
            warn!(%client, %errno, "close failed");
            SeqError::Sys(errno)
        })
    }

    fn nonblock(&mut self, nonblock: bool) -> SeqResult<()> {
        let flags = self.device.status_flags().map_err(|errno| {
            warn!(%errno, "F_GETFL failed");
            SeqError::Sys(errno)
        })?;
        let flags = if nonblock {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        self.device.set_status_flags(flags).map_err(|errno| {
            warn!(%errno, "F_SETFL for O_NONBLOCK failed");
            SeqError::Sys(errno)
        })
    }

    fn system_info(&mut self, info: &mut SystemInfo) -> SeqResult<()> {
        self.transact(Request::SystemInfo, info)
    }

    fn get_client_info(&mut self, info: &mut ClientInfo) -> SeqResult<()> {
        self.transact(Request::GetClientInfo, info)?;
        self.mask_client_fields(info);
        Ok(())
    }

    fn set_client_info(&mut self, info: &ClientInfo) -> SeqResult<()> {
        // Older kernels ignore these fields instead of rejecting them
        if !self.version.supports(Feature::MidiPacket) {
            if info.midi_version > 0 {
                return Err(SeqError::InvalidArgument("midi_version needs protocol 1.0.3"));
            }
            if info.filter & FILTER_NO_CONVERT != 0 {
                return Err(SeqError::InvalidArgument("FILTER_NO_CONVERT needs protocol 1.0.3"));
            }
            if info.group_filter != 0 {
                return Err(SeqError::InvalidArgument("group_filter needs protocol 1.0.3"));
            }
        }
        self.send(Request::SetClientInfo, info)?;
        self.update_midi_version(info);
        Ok(())
    }

    fn get_ump_info(&mut self, client: i32, kind: UmpInfoKind, info: &mut [u8]) -> SeqResult<()> {
        let raw = self.check_ump_kind(kind, info.len())?;
        let mut buf = ClientUmpInfo {
            client,
            kind: raw,
            ..ClientUmpInfo::default()
        };
        self.transact(Request::GetClientUmpInfo, &mut buf)?;
        let len = kind.payload_len();
        info[..len].copy_from_slice(&buf.info[..len]);
        Ok(())
    }

    fn set_ump_info(&mut self, kind: UmpInfoKind, info: &[u8]) -> SeqResult<()> {
        let raw = self.check_ump_kind(kind, info.len())?;
        let mut buf = ClientUmpInfo {
            client: self.client.0 as i32,
            kind: raw,
            ..ClientUmpInfo::default()
        };
        let len = kind.payload_len();
        buf.info[..len].copy_from_slice(&info[..len]);
        // Card number is owned by the kernel
        buf.info[..4].copy_from_slice(&(-1i32).to_ne_bytes());
        self.transact(Request::SetClientUmpInfo, &mut buf)
    }

    fn create_port(&mut self, port: &mut PortInfo) -> SeqResult<()> {
        self.transact(Request::CreatePort, port)
    }

    fn delete_port(&mut self, port: &PortInfo) -> SeqResult<()> {
        self.send(Request::DeletePort, port)
    }

    fn get_port_info(&mut self, info: &mut PortInfo) -> SeqResult<()> {
        self.transact(Request::GetPortInfo, info)
    }

    fn set_port_info(&mut self, info: &PortInfo) -> SeqResult<()> {
        self.send(Request::SetPortInfo, info)
    }

    fn get_port_subscription(&mut self, sub: &mut PortSubscribe) -> SeqResult<()> {
        self.transact(Request::GetSubscription, sub)
    }

    fn subscribe_port(&mut self, sub: &PortSubscribe) -> SeqResult<()> {
        self.send(Request::SubscribePort, sub)
    }

    fn unsubscribe_port(&mut self, sub: &PortSubscribe) -> SeqResult<()> {
        self.send(Request::UnsubscribePort, sub)
    }

    fn query_port_subscribers(&mut self, subs: &mut QuerySubs) -> SeqResult<()> {
        self.transact(Request::QuerySubs, subs)
    }

    fn get_queue_status(&mut self, status: &mut QueueStatus) -> SeqResult<()> {
        self.transact(Request::GetQueueStatus, status)
    }

    fn get_queue_tempo(&mut self, tempo: &mut QueueTempo) -> SeqResult<()> {
        self.transact(Request::GetQueueTempo, tempo)?;
        if !self.tempo_base_supported() {
            tempo.tempo_base = DEFAULT_TEMPO_BASE;
        }
        Ok(())
    }

    fn set_queue_tempo(&mut self, tempo: &QueueTempo) -> SeqResult<()> {
        self.send(Request::SetQueueTempo, tempo)
    }

    fn get_queue_timer(&mut self, timer: &mut QueueTimer) -> SeqResult<()> {
        self.transact(Request::GetQueueTimer, timer)
    }

    fn set_queue_timer(&mut self, timer: &QueueTimer) -> SeqResult<()> {
        self.send(Request::SetQueueTimer, timer)
    }

    fn get_queue_client(&mut self, info: &mut QueueClient) -> SeqResult<()> {
        self.transact(Request::GetQueueClient, info)
    }

    fn set_queue_client(&mut self, info: &QueueClient) -> SeqResult<()> {
        self.send(Request::SetQueueClient, info)
    }

    fn create_queue(&mut self, info: &mut QueueInfo) -> SeqResult<()> {
        self.transact(Request::CreateQueue, info)
    }

    fn delete_queue(&mut self, info: &QueueInfo) -> SeqResult<()> {
        self.send(Request::DeleteQueue, info)
    }

    fn get_queue_info(&mut self, info: &mut QueueInfo) -> SeqResult<()> {
        self.transact(Request::GetQueueInfo, info)
    }

    fn set_queue_info(&mut self, info: &mut QueueInfo) -> SeqResult<()> {
        self.transact(Request::SetQueueInfo, info)
    }

    fn get_named_queue(&mut self, info: &mut QueueInfo) -> SeqResult<()> {
        self.transact(Request::GetNamedQueue, info)
    }

    fn write(&mut self, buf: &[u8]) -> SeqResult<usize> {
        self.device.write(buf).map_err(SeqError::Sys)
    }

    fn read(&mut self, buf: &mut [u8]) -> SeqResult<usize> {
        self.device.read(buf).map_err(SeqError::Sys)
    }

    fn remove_events(&mut self, remove: &RemoveEvents) -> SeqResult<()> {
        self.send(Request::RemoveEvents, remove)
    }

    fn get_client_pool(&mut self, pool: &mut ClientPool) -> SeqResult<()> {
        self.transact(Request::GetClientPool, pool)
    }

    fn set_client_pool(&mut self, pool: &ClientPool) -> SeqResult<()> {
        self.send(Request::SetClientPool, pool)
    }

    fn query_next_client(&mut self, info: &mut ClientInfo) -> SeqResult<()> {
        self.transact(Request::QueryNextClient, info)?;
        self.mask_client_fields(info);
        Ok(())
    }

    fn query_next_port(&mut self, info: &mut PortInfo) -> SeqResult<()> {
        self.transact(Request::QueryNextPort, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Access, DeviceOpener, OpenFlags};
    use crate::mock::MockFacility;
    use std::path::Path;

    fn hw_at(facility: &MockFacility, version: ProtocolVersion) -> HwSeq {
        let device = facility
            .opener()
            .open(
                Path::new("/dev/snd/seq"),
                OpenFlags {
                    access: Access::ReadWrite,
                    nonblock: false,
                },
            )
            .unwrap();
        HwSeq::new(device, version, ClientId(128))
    }

    #[test]
    fn test_set_client_info_guards_old_kernels() {
        let v = ProtocolVersion::new(1, 0, 2);
        let facility = MockFacility::new(v);
        let mut hw = hw_at(&facility, v);

        let mut info = ClientInfo::for_client(128);
        info.group_filter = 1;
        assert!(matches!(
            hw.set_client_info(&info),
            Err(SeqError::InvalidArgument(_))
        ));

        info.group_filter = 0;
        info.filter = FILTER_NO_CONVERT;
        assert!(matches!(
            hw.set_client_info(&info),
            Err(SeqError::InvalidArgument(_))
        ));
        assert!(facility.transactions().is_empty());

        info.filter = 0;
        hw.set_client_info(&info).unwrap();
        assert_eq!(facility.transactions(), vec![Request::SetClientInfo]);
    }

    #[test]
    fn test_midi_version_switches_packet_mode() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        let mut hw = hw_at(&facility, v);
        assert_eq!(hw.packet_mode(), PacketMode::Legacy);

        let mut info = ClientInfo::for_client(128);
        info.midi_version = 2;
        hw.set_client_info(&info).unwrap();
        assert_eq!(hw.packet_mode(), PacketMode::Ump);

        info.midi_version = 0;
        hw.set_client_info(&info).unwrap();
        assert_eq!(hw.packet_mode(), PacketMode::Legacy);
    }

    #[test]
    fn test_failed_set_keeps_packet_mode() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        facility.fail(Request::SetClientInfo, crate::Errno::EBUSY);
        let mut hw = hw_at(&facility, v);

        let mut info = ClientInfo::for_client(128);
        info.midi_version = 1;
        assert_eq!(
            hw.set_client_info(&info),
            Err(SeqError::Sys(crate::Errno::EBUSY))
        );
        assert_eq!(hw.packet_mode(), PacketMode::Legacy);
    }

    #[test]
    fn test_ump_info_range_checked_before_version() {
        let v = ProtocolVersion::new(1, 0, 2);
        let facility = MockFacility::new(v);
        let mut hw = hw_at(&facility, v);
        let mut buf = [0u8; 512];

        assert!(matches!(
            hw.get_ump_info(128, UmpInfoKind::Block(40), &mut buf),
            Err(SeqError::InvalidArgument(_))
        ));
        assert!(matches!(
            hw.get_ump_info(128, UmpInfoKind::Endpoint, &mut buf),
            Err(SeqError::NotSupported(_))
        ));
        assert!(facility.transactions().is_empty());
    }

    #[test]
    fn test_set_ump_info_invalidates_card() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        let mut hw = hw_at(&facility, v);

        let mut block = [0u8; 180];
        block[..4].copy_from_slice(&7i32.to_ne_bytes());
        block[8] = 3; // block_id
        hw.set_ump_info(UmpInfoKind::Block(3), &block).unwrap();

        let mut out = [0u8; 180];
        hw.get_ump_info(128, UmpInfoKind::Block(3), &mut out).unwrap();
        assert_eq!(&out[..4], &(-1i32).to_ne_bytes());
        assert_eq!(out[8], 3);
    }

    #[test]
    fn test_ump_buffer_too_small() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        let mut hw = hw_at(&facility, v);
        let mut small = [0u8; 100];
        assert!(matches!(
            hw.get_ump_info(128, UmpInfoKind::Endpoint, &mut small),
            Err(SeqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tempo_base_default_on_old_kernel() {
        let v = ProtocolVersion::new(1, 0, 3);
        let facility = MockFacility::new(v);
        facility.state().tempo_base_reported = 0xdead;
        let mut hw = hw_at(&facility, v);

        let mut tempo = QueueTempo::default();
        hw.get_queue_tempo(&mut tempo).unwrap();
        assert_eq!(tempo.tempo_base, DEFAULT_TEMPO_BASE);
    }

    #[test]
    fn test_tempo_base_trusted_on_new_kernel() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        facility.state().tempo_base_reported = 10;
        let mut hw = hw_at(&facility, v);

        let mut tempo = QueueTempo::default();
        hw.get_queue_tempo(&mut tempo).unwrap();
        assert_eq!(tempo.tempo_base, 10);
    }

    #[test]
    fn test_nonblock_toggle() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        let mut hw = hw_at(&facility, v);

        hw.nonblock(true).unwrap();
        assert!(facility.state().nonblock());
        hw.nonblock(false).unwrap();
        assert!(!facility.state().nonblock());
    }

    #[test]
    fn test_nonblock_set_failure_reported() {
        let v = ProtocolVersion::new(1, 0, 4);
        let facility = MockFacility::new(v);
        facility.state().fail_set_flags = Some(crate::Errno::EBADF);
        let mut hw = hw_at(&facility, v);

        assert_eq!(
            hw.nonblock(true),
            Err(SeqError::Sys(crate::Errno::EBADF))
        );
    }
}
