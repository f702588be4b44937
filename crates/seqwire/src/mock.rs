//! In-memory sequencer facility.
//!
//! [`MockFacility`] stands in for the kernel behind [`MockOpener`]: it
//! answers control requests from a small client/port table, loops written
//! packet bytes back to readers, records every transaction, and can be told
//! to fail specific requests, opens, or closes. [`FailingAlloc`] injects
//! allocation failures. Used by the test suites and by `seqctl --dry-run`.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_int;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffers::{BufferAlloc, HeapAlloc};
use crate::device::{check_record, Device, DeviceOpener, OpenFlags};
use crate::error::{Errno, SeqError, SeqResult};
use crate::request::Request;
use crate::version::ProtocolVersion;
use crate::wire::{
    Addr, ClientInfo, ClientUmpInfo, PortInfo, QueueInfo, QueueTempo, RunningInfo, SystemInfo,
    WireRecord,
};

/// Fake descriptor number reported for polling.
const MOCK_FD: RawFd = 1000;

/// Everything the fake kernel knows. Public so tests can script it.
#[derive(Debug)]
pub struct FacilityState {
    /// Packed version answered to `PVERSION`.
    pub version: u32,
    /// Answer to `CLIENT_ID`.
    pub client_id: i32,
    pub clients: Vec<ClientInfo>,
    pub ports: Vec<PortInfo>,
    pub ump_info: HashMap<(i32, i32), [u8; 512]>,
    /// Value written into `tempo_base` of queue tempo replies.
    pub tempo_base_reported: u16,
    /// Requests that fail with the given errno.
    pub failures: HashMap<Request, Errno>,
    /// Every control transaction that reached the facility, in order.
    pub transactions: Vec<Request>,
    pub user_version: Option<u32>,
    pub running_mode: Option<RunningInfo>,
    /// Bytes written and not yet read back.
    pub loopback: VecDeque<u8>,
    pub flags: c_int,
    pub fail_set_flags: Option<Errno>,
    pub fail_close: Option<Errno>,
    /// Remaining failures per path for `open`.
    pub fail_open: HashMap<PathBuf, (Errno, usize)>,
    /// Every open attempt, successful or not.
    pub open_attempts: Vec<PathBuf>,
    /// Flags of each entry in `open_attempts`.
    pub open_flags: Vec<OpenFlags>,
    pub open_descriptors: usize,
    next_queue: i32,
}

impl FacilityState {
    pub fn nonblock(&self) -> bool {
        self.flags & libc::O_NONBLOCK != 0
    }

    fn client_mut(&mut self, client: i32) -> Option<&mut ClientInfo> {
        self.clients.iter_mut().find(|c| c.client == client)
    }

    fn answer(&mut self, request: Request, record: &mut dyn WireRecord) -> Result<(), Errno> {
        let any = record.as_any_mut();
        match request {
            Request::Pversion => *downcast::<i32>(any)? = self.version as i32,
            Request::ClientId => *downcast::<i32>(any)? = self.client_id,
            Request::UserPversion => self.user_version = Some(*downcast::<i32>(any)? as u32),
            Request::RunningMode => self.running_mode = Some(*downcast::<RunningInfo>(any)?),
            Request::SystemInfo => {
                let info = downcast::<SystemInfo>(any)?;
                info.queues = 32;
                info.clients = 192;
                info.ports = 254;
                info.channels = 256;
                info.cur_clients = self.clients.len() as i32;
                info.cur_queues = self.next_queue;
            }
            Request::GetClientInfo => {
                let info = downcast::<ClientInfo>(any)?;
                let found = self
                    .clients
                    .iter()
                    .find(|c| c.client == info.client)
                    .ok_or(Errno::ENOENT)?;
                *info = *found;
            }
            Request::SetClientInfo => {
                let info = *downcast::<ClientInfo>(any)?;
                let slot = self.client_mut(info.client).ok_or(Errno::ENOENT)?;
                *slot = info;
            }
            Request::QueryNextClient => {
                let info = downcast::<ClientInfo>(any)?;
                let next = self
                    .clients
                    .iter()
                    .filter(|c| c.client > info.client)
                    .min_by_key(|c| c.client)
                    .ok_or(Errno::ENOENT)?;
                *info = *next;
            }
            Request::GetPortInfo => {
                let info = downcast::<PortInfo>(any)?;
                let found = self
                    .ports
                    .iter()
                    .find(|p| p.addr == info.addr)
                    .ok_or(Errno::ENOENT)?;
                *info = *found;
            }
            Request::QueryNextPort => {
                let info = downcast::<PortInfo>(any)?;
                // Port numbers wrap, so starting from 255 finds port 0
                let first = info.addr.port.wrapping_add(1);
                let next = self
                    .ports
                    .iter()
                    .filter(|p| p.addr.client == info.addr.client && p.addr.port >= first)
                    .min_by_key(|p| p.addr.port)
                    .ok_or(Errno::ENOENT)?;
                *info = *next;
            }
            Request::CreatePort => {
                let info = downcast::<PortInfo>(any)?;
                let client = self.client_id as u8;
                let port = self
                    .ports
                    .iter()
                    .filter(|p| p.addr.client == client)
                    .map(|p| p.addr.port + 1)
                    .max()
                    .unwrap_or(0);
                info.addr = Addr::new(client, port);
                self.ports.push(*info);
            }
            Request::DeletePort => {
                let addr = downcast::<PortInfo>(any)?.addr;
                let before = self.ports.len();
                self.ports.retain(|p| p.addr != addr);
                if self.ports.len() == before {
                    return Err(Errno::ENOENT);
                }
            }
            Request::GetClientUmpInfo => {
                let info = downcast::<ClientUmpInfo>(any)?;
                let payload = self
                    .ump_info
                    .get(&(info.client, info.kind))
                    .ok_or(Errno::ENOENT)?;
                info.info = *payload;
            }
            Request::SetClientUmpInfo => {
                let info = downcast::<ClientUmpInfo>(any)?;
                self.ump_info.insert((info.client, info.kind), info.info);
            }
            Request::GetQueueTempo => {
                downcast::<QueueTempo>(any)?.tempo_base = self.tempo_base_reported;
            }
            Request::CreateQueue => {
                let info = downcast::<QueueInfo>(any)?;
                info.queue = self.next_queue;
                info.owner = self.client_id;
                self.next_queue += 1;
            }
            // Everything else is accepted and echoed unchanged
            _ => {}
        }
        Ok(())
    }
}

fn downcast<T: 'static>(any: &mut dyn std::any::Any) -> Result<&mut T, Errno> {
    any.downcast_mut::<T>().ok_or(Errno::EINVAL)
}

/// A scriptable stand-in for the kernel sequencer.
#[derive(Debug, Clone)]
pub struct MockFacility {
    state: Arc<Mutex<FacilityState>>,
}

impl MockFacility {
    /// A facility at `version` that assigns client 128 and knows only that
    /// client.
    pub fn new(version: ProtocolVersion) -> Self {
        let mut own = ClientInfo::for_client(128);
        own.kind = 1; // user client
        Self {
            state: Arc::new(Mutex::new(FacilityState {
                version: version.to_raw(),
                client_id: 128,
                clients: vec![own],
                ports: Vec::new(),
                ump_info: HashMap::new(),
                tempo_base_reported: 0,
                failures: HashMap::new(),
                transactions: Vec::new(),
                user_version: None,
                running_mode: None,
                loopback: VecDeque::new(),
                flags: 0,
                fail_set_flags: None,
                fail_close: None,
                fail_open: HashMap::new(),
                open_attempts: Vec::new(),
                open_flags: Vec::new(),
                open_descriptors: 0,
                next_queue: 0,
            })),
        }
    }

    /// A facility pre-populated with the clients a stock system has:
    /// `System` (0) with timer and announce ports, and `Midi Through` (14).
    pub fn with_system_clients(version: ProtocolVersion) -> Self {
        let facility = Self::new(version);
        {
            let mut state = facility.state();
            let mut system = ClientInfo::for_client(0);
            system.set_name("System");
            system.kind = 2; // kernel client
            system.num_ports = 2;
            let mut through = ClientInfo::for_client(14);
            through.set_name("Midi Through");
            through.kind = 2;
            through.num_ports = 1;
            state.clients.insert(0, through);
            state.clients.insert(0, system);

            for (addr, name) in [
                (Addr::new(0, 0), "Timer"),
                (Addr::new(0, 1), "Announce"),
                (Addr::new(14, 0), "Midi Through Port-0"),
            ] {
                let mut port = PortInfo::at(addr);
                port.set_name(name);
                state.ports.push(port);
            }
        }
        facility
    }

    /// Lock the facility state for scripting or inspection.
    pub fn state(&self) -> MutexGuard<'_, FacilityState> {
        // A panic while holding the lock only happens inside a failing test
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn opener(&self) -> MockOpener {
        MockOpener {
            state: Arc::clone(&self.state),
        }
    }

    /// Make every future `request` fail with `errno`.
    pub fn fail(&self, request: Request, errno: Errno) {
        self.state().failures.insert(request, errno);
    }

    /// Make the next `times` opens of `path` fail with `errno`.
    pub fn fail_open(&self, path: impl Into<PathBuf>, errno: Errno, times: usize) {
        self.state().fail_open.insert(path.into(), (errno, times));
    }

    pub fn transactions(&self) -> Vec<Request> {
        self.state().transactions.clone()
    }

    /// Descriptors currently open against this facility.
    pub fn open_descriptors(&self) -> usize {
        self.state().open_descriptors
    }

    pub fn open_attempts(&self) -> Vec<PathBuf> {
        self.state().open_attempts.clone()
    }

    pub fn open_flags(&self) -> Vec<OpenFlags> {
        self.state().open_flags.clone()
    }
}

/// Opens [`MockDevice`]s against a [`MockFacility`].
#[derive(Debug, Clone)]
pub struct MockOpener {
    state: Arc<Mutex<FacilityState>>,
}

impl DeviceOpener for MockOpener {
    fn open(&mut self, path: &Path, flags: OpenFlags) -> Result<Box<dyn Device>, Errno> {
        let mut state = lock(&self.state);
        state.open_attempts.push(path.to_path_buf());
        state.open_flags.push(flags);
        if let Some((errno, remaining)) = state.fail_open.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(*errno);
            }
        }
        state.open_descriptors += 1;
        state.flags = if flags.nonblock { libc::O_NONBLOCK } else { 0 };
        drop(state);
        Ok(Box::new(MockDevice {
            state: Arc::clone(&self.state),
            flags,
            closed: false,
        }))
    }
}

fn lock(state: &Mutex<FacilityState>) -> MutexGuard<'_, FacilityState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A descriptor on a [`MockFacility`].
#[derive(Debug)]
pub struct MockDevice {
    state: Arc<Mutex<FacilityState>>,
    flags: OpenFlags,
    closed: bool,
}

impl MockDevice {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).open_descriptors -= 1;
        }
    }
}

impl Device for MockDevice {
    fn control(&mut self, request: Request, record: &mut dyn WireRecord) -> Result<(), Errno> {
        check_record(request, &*record)?;
        let mut state = lock(&self.state);
        state.transactions.push(request);
        if let Some(errno) = state.failures.get(&request) {
            return Err(*errno);
        }
        state.answer(request, record)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.flags.access.readable() {
            return Err(Errno::EBADF);
        }
        let mut state = lock(&self.state);
        if buf.is_empty() {
            return Ok(0);
        }
        if state.loopback.is_empty() {
            return if state.nonblock() {
                Err(Errno::EAGAIN)
            } else {
                Ok(0)
            };
        }
        let n = buf.len().min(state.loopback.len());
        for (dst, src) in buf.iter_mut().zip(state.loopback.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.flags.access.writable() {
            return Err(Errno::EBADF);
        }
        lock(&self.state).loopback.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn status_flags(&mut self) -> Result<c_int, Errno> {
        Ok(lock(&self.state).flags)
    }

    fn set_status_flags(&mut self, flags: c_int) -> Result<(), Errno> {
        let mut state = lock(&self.state);
        if let Some(errno) = state.fail_set_flags {
            return Err(errno);
        }
        state.flags = flags;
        Ok(())
    }

    fn poll_fd(&self) -> RawFd {
        MOCK_FD
    }

    fn close(mut self: Box<Self>) -> Result<(), Errno> {
        self.release();
        match lock(&self.state).fail_close {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Allocator that fails on one chosen call and counts calls.
#[derive(Debug, Default)]
pub struct FailingAlloc {
    fail_on: Option<usize>,
    calls: usize,
}

impl FailingAlloc {
    /// Fail the `n`th allocation (1-based).
    pub fn on_call(n: usize) -> Self {
        Self {
            fail_on: Some(n),
            calls: 0,
        }
    }

    pub fn never() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl BufferAlloc for FailingAlloc {
    fn allocate(&mut self, len: usize) -> SeqResult<Vec<u8>> {
        self.calls += 1;
        if self.fail_on == Some(self.calls) {
            return Err(SeqError::OutOfMemory { bytes: len });
        }
        HeapAlloc.allocate(len)
    }
}
