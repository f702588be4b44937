//! Session construction: open, negotiate, allocate, bind.

use std::ffi::c_long;
use std::path::{Path, PathBuf};

use seqconf::DeviceConfig;
use tracing::{debug, trace, warn};

use crate::buffers::{BufferAlloc, Buffers, HeapAlloc};
use crate::device::{Device, DeviceOpener, OpenFlags, SystemOpener};
use crate::error::{SeqError, SeqResult};
use crate::hw::HwSeq;
use crate::ops::ClientId;
use crate::request::Request;
use crate::session::{OpenMode, Session, Streams};
use crate::version::{Feature, ProtocolVersion, SEQ_VERSION};
use crate::wire::RunningInfo;

/// The sequencer character device.
pub const DEVICE_PATH: &str = DeviceConfig::DEFAULT_PATH;

/// Opening this node asks the kernel to load the sequencer module.
pub const BOOTSTRAP_DEVICE_PATH: &str = DeviceConfig::DEFAULT_BOOTSTRAP_PATH;

/// Keys a configuration node may carry without affecting the hw transport.
pub const GENERIC_CONF_KEYS: [&str; 3] = ["comment", "type", "hint"];

/// What to do when the device node cannot be opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceFallback {
    /// Report the open failure.
    #[default]
    None,
    /// Open and close this node once, then retry the device.
    Bootstrap(PathBuf),
}

/// Builds hw sessions.
///
/// The opener and allocator are pluggable so construction can run against
/// [`crate::mock`] facilities.
#[derive(Debug, Clone)]
pub struct HwConnector<O = SystemOpener, A = HeapAlloc> {
    device_path: PathBuf,
    fallback: DeviceFallback,
    opener: O,
    alloc: A,
}

impl HwConnector {
    pub fn new() -> Self {
        Self {
            device_path: PathBuf::from(DEVICE_PATH),
            fallback: DeviceFallback::None,
            opener: SystemOpener,
            alloc: HeapAlloc,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new().configure(config)
    }
}

impl Default for HwConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DeviceOpener, A: BufferAlloc> HwConnector<O, A> {
    /// Take the device path and fallback from `config`.
    pub fn configure(mut self, config: &DeviceConfig) -> Self {
        self.device_path = config.path.clone();
        self.fallback = match &config.bootstrap {
            Some(path) => DeviceFallback::Bootstrap(path.clone()),
            None => DeviceFallback::None,
        };
        self
    }

    pub fn with_opener<P: DeviceOpener>(self, opener: P) -> HwConnector<P, A> {
        HwConnector {
            device_path: self.device_path,
            fallback: self.fallback,
            opener,
            alloc: self.alloc,
        }
    }

    pub fn with_allocator<B: BufferAlloc>(self, alloc: B) -> HwConnector<O, B> {
        HwConnector {
            device_path: self.device_path,
            fallback: self.fallback,
            opener: self.opener,
            alloc,
        }
    }

    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    pub fn with_fallback(mut self, fallback: DeviceFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    pub fn fallback(&self) -> &DeviceFallback {
        &self.fallback
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Open a session on the device.
    ///
    /// Any failure after the device is open closes it before returning.
    pub fn open(
        &mut self,
        name: Option<&str>,
        streams: Streams,
        mode: OpenMode,
    ) -> SeqResult<Session> {
        let flags = OpenFlags {
            access: streams.access(),
            nonblock: mode.nonblock,
        };
        let mut device = self.open_device(flags)?;

        let negotiated = negotiate(device.as_mut(), streams, &mut self.alloc);
        let (version, client, buffers) = match negotiated {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(errno) = device.close() {
                    warn!(%errno, "closing device after failed open");
                }
                return Err(err);
            }
        };

        announce_running_mode(device.as_mut(), client);

        debug!(
            name = name.unwrap_or(""),
            %version,
            %client,
            %streams,
            nonblock = mode.nonblock,
            "sequencer session open"
        );
        let ops = Box::new(HwSeq::new(device, version, client));
        Ok(Session::new(
            name.map(str::to_owned),
            streams,
            mode,
            buffers,
            ops,
        ))
    }

    /// Open from a configuration node. Only [`GENERIC_CONF_KEYS`] are
    /// accepted; the device itself is not touched when the node is rejected.
    pub fn open_from_conf(
        &mut self,
        name: Option<&str>,
        conf: &toml::Table,
        streams: Streams,
        mode: OpenMode,
    ) -> SeqResult<Session> {
        check_conf(conf)?;
        self.open(name, streams, mode)
    }

    fn open_device(&mut self, flags: OpenFlags) -> SeqResult<Box<dyn Device>> {
        match self.opener.open(&self.device_path, flags) {
            Ok(device) => return Ok(device),
            Err(errno) => {
                let DeviceFallback::Bootstrap(bootstrap) = &self.fallback else {
                    debug!(path = %self.device_path.display(), %errno, "device open failed");
                    return Err(SeqError::Sys(errno));
                };
                debug!(
                    path = %self.device_path.display(),
                    bootstrap = %bootstrap.display(),
                    %errno,
                    "device open failed, trying bootstrap node"
                );
                match self.opener.open(bootstrap, flags) {
                    Ok(node) => {
                        if let Err(errno) = node.close() {
                            trace!(%errno, "closing bootstrap node failed");
                        }
                    }
                    Err(errno) => trace!(%errno, "bootstrap node open failed"),
                }
            }
        }
        self.opener
            .open(&self.device_path, flags)
            .map_err(SeqError::Sys)
    }
}

/// Reject configuration nodes carrying anything but generic keys.
pub fn check_conf(conf: &toml::Table) -> SeqResult<()> {
    for key in conf.keys() {
        if !GENERIC_CONF_KEYS.contains(&key.as_str()) {
            warn!(key = %key, "unknown field in hw sequencer definition");
            return Err(SeqError::Config(format!("unknown field {key}")));
        }
    }
    Ok(())
}

/// Steps between opening the device and binding the session. Leaves the
/// device open; the caller closes it on error.
fn negotiate(
    device: &mut dyn Device,
    streams: Streams,
    alloc: &mut dyn BufferAlloc,
) -> SeqResult<(ProtocolVersion, ClientId, Buffers)> {
    let mut raw = 0i32;
    device.control(Request::Pversion, &mut raw).map_err(|errno| {
        warn!(%errno, "PVERSION failed");
        SeqError::Sys(errno)
    })?;
    let version = ProtocolVersion::from_raw(raw as u32);
    if !version.is_compatible_with(SEQ_VERSION) {
        warn!(kernel = %version, user = %SEQ_VERSION, "incompatible sequencer protocol");
        return Err(SeqError::IncompatibleVersion {
            kernel: version,
            user: SEQ_VERSION,
        });
    }
    trace!(%version, "kernel protocol version");

    if version.supports(Feature::UserVersionAnnounce) {
        announce_user_version(device);
    }

    let buffers = Buffers::allocate(streams, alloc).inspect_err(|err| {
        warn!(%err, "buffer allocation failed");
    })?;

    let mut id = 0i32;
    device.control(Request::ClientId, &mut id).map_err(|errno| {
        warn!(%errno, "CLIENT_ID failed");
        SeqError::Sys(errno)
    })?;
    let client = u8::try_from(id)
        .map(ClientId)
        .map_err(|_| SeqError::InvalidArgument("client number out of range"))?;

    Ok((version, client, buffers))
}

/// Tell the kernel which protocol this library speaks. The kernel only uses
/// this to pick record layouts, so failure is not an error.
fn announce_user_version(device: &mut dyn Device) {
    let mut raw = SEQ_VERSION.to_raw() as i32;
    if let Err(errno) = device.control(Request::UserPversion, &mut raw) {
        debug!(%errno, "USER_PVERSION not accepted");
    }
}

/// Describe this process's byte order and word size for 32/64-bit
/// translation. Failure is not an error.
fn announce_running_mode(device: &mut dyn Device, client: ClientId) {
    let mut info = RunningInfo {
        client: client.0,
        big_endian: u8::from(cfg!(target_endian = "big")),
        cpu_mode: std::mem::size_of::<c_long>() as u8,
        ..RunningInfo::default()
    };
    if let Err(errno) = device.control(Request::RunningMode, &mut info) {
        debug!(%errno, "RUNNING_MODE not accepted");
    }
}

/// Open a session on [`DEVICE_PATH`] with the default opener and allocator.
pub fn open(name: Option<&str>, streams: Streams, mode: OpenMode) -> SeqResult<Session> {
    HwConnector::new().open(name, streams, mode)
}

/// [`open`] from a configuration node.
pub fn open_from_conf(
    name: Option<&str>,
    conf: &toml::Table,
    streams: Streams,
    mode: OpenMode,
) -> SeqResult<Session> {
    HwConnector::new().open_from_conf(name, conf, streams, mode)
}
