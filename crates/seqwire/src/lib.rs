//! seqwire - versioned transport to the ALSA kernel sequencer
//!
//! Opens `/dev/snd/seq`, negotiates the protocol version with the kernel,
//! and hands back a [`Session`] whose operations go through a [`SeqOps`]
//! dispatch table.
//!
//! ## Version Gate
//!
//! The kernel reports its protocol as `major.minor.patch`. Sessions are only
//! opened when major and minor match [`SEQ_VERSION`]; patch levels gate
//! individual features (see [`Feature`]):
//! - 1.0.2: client card and pid in client info
//! - 1.0.3: MIDI 2.0 packets, UMP endpoint/block info, user version announce
//! - 1.0.4: queue tempo base
//!
//! Fields an older kernel would silently ignore are rejected before any
//! transaction; fields it would fill with garbage are masked on the way out.
//!
//! ## Packet Records
//!
//! Events cross the descriptor as fixed-size records: 28-byte legacy
//! [`wire::Event`] until the client sets a MIDI version, 32-byte
//! [`wire::UmpEvent`] after.
//!
//! ## Testing Without A Kernel
//!
//! [`mock::MockFacility`] answers control requests in memory and
//! [`mock::FailingAlloc`] injects allocation failures; both plug into
//! [`HwConnector`].
//!
//! ```rust,no_run
//! use seqwire::{OpenMode, Streams};
//!
//! let mut session = seqwire::open(Some("default"), Streams::Duplex, OpenMode::BLOCKING)?;
//! println!("client {} on protocol {}", session.client_id(), session.version());
//! session.close()?;
//! # Ok::<(), seqwire::SeqError>(())
//! ```

pub mod buffers;
pub mod device;
pub mod error;
pub mod hw;
pub mod legacy;
pub mod mock;
pub mod open;
pub mod ops;
pub mod request;
pub mod session;
pub mod version;
pub mod wire;

pub use buffers::{BufferAlloc, HeapAlloc};
pub use device::{Device, DeviceOpener, SystemOpener};
pub use error::{Errno, SeqError, SeqResult, ERROR_INCOMPATIBLE_VERSION};
pub use hw::HwSeq;
pub use open::{open, open_from_conf, DeviceFallback, HwConnector};
pub use ops::{ClientId, SeqKind, SeqOps};
pub use request::Request;
pub use session::{OpenMode, Session, Streams};
pub use version::{Feature, ProtocolVersion, SEQ_VERSION};
pub use wire::PacketMode;
