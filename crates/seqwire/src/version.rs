//! Protocol version negotiation and feature gating.
//!
//! The kernel reports a packed `major.minor.patch` triple at open time.
//! Everything version-sensitive in the transport asks [`ProtocolVersion::supports`]
//! rather than comparing raw integers.

use std::cmp::Ordering;
use std::fmt;

/// A sequencer protocol version, ordered lexicographically on
/// `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Decode the kernel's packed form, `major << 16 | minor << 8 | patch`.
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            major: ((raw >> 16) & 0xffff) as u16,
            minor: ((raw >> 8) & 0xff) as u8,
            patch: (raw & 0xff) as u8,
        }
    }

    pub const fn to_raw(self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | self.patch as u32
    }

    /// Whether this (negotiated) version provides `feature`.
    pub fn supports(self, feature: Feature) -> bool {
        self >= feature.minimum()
    }

    /// Whether a transport speaking `user` may talk to a kernel at `self`.
    ///
    /// Major and minor together form the protocol epoch; only the patch
    /// level may differ.
    pub fn is_compatible_with(self, user: ProtocolVersion) -> bool {
        self.major == user.major && self.minor == user.minor
    }

    /// Ordering against another version; same as `Ord::cmp`.
    pub fn compare(self, other: ProtocolVersion) -> Ordering {
        self.cmp(&other)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The protocol version this transport implements.
pub const SEQ_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 4);

/// Version-gated capabilities of the kernel sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `card` and `pid` in client info carry real values.
    ClientCardPid,
    /// Clients may switch to UMP (MIDI 2.0 packet) events.
    MidiPacket,
    /// Per-client UMP endpoint and block info get/set.
    UmpInfo,
    /// The kernel accepts the library's own protocol version.
    UserVersionAnnounce,
    /// Queue tempo carries a configurable tempo base.
    QueueTempoBase,
    /// The kernel accepts a byte-order/word-size announcement.
    RunningMode,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::ClientCardPid,
        Feature::MidiPacket,
        Feature::UmpInfo,
        Feature::UserVersionAnnounce,
        Feature::QueueTempoBase,
        Feature::RunningMode,
    ];

    pub const fn minimum(self) -> ProtocolVersion {
        match self {
            Feature::ClientCardPid => ProtocolVersion::new(1, 0, 2),
            Feature::MidiPacket | Feature::UmpInfo | Feature::UserVersionAnnounce => {
                ProtocolVersion::new(1, 0, 3)
            }
            Feature::QueueTempoBase => ProtocolVersion::new(1, 0, 4),
            Feature::RunningMode => ProtocolVersion::new(1, 0, 0),
        }
    }
}
