//! The closed table of sequencer control requests.
//!
//! Each request pairs a command number under ioctl type `'S'` with the
//! record it carries. Codes are built with the Linux `_IOC` encoding for the
//! target architecture.

use std::mem::size_of;

use crate::wire::{
    ClientInfo, ClientPool, ClientUmpInfo, PortInfo, PortSubscribe, QuerySubs, QueueClient,
    QueueInfo, QueueStatus, QueueTempo, QueueTimer, RemoveEvents, RunningInfo, SystemInfo,
};

const IOC_TYPE_SEQ: u32 = b'S' as u32;

#[cfg(any(
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
mod ioc {
    pub const READ: u32 = 2;
    pub const WRITE: u32 = 4;
    pub const SIZE_BITS: u32 = 13;
}

#[cfg(not(any(
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
mod ioc {
    pub const READ: u32 = 2;
    pub const WRITE: u32 = 1;
    pub const SIZE_BITS: u32 = 14;
}

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + ioc::SIZE_BITS;

/// Data direction of a request, from user space's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `_IOR`: the kernel fills the record.
    Read,
    /// `_IOW`: the kernel only reads the record.
    Write,
    /// `_IOWR`: the record is sent and overwritten with the reply.
    ReadWrite,
}

impl Direction {
    const fn bits(self) -> u32 {
        match self {
            Direction::Read => ioc::READ,
            Direction::Write => ioc::WRITE,
            Direction::ReadWrite => ioc::READ | ioc::WRITE,
        }
    }
}

/// `_IOC(dir, 'S', nr, size)`.
pub const fn ioc(dir: Direction, nr: u32, size: usize) -> u32 {
    (dir.bits() << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | (IOC_TYPE_SEQ << IOC_TYPESHIFT)
        | (nr << IOC_NRSHIFT)
}

/// One control transaction understood by the kernel sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    Pversion,
    ClientId,
    SystemInfo,
    RunningMode,
    UserPversion,
    GetClientInfo,
    SetClientInfo,
    GetClientUmpInfo,
    SetClientUmpInfo,
    CreatePort,
    DeletePort,
    GetPortInfo,
    SetPortInfo,
    SubscribePort,
    UnsubscribePort,
    CreateQueue,
    DeleteQueue,
    GetQueueInfo,
    SetQueueInfo,
    GetNamedQueue,
    GetQueueStatus,
    GetQueueTempo,
    SetQueueTempo,
    GetQueueTimer,
    SetQueueTimer,
    GetQueueClient,
    SetQueueClient,
    GetClientPool,
    SetClientPool,
    RemoveEvents,
    QuerySubs,
    GetSubscription,
    QueryNextClient,
    QueryNextPort,
}

impl Request {
    pub const ALL: [Request; 34] = [
        Request::Pversion,
        Request::ClientId,
        Request::SystemInfo,
        Request::RunningMode,
        Request::UserPversion,
        Request::GetClientInfo,
        Request::SetClientInfo,
        Request::GetClientUmpInfo,
        Request::SetClientUmpInfo,
        Request::CreatePort,
        Request::DeletePort,
        Request::GetPortInfo,
        Request::SetPortInfo,
        Request::SubscribePort,
        Request::UnsubscribePort,
        Request::CreateQueue,
        Request::DeleteQueue,
        Request::GetQueueInfo,
        Request::SetQueueInfo,
        Request::GetNamedQueue,
        Request::GetQueueStatus,
        Request::GetQueueTempo,
        Request::SetQueueTempo,
        Request::GetQueueTimer,
        Request::SetQueueTimer,
        Request::GetQueueClient,
        Request::SetQueueClient,
        Request::GetClientPool,
        Request::SetClientPool,
        Request::RemoveEvents,
        Request::QuerySubs,
        Request::GetSubscription,
        Request::QueryNextClient,
        Request::QueryNextPort,
    ];

    /// Command number, direction and record size.
    pub const fn encoding(self) -> (u32, Direction, usize) {
        use Direction::{Read, ReadWrite, Write};
        match self {
            Request::Pversion => (0x00, Read, size_of::<i32>()),
            Request::ClientId => (0x01, Read, size_of::<i32>()),
            Request::SystemInfo => (0x02, ReadWrite, size_of::<SystemInfo>()),
            Request::RunningMode => (0x03, ReadWrite, size_of::<RunningInfo>()),
            Request::UserPversion => (0x04, Write, size_of::<i32>()),
            Request::GetClientInfo => (0x10, ReadWrite, size_of::<ClientInfo>()),
            Request::SetClientInfo => (0x11, Write, size_of::<ClientInfo>()),
            Request::GetClientUmpInfo => (0x12, ReadWrite, size_of::<ClientUmpInfo>()),
            Request::SetClientUmpInfo => (0x13, ReadWrite, size_of::<ClientUmpInfo>()),
            Request::CreatePort => (0x20, ReadWrite, size_of::<PortInfo>()),
            Request::DeletePort => (0x21, Write, size_of::<PortInfo>()),
            Request::GetPortInfo => (0x22, ReadWrite, size_of::<PortInfo>()),
            Request::SetPortInfo => (0x23, Write, size_of::<PortInfo>()),
            Request::SubscribePort => (0x30, Write, size_of::<PortSubscribe>()),
            Request::UnsubscribePort => (0x31, Write, size_of::<PortSubscribe>()),
            Request::CreateQueue => (0x32, ReadWrite, size_of::<QueueInfo>()),
            Request::DeleteQueue => (0x33, Write, size_of::<QueueInfo>()),
            Request::GetQueueInfo => (0x34, ReadWrite, size_of::<QueueInfo>()),
            Request::SetQueueInfo => (0x35, ReadWrite, size_of::<QueueInfo>()),
            Request::GetNamedQueue => (0x36, ReadWrite, size_of::<QueueInfo>()),
            Request::GetQueueStatus => (0x40, ReadWrite, size_of::<QueueStatus>()),
            Request::GetQueueTempo => (0x41, ReadWrite, size_of::<QueueTempo>()),
            Request::SetQueueTempo => (0x42, Write, size_of::<QueueTempo>()),
            Request::GetQueueTimer => (0x45, ReadWrite, size_of::<QueueTimer>()),
            Request::SetQueueTimer => (0x46, Write, size_of::<QueueTimer>()),
            Request::GetQueueClient => (0x49, ReadWrite, size_of::<QueueClient>()),
            Request::SetQueueClient => (0x4a, Write, size_of::<QueueClient>()),
            Request::GetClientPool => (0x4b, ReadWrite, size_of::<ClientPool>()),
            Request::SetClientPool => (0x4c, Write, size_of::<ClientPool>()),
            Request::RemoveEvents => (0x4e, Write, size_of::<RemoveEvents>()),
            Request::QuerySubs => (0x4f, ReadWrite, size_of::<QuerySubs>()),
            Request::GetSubscription => (0x50, ReadWrite, size_of::<PortSubscribe>()),
            Request::QueryNextClient => (0x51, ReadWrite, size_of::<ClientInfo>()),
            Request::QueryNextPort => (0x52, ReadWrite, size_of::<PortInfo>()),
        }
    }

    /// The ioctl request number.
    pub const fn code(self) -> u32 {
        let (nr, dir, size) = self.encoding();
        ioc(dir, nr, size)
    }

    pub const fn record_size(self) -> usize {
        self.encoding().2
    }

    /// Kernel-header style name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            Request::Pversion => "PVERSION",
            Request::ClientId => "CLIENT_ID",
            Request::SystemInfo => "SYSTEM_INFO",
            Request::RunningMode => "RUNNING_MODE",
            Request::UserPversion => "USER_PVERSION",
            Request::GetClientInfo => "GET_CLIENT_INFO",
            Request::SetClientInfo => "SET_CLIENT_INFO",
            Request::GetClientUmpInfo => "GET_CLIENT_UMP_INFO",
            Request::SetClientUmpInfo => "SET_CLIENT_UMP_INFO",
            Request::CreatePort => "CREATE_PORT",
            Request::DeletePort => "DELETE_PORT",
            Request::GetPortInfo => "GET_PORT_INFO",
            Request::SetPortInfo => "SET_PORT_INFO",
            Request::SubscribePort => "SUBSCRIBE_PORT",
            Request::UnsubscribePort => "UNSUBSCRIBE_PORT",
            Request::CreateQueue => "CREATE_QUEUE",
            Request::DeleteQueue => "DELETE_QUEUE",
            Request::GetQueueInfo => "GET_QUEUE_INFO",
            Request::SetQueueInfo => "SET_QUEUE_INFO",
            Request::GetNamedQueue => "GET_NAMED_QUEUE",
            Request::GetQueueStatus => "GET_QUEUE_STATUS",
            Request::GetQueueTempo => "GET_QUEUE_TEMPO",
            Request::SetQueueTempo => "SET_QUEUE_TEMPO",
            Request::GetQueueTimer => "GET_QUEUE_TIMER",
            Request::SetQueueTimer => "SET_QUEUE_TIMER",
            Request::GetQueueClient => "GET_QUEUE_CLIENT",
            Request::SetQueueClient => "SET_QUEUE_CLIENT",
            Request::GetClientPool => "GET_CLIENT_POOL",
            Request::SetClientPool => "SET_CLIENT_POOL",
            Request::RemoveEvents => "REMOVE_EVENTS",
            Request::QuerySubs => "QUERY_SUBS",
            Request::GetSubscription => "GET_SUBSCRIPTION",
            Request::QueryNextClient => "QUERY_NEXT_CLIENT",
            Request::QueryNextPort => "QUERY_NEXT_PORT",
        }
    }
}

#[cfg(all(
    test,
    not(any(
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "sparc",
        target_arch = "sparc64"
    ))
))]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_codes() {
        // Values from <sound/asequencer.h> on x86/arm.
        assert_eq!(Request::Pversion.code(), 0x8004_5300);
        assert_eq!(Request::ClientId.code(), 0x8004_5301);
        assert_eq!(Request::UserPversion.code(), 0x4004_5304);
        assert_eq!(Request::SystemInfo.code(), 0xc030_5302);
        assert_eq!(Request::GetClientInfo.code(), 0xc0bc_5310);
        assert_eq!(Request::SetClientInfo.code(), 0x40bc_5311);
        assert_eq!(Request::GetClientUmpInfo.code(), 0xc208_5312);
        assert_eq!(Request::GetQueueTempo.code(), 0xc02c_5341);
    }

    #[test]
    fn test_codes_unique() {
        let codes: HashSet<u32> = Request::ALL.iter().map(|r| r.code()).collect();
        assert_eq!(codes.len(), Request::ALL.len());
        let names: HashSet<&str> = Request::ALL.iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), Request::ALL.len());
    }

    #[test]
    fn test_code_encodes_record_size() {
        for req in Request::ALL {
            let size = (req.code() >> 16) & 0x3fff;
            assert_eq!(size as usize, req.record_size(), "{}", req.name());
            assert_eq!((req.code() >> 8) & 0xff, b'S' as u32);
        }
    }
}
