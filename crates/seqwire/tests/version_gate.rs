//! Per-operation protocol gating through a full session.

use seqwire::mock::{FailingAlloc, MockFacility};
use seqwire::wire::{
    ClientInfo, PortInfo, QueueInfo, QueueTempo, UmpInfoKind, DEFAULT_TEMPO_BASE,
};
use seqwire::{
    Feature, HwConnector, OpenMode, ProtocolVersion, Request, SeqError, Session, Streams,
};

fn open_at(facility: &MockFacility) -> Session {
    HwConnector::new()
        .with_opener(facility.opener())
        .with_allocator(FailingAlloc::never())
        .open(None, Streams::Duplex, OpenMode::BLOCKING)
        .unwrap()
}

/// Make the facility report nonsense in fields a 1.0.1 kernel never fills.
fn garble_clients(facility: &MockFacility) {
    for client in facility.state().clients.iter_mut() {
        client.card = 0x5a5a;
        client.pid = 0x7777;
    }
}

#[test]
fn test_feature_minimums() {
    let cases = [
        (Feature::RunningMode, ProtocolVersion::new(1, 0, 0)),
        (Feature::ClientCardPid, ProtocolVersion::new(1, 0, 2)),
        (Feature::MidiPacket, ProtocolVersion::new(1, 0, 3)),
        (Feature::UmpInfo, ProtocolVersion::new(1, 0, 3)),
        (Feature::UserVersionAnnounce, ProtocolVersion::new(1, 0, 3)),
        (Feature::QueueTempoBase, ProtocolVersion::new(1, 0, 4)),
    ];
    for (feature, minimum) in cases {
        assert_eq!(feature.minimum(), minimum);
        assert!(minimum.supports(feature));
    }
    assert!(!ProtocolVersion::new(1, 0, 3).supports(Feature::QueueTempoBase));
}

#[test]
fn test_card_pid_masked_on_1_0_1() {
    let facility = MockFacility::with_system_clients(ProtocolVersion::new(1, 0, 1));
    garble_clients(&facility);
    let mut session = open_at(&facility);

    let mut info = ClientInfo::for_client(128);
    session.ops().get_client_info(&mut info).unwrap();
    assert_eq!(info.card, -1);
    assert_eq!(info.pid, -1);
}

#[test]
fn test_card_pid_trusted_on_1_0_2() {
    let facility = MockFacility::new(ProtocolVersion::new(1, 0, 2));
    garble_clients(&facility);
    let mut session = open_at(&facility);

    let mut info = ClientInfo::for_client(128);
    session.ops().get_client_info(&mut info).unwrap();
    assert_eq!(info.card, 0x5a5a);
    assert_eq!(info.pid, 0x7777);
}

#[test]
fn test_query_next_client_masked_on_1_0_1() {
    let facility = MockFacility::with_system_clients(ProtocolVersion::new(1, 0, 1));
    garble_clients(&facility);
    let mut session = open_at(&facility);

    let mut info = ClientInfo::for_client(-1);
    let mut seen = Vec::new();
    while session.ops().query_next_client(&mut info).is_ok() {
        assert_eq!((info.card, info.pid), (-1, -1));
        seen.push((info.client, info.name()));
    }
    assert_eq!(
        seen,
        vec![
            (0, "System".to_string()),
            (14, "Midi Through".to_string()),
            (128, String::new())
        ]
    );
}

#[test]
fn test_midi_version_rejected_on_1_0_2() {
    let facility = MockFacility::new(ProtocolVersion::new(1, 0, 2));
    let mut session = open_at(&facility);
    let before = facility.transactions().len();

    let mut info = ClientInfo::for_client(128);
    info.midi_version = 1;
    let err = session.ops().set_client_info(&info).unwrap_err();
    assert!(matches!(err, SeqError::InvalidArgument(_)));
    assert_eq!(err.code(), -libc::EINVAL);
    assert_eq!(facility.transactions().len(), before);
    assert_eq!(session.packet_size(), 28);
}

#[test]
fn test_ump_info_not_supported_on_1_0_2() {
    let facility = MockFacility::new(ProtocolVersion::new(1, 0, 2));
    let mut session = open_at(&facility);
    let before = facility.transactions().len();

    let mut buf = [0u8; 512];
    let err = session
        .ops()
        .get_ump_info(128, UmpInfoKind::Endpoint, &mut buf)
        .unwrap_err();
    assert!(matches!(err, SeqError::NotSupported(_)));
    assert_eq!(err.code(), -libc::ENOTTY);

    let err = session
        .ops()
        .set_ump_info(UmpInfoKind::Block(0), &buf)
        .unwrap_err();
    assert!(matches!(err, SeqError::NotSupported(_)));
    assert_eq!(facility.transactions().len(), before);
}

#[test]
fn test_ump_endpoint_round_trip() {
    let facility = MockFacility::new(ProtocolVersion::new(1, 0, 3));
    let mut session = open_at(&facility);

    let mut endpoint = [0u8; 328];
    endpoint[..4].copy_from_slice(&3i32.to_ne_bytes());
    endpoint[8..14].copy_from_slice(b"Synth\0");
    session
        .ops()
        .set_ump_info(UmpInfoKind::Endpoint, &endpoint)
        .unwrap();

    let mut out = [0u8; 328];
    session
        .ops()
        .get_ump_info(128, UmpInfoKind::Endpoint, &mut out)
        .unwrap();
    assert_eq!(&out[..4], &(-1i32).to_ne_bytes());
    assert_eq!(&out[8..14], b"Synth\0");
}

#[test]
fn test_tempo_base_defaulted_before_1_0_4() {
    let facility = MockFacility::new(ProtocolVersion::new(1, 0, 3));
    facility.state().tempo_base_reported = 12345;
    let mut session = open_at(&facility);

    let mut queue = QueueInfo::default();
    session.ops().create_queue(&mut queue).unwrap();
    let mut tempo = QueueTempo {
        queue: queue.queue,
        ..QueueTempo::default()
    };
    session.ops().get_queue_tempo(&mut tempo).unwrap();
    assert_eq!(tempo.tempo_base, DEFAULT_TEMPO_BASE);
    assert!(!session.tempo_base_supported());
}

#[test]
fn test_port_enumeration() {
    let facility = MockFacility::with_system_clients(ProtocolVersion::new(1, 0, 4));
    let mut session = open_at(&facility);

    let mut info = PortInfo::default();
    session.ops().get_port_info(&mut info).unwrap();
    let mut names = vec![info.name()];
    while session.ops().query_next_port(&mut info).is_ok() {
        names.push(info.name());
    }
    assert_eq!(names, vec!["Timer", "Announce"]);

    let mut created = PortInfo::default();
    created.set_name("out");
    session.ops().create_port(&mut created).unwrap();
    assert_eq!(created.addr.client, 128);
    assert_eq!(created.addr.port, 0);
    session.ops().delete_port(&created).unwrap();
    assert!(session.ops().get_port_info(&mut created).is_err());

    assert!(facility.transactions().contains(&Request::DeletePort));
}
