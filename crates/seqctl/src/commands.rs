//! CLI command implementations

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::debug;

use seqconf::{ConfigSources, DeviceConfig, SeqConfig};
use seqwire::mock::MockFacility;
use seqwire::wire::{Addr, ClientInfo, PortInfo, SystemInfo};
use seqwire::{
    Errno, Feature, HwConnector, OpenMode, SeqError, SeqResult, Session, Streams, SEQ_VERSION,
};

/// Where commands open their session.
pub struct Target {
    pub device: DeviceConfig,
    pub dry_run: bool,
}

impl Target {
    fn open(&self) -> Result<Session> {
        let mode = OpenMode {
            nonblock: self.device.nonblock,
        };
        let mut connector = HwConnector::from_config(&self.device);
        debug!(
            path = %self.device.path.display(),
            dry_run = self.dry_run,
            nonblock = mode.nonblock,
            "opening session"
        );
        let session = if self.dry_run {
            let facility = MockFacility::with_system_clients(SEQ_VERSION);
            connector
                .with_opener(facility.opener())
                .open(Some("default"), Streams::Duplex, mode)
        } else {
            connector.open(Some("default"), Streams::Duplex, mode)
        };
        let session =
            session.with_context(|| format!("Failed to open {}", self.device.path.display()))?;
        debug!(client = %session.client_id(), version = %session.version(), "session open");
        Ok(session)
    }
}

/// Turn the end-of-listing `ENOENT` into `None`; anything else is an error.
fn next_entry(result: SeqResult<()>) -> SeqResult<Option<()>> {
    match result {
        Ok(()) => Ok(Some(())),
        Err(SeqError::Sys(Errno::ENOENT)) => Ok(None),
        Err(err) => Err(err),
    }
}

fn client_kind(kind: i32) -> &'static str {
    match kind {
        1 => "user",
        2 => "kernel",
        _ => "unknown",
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct InfoReport {
    kind: String,
    protocol: String,
    client: u8,
    name: String,
    packet_mode: String,
    tempo_base: bool,
    limits: Limits,
}

#[derive(Serialize)]
struct Limits {
    queues: i32,
    clients: i32,
    ports: i32,
    channels: i32,
    cur_clients: i32,
    cur_queues: i32,
}

/// Protocol, own client and system limits
pub fn info(target: &Target, json: bool) -> Result<()> {
    let mut session = target.open()?;

    let mut system = SystemInfo::default();
    session
        .ops()
        .system_info(&mut system)
        .context("SYSTEM_INFO failed")?;
    let mut own = ClientInfo::for_client(i32::from(session.client_id().0));
    session
        .ops()
        .get_client_info(&mut own)
        .context("GET_CLIENT_INFO failed")?;

    let report = InfoReport {
        kind: session.kind().to_string(),
        protocol: session.version().to_string(),
        client: session.client_id().0,
        name: own.name(),
        packet_mode: format!("{:?}", session.packet_mode()),
        tempo_base: session.tempo_base_supported(),
        limits: Limits {
            queues: system.queues,
            clients: system.clients,
            ports: system.ports,
            channels: system.channels,
            cur_clients: system.cur_clients,
            cur_queues: system.cur_queues,
        },
    };
    session.close()?;

    if json {
        return print_json(&report);
    }
    println!("{} {}", "Transport:".bright_cyan(), report.kind);
    println!("{} {}", "Protocol:".bright_cyan(), report.protocol.bright_green());
    println!("{} {} {}", "Client:".bright_cyan(), report.client, report.name.dimmed());
    println!("{} {}", "Packets:".bright_cyan(), report.packet_mode);
    println!("{} {}", "Tempo base:".bright_cyan(), report.tempo_base);
    let l = &report.limits;
    println!(
        "{} {}/{} clients, {}/{} queues, {} ports, {} channels",
        "Limits:".bright_cyan(),
        l.cur_clients,
        l.clients,
        l.cur_queues,
        l.queues,
        l.ports,
        l.channels
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct ClientRow {
    client: i32,
    name: String,
    kind: &'static str,
    ports: i32,
    card: i32,
    pid: i32,
}

fn list_clients(session: &mut Session) -> Result<Vec<ClientRow>> {
    let mut rows = Vec::new();
    let mut info = ClientInfo::for_client(-1);
    while next_entry(session.ops().query_next_client(&mut info))
        .with_context(|| format!("QUERY_NEXT_CLIENT after client {} failed", info.client))?
        .is_some()
    {
        rows.push(ClientRow {
            client: info.client,
            name: info.name(),
            kind: client_kind(info.kind),
            ports: info.num_ports,
            card: info.card,
            pid: info.pid,
        });
    }
    Ok(rows)
}

/// Enumerate clients with QUERY_NEXT_CLIENT
pub fn clients(target: &Target, json: bool) -> Result<()> {
    let mut session = target.open()?;
    let rows = list_clients(&mut session)?;
    session.close()?;

    if json {
        return print_json(&rows);
    }
    for row in &rows {
        println!(
            "{:>3}  {:<32} {:<7} {} port(s)",
            row.client.bright_green(),
            row.name,
            row.kind.dimmed(),
            row.ports
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PortRow {
    client: u8,
    port: u8,
    name: String,
    capability: u32,
    kind: u32,
}

fn list_ports(session: &mut Session, client: u8) -> Result<Vec<PortRow>> {
    let mut rows = Vec::new();
    let mut info = PortInfo::at(Addr::new(client, u8::MAX));
    while next_entry(session.ops().query_next_port(&mut info))
        .with_context(|| {
            format!(
                "QUERY_NEXT_PORT after {}:{} failed",
                info.addr.client, info.addr.port
            )
        })?
        .is_some()
    {
        rows.push(PortRow {
            client: info.addr.client,
            port: info.addr.port,
            name: info.name(),
            capability: info.capability,
            kind: info.kind,
        });
        if info.addr.port == u8::MAX {
            break;
        }
    }
    Ok(rows)
}

/// Enumerate one client's ports with QUERY_NEXT_PORT
pub fn ports(target: &Target, client: u8, json: bool) -> Result<()> {
    let mut session = target.open()?;
    let rows = list_ports(&mut session, client)?;
    debug!(client, count = rows.len(), "ports listed");
    session.close()?;

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("{}", format!("client {client} has no ports").dimmed());
    }
    for row in &rows {
        println!(
            "{}:{}  {}",
            row.client.bright_green(),
            row.port.bright_green(),
            row.name
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct VersionReport {
    seqctl: &'static str,
    protocol: String,
    features: Vec<FeatureRow>,
}

#[derive(Serialize)]
struct FeatureRow {
    feature: String,
    minimum: String,
}

/// Protocol version and feature gates of this build
pub fn version(json: bool) -> Result<()> {
    let report = VersionReport {
        seqctl: env!("CARGO_PKG_VERSION"),
        protocol: SEQ_VERSION.to_string(),
        features: Feature::ALL
            .iter()
            .map(|f| FeatureRow {
                feature: format!("{f:?}"),
                minimum: f.minimum().to_string(),
            })
            .collect(),
    };

    if json {
        return print_json(&report);
    }
    println!("seqctl {}", report.seqctl);
    println!("{} {}", "Protocol:".bright_cyan(), report.protocol.bright_green());
    for row in &report.features {
        println!("  {:<22} >= {}", row.feature, row.minimum);
    }
    Ok(())
}

/// Effective configuration plus the files and variables it came from
pub fn show_config(config: &SeqConfig, sources: &ConfigSources) {
    print!("{}", config.to_toml());
    if !sources.files.is_empty() || !sources.env_overrides.is_empty() {
        println!();
    }
    for path in &sources.files {
        println!("{}", format!("# loaded {}", path.display()).dimmed());
    }
    for var in &sources.env_overrides {
        println!("{}", format!("# overridden by ${var}").dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqwire::mock::{FailingAlloc, MockFacility};
    use seqwire::Request;

    fn open_on(facility: &MockFacility) -> Session {
        HwConnector::new()
            .with_opener(facility.opener())
            .with_allocator(FailingAlloc::never())
            .open(None, Streams::Duplex, OpenMode::BLOCKING)
            .unwrap()
    }

    #[test]
    fn test_list_clients_stops_at_enoent() {
        let facility = MockFacility::with_system_clients(SEQ_VERSION);
        let mut session = open_on(&facility);
        let ids: Vec<i32> = list_clients(&mut session)
            .unwrap()
            .iter()
            .map(|r| r.client)
            .collect();
        assert_eq!(ids, vec![0, 14, 128]);
    }

    #[test]
    fn test_list_clients_reports_other_errors() {
        let facility = MockFacility::with_system_clients(SEQ_VERSION);
        facility.fail(Request::QueryNextClient, Errno::EBUSY);
        let mut session = open_on(&facility);

        let err = list_clients(&mut session).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SeqError>(),
            Some(&SeqError::Sys(Errno::EBUSY))
        );
    }

    #[test]
    fn test_list_ports_reports_other_errors() {
        let facility = MockFacility::with_system_clients(SEQ_VERSION);
        let mut session = open_on(&facility);
        assert_eq!(list_ports(&mut session, 0).unwrap().len(), 2);
        assert!(list_ports(&mut session, 99).unwrap().is_empty());

        facility.fail(Request::QueryNextPort, Errno::EBUSY);
        let err = list_ports(&mut session, 0).unwrap_err();
        assert!(err.to_string().contains("QUERY_NEXT_PORT"));
    }
}
