use anyhow::{anyhow, Result};
use clap::ArgMatches;
use serde::Serialize;
use std::{
    path::Path,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::config::BusConfig;
use crate::{
    api::ems::{EmsEngine, LoggingHandler, RecordingTransport},
    core::{
        bus::BusEvent,
        helpers::{format_hex, parse_hex_telegram, parse_number},
    },
    protocol::{
        ems::{
            codec::ProtocolVariant,
            devices::{DeviceRecord, BOILER_TYPES, THERMOSTAT_TYPES},
            queue::TxRequest,
            registry::RegistrySnapshot,
        },
        status::bus::StatusReport,
        tty,
    },
};

/// Dispatch to the one-shot mode selected on the command line, or serve the bus.
pub fn run(matches: &ArgMatches) -> Result<()> {
    let json = matches.get_flag("json");

    if matches.get_flag("list-ports") {
        return list_ports(json);
    }
    if matches.get_flag("list-devices") {
        return list_devices(json);
    }

    let config = load_config(matches)?;
    let reads = matches
        .get_many::<String>("read")
        .into_iter()
        .flatten()
        .map(String::as_str)
        .map(parse_read_spec)
        .collect::<Result<Vec<_>>>()?;
    let raws: Vec<String> = matches
        .get_many::<String>("raw")
        .into_iter()
        .flatten()
        .cloned()
        .collect();

    if let Some(hex) = matches.get_one::<String>("checksum") {
        return print_checksum(hex, config.protocol, json);
    }
    if let Some(path) = matches.get_one::<String>("replay") {
        let summary = replay(&config, Path::new(path), &reads, &raws)?;
        return print_replay(&summary, json);
    }
    serve(&config, &reads, &raws, json)
}

/// Configuration file (if any) with command line overrides applied.
fn load_config(matches: &ArgMatches) -> Result<BusConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => BusConfig::from_file(Path::new(path))?,
        None => BusConfig::default(),
    };
    if let Some(port) = matches.get_one::<String>("port") {
        config.port_name = port.clone();
    }
    if let Some(&baud_rate) = matches.get_one::<u32>("baud-rate") {
        config.baud_rate = baud_rate;
    }
    if let Some(protocol) = matches.get_one::<String>("protocol") {
        config.protocol = ProtocolVariant::from_str(protocol)
            .map_err(|_| anyhow!("Unknown protocol {protocol}, expected ems or irt"))?;
    }
    if matches.get_flag("listen-only") {
        config.listen_only = true;
    }
    if let Some(watch) = matches.get_one::<String>("watch") {
        config.watch_type = Some(parse_number(watch)?);
    }
    Ok(config)
}

/// `TYPE:DEST`, both decimal or hex.
pub fn parse_read_spec(spec: &str) -> Result<(u16, u8)> {
    let (type_id, dest) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected TYPE:DEST, got {spec}"))?;
    let type_id = parse_number(type_id)?;
    let dest = u8::try_from(parse_number(dest)?)
        .map_err(|_| anyhow!("Destination {dest} is not a bus id"))?;
    Ok((type_id, dest))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_ports(json: bool) -> Result<()> {
    let ports = tty::available_ports_sorted();
    if json {
        let names: Vec<_> = ports.iter().map(|p| p.port_name.clone()).collect();
        return print_json(&names);
    }
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        println!("{}", tty::describe_port(port));
    }
    Ok(())
}

fn list_devices(json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct DeviceTables {
        boilers: &'static [DeviceRecord],
        thermostats: &'static [DeviceRecord],
    }

    if json {
        return print_json(&DeviceTables {
            boilers: BOILER_TYPES,
            thermostats: THERMOSTAT_TYPES,
        });
    }

    println!("Boilers:");
    for record in BOILER_TYPES {
        println!(
            "  [Type ID: 0x{:02X}] Product ID:{:<3} {}",
            record.type_id, record.product_id, record.name
        );
    }
    println!("Thermostats:");
    for record in THERMOSTAT_TYPES {
        let access = match (record.read_supported, record.write_supported) {
            (true, true) => "read/write",
            (true, false) => "read only",
            _ => "not supported",
        };
        println!(
            "  [Type ID: 0x{:02X}] Product ID:{:<3} {} ({}, {access})",
            record.type_id, record.product_id, record.name, record.model
        );
    }
    Ok(())
}

fn print_checksum(hex: &str, protocol: ProtocolVariant, json: bool) -> Result<()> {
    let body = parse_hex_telegram(hex)?;
    let codec = protocol.codec();
    let checksum = codec.checksum(&body);
    let sealed = codec.seal(body);
    if json {
        return print_json(&serde_json::json!({
            "protocol": protocol.to_string(),
            "checksum": checksum,
            "telegram": format_hex(&sealed),
        }));
    }
    println!("CRC=0x{checksum:02X}  {}", format_hex(&sealed));
    Ok(())
}

/// What a replay left behind.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub status: StatusReport,
    pub devices: RegistrySnapshot,
    pub queue: Vec<TxRequest>,
    pub transmitted: Vec<String>,
}

/// Feed every frame in `path` (hex, one per line, `#` starts a comment) through an engine
/// that only records what it would have sent.
pub fn replay(
    config: &BusConfig,
    path: &Path,
    reads: &[(u16, u8)],
    raws: &[String],
) -> Result<ReplaySummary> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| anyhow!("Failed to read {}: {err}", path.display()))?;

    let recorder = RecordingTransport::new();
    let mut engine = config.builder()?.build_engine(Box::new(recorder.clone()));
    queue_requests(&mut engine, reads, raws)?;

    let mut frames = 0;
    for (number, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let frame = parse_hex_telegram(line)
            .map_err(|err| anyhow!("{}:{}: {err}", path.display(), number + 1))?;
        let event = engine.on_frame_received(&frame);
        log::debug!("{line} -> {event:?}");
        frames += 1;
    }

    Ok(ReplaySummary {
        frames,
        status: engine.status_report(),
        devices: engine.device_registry_snapshot(),
        queue: engine.tx_queue_snapshot(),
        transmitted: recorder.sent().iter().map(|f| format_hex(f)).collect(),
    })
}

fn queue_requests(engine: &mut EmsEngine, reads: &[(u16, u8)], raws: &[String]) -> Result<()> {
    for &(type_id, dest) in reads {
        engine.enqueue_read(type_id, dest, true)?;
    }
    for raw in raws {
        engine.enqueue_raw_hex(raw)?;
    }
    Ok(())
}

fn print_replay(summary: &ReplaySummary, json: bool) -> Result<()> {
    if json {
        return print_json(summary);
    }
    println!("Replayed {} frames", summary.frames);
    print_status(&summary.status, false)?;
    print_devices(&summary.devices);
    println!("Queue ({} pending):", summary.queue.len());
    for request in &summary.queue {
        println!("  {request}");
    }
    println!("Transmitted:");
    for frame in &summary.transmitted {
        println!("  {frame}");
    }
    Ok(())
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }
    println!(
        "Bus {} | rx {} tx {} crc errors {} retries {} | tx {} | queue {}",
        report.health,
        report.rx_packets,
        report.tx_packets,
        report.crc_errors,
        report.retry_count,
        report.tx_status,
        report.queue_len
    );
    Ok(())
}

fn print_devices(devices: &RegistrySnapshot) {
    match &devices.boiler {
        Some(boiler) => println!("Boiler: {boiler}"),
        None => println!("Boiler: none"),
    }
    match &devices.thermostat {
        Some(thermostat) => println!("Thermostat: {thermostat}"),
        None => println!("Thermostat: none"),
    }
}

/// Run the bus until Ctrl-C, printing status at the configured interval.
fn serve(config: &BusConfig, reads: &[(u16, u8)], raws: &[String], json: bool) -> Result<()> {
    if config.port_name.is_empty() {
        return Err(anyhow!("No serial port given. Use --port or a config file"));
    }

    let bus = config.builder()?.add_hook(Arc::new(LoggingHandler)).spawn()?;
    bus.discover_devices()?;
    for &(type_id, dest) in reads {
        bus.enqueue_read(type_id, dest, true)?;
    }
    for raw in raws {
        bus.enqueue_raw_hex(raw)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::Release))
            .map_err(|err| anyhow!("Failed to install Ctrl-C handler: {err}"))?;
    }

    while running.load(Ordering::Acquire) {
        match bus.events().recv_timeout(Duration::from_millis(200)) {
            Ok(BusEvent::Status(report)) => print_status(&report, json)?,
            Ok(BusEvent::DeviceFound(device)) if !json => println!("{} found: {device}", device.kind),
            Ok(BusEvent::Stopped) => break,
            Ok(_) | Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Shutting down");
    if !json {
        print_devices(&bus.device_registry_snapshot()?);
    }
    bus.stop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_spec() -> Result<()> {
        assert_eq!(parse_read_spec("0x18:0x08")?, (0x18, 0x08));
        assert_eq!(parse_read_spec("145:23")?, (0x91, 0x17));
        assert!(parse_read_spec("0x18").is_err());
        assert!(parse_read_spec("0x18:0x108").is_err());
        Ok(())
    }

    #[test]
    fn test_replay_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("emsbus-replay-{}.txt", std::process::id()));
        std::fs::write(
            &path,
            "# boiler answers a version broadcast\n\
             08 0B 02 00 48 01 03 53\n\
             8B\n\
             \n\
             08 0B 18 00 2D 01 C2 64 00 62  # fast monitor\n",
        )?;

        let summary = replay(&BusConfig::default(), &path, &[], &[])?;
        std::fs::remove_file(&path)?;

        assert_eq!(summary.frames, 3);
        assert_eq!(
            summary.devices.boiler.map(|b| b.record.product_id),
            Some(72)
        );
        // the poll sent the first read of the fetch plan, the fast monitor answered it
        assert_eq!(summary.transmitted[0], "0B 88 18 00 20 D4");
        assert_eq!(summary.status.rx_packets, 1);
        assert_eq!(summary.queue.len(), 4);
        Ok(())
    }
}
