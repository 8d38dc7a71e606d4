use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::{
    core::{
        bus::{channels, SlotCommand, SlotEvent},
        runtime::{run_tick_loop, RuntimeConfig},
        settings::Settings,
        slots::AsSlot,
        types::{ConnectionDescriptor, ConnectionKind, Equinox, SlotNumber, DEFAULT_DELAY},
        validation::{requires, RequiredField},
        SlotManager,
    },
    protocol::tty::available_ports_sorted,
};

#[derive(Serialize)]
struct SlotRow<'a> {
    slot: SlotNumber,
    name: &'a str,
    connection: &'a str,
    equinox: &'a str,
    endpoint: String,
    connect_at_startup: bool,
    circles: &'a [f64],
}

fn endpoint(descriptor: &ConnectionDescriptor) -> String {
    match descriptor.connection_kind {
        ConnectionKind::Virtual => "simulator".into(),
        ConnectionKind::Internal => format!(
            "{} on {}",
            descriptor.device_model_name.as_deref().unwrap_or("?"),
            descriptor.serial_port.as_deref().unwrap_or("?")
        ),
        ConnectionKind::Local => format!("localhost:{}", descriptor.tcp_port.unwrap_or_default()),
        ConnectionKind::Remote => format!(
            "{}:{}",
            descriptor.host.as_deref().unwrap_or("?"),
            descriptor.tcp_port.unwrap_or_default()
        ),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

/// Data directory from `--data-dir`, defaulting to the working directory.
pub fn data_dir(matches: &ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("data-dir") {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => std::env::current_dir().context("Failed to resolve the working directory"),
    }
}

fn open_manager(data_dir: &Path) -> SlotManager {
    let mut manager = SlotManager::new(data_dir, Settings::load(data_dir));
    manager.load();
    manager
}

pub fn list(data_dir: &Path, json: bool) -> Result<()> {
    let manager = open_manager(data_dir);
    let descriptors = manager.store().snapshot();
    let rows: Vec<SlotRow> = descriptors
        .iter()
        .map(|(slot, descriptor)| SlotRow {
            slot: *slot,
            name: &descriptor.name,
            connection: descriptor.connection_kind.as_ref(),
            equinox: descriptor.equinox.as_ref(),
            endpoint: endpoint(descriptor),
            connect_at_startup: descriptor.connect_at_startup,
            circles: &descriptor.fov_circles,
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No telescopes configured");
    }
    for row in rows {
        println!(
            "{}: {} [{}, {}] {}{}",
            row.slot,
            row.name,
            row.connection,
            row.equinox,
            row.endpoint,
            if row.connect_at_startup { " (autostart)" } else { "" }
        );
    }
    Ok(())
}

pub fn models(data_dir: &Path, json: bool) -> Result<()> {
    let manager = SlotManager::new(data_dir, Settings::load(data_dir));
    let models: Vec<_> = manager.catalog().models().collect();
    if json {
        return print_json(&models);
    }
    for model in models {
        let driver = if model.use_executable {
            "executable"
        } else {
            "embedded"
        };
        println!("{} ({}, {driver})", model.name, model.server);
    }
    Ok(())
}

pub fn ports(json: bool) -> Result<()> {
    let ports = available_ports_sorted();
    if json {
        return print_json(&ports);
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn descriptor_from_args(
    manager: &SlotManager,
    slot: SlotNumber,
    matches: &ArgMatches,
) -> Result<ConnectionDescriptor> {
    let name = matches
        .get_one::<String>("name")
        .ok_or_else(|| anyhow!("--name is required"))?;
    let kind: ConnectionKind = matches
        .get_one::<String>("kind")
        .ok_or_else(|| anyhow!("--kind is required"))?
        .parse()
        .map_err(|_| anyhow!("Unknown connection kind, expected virtual, internal, local or remote"))?;
    let equinox: Equinox = matches
        .get_one::<String>("equinox")
        .map(|value| value.parse())
        .transpose()
        .map_err(|_| anyhow!("Unknown equinox, expected J2000 or JNow"))?
        .unwrap_or_default();

    let mut descriptor = ConnectionDescriptor::new(name.clone(), kind)
        .with_equinox(equinox)
        .connect_at_startup(matches.get_flag("autostart"));
    if let Some(circles) = matches.get_many::<f64>("circle") {
        descriptor = descriptor.with_circles(circles.copied());
    }
    if requires(kind, RequiredField::Host) {
        descriptor.host = matches.get_one::<String>("host").cloned();
    }
    if requires(kind, RequiredField::DeviceModel) {
        descriptor.device_model_name = matches.get_one::<String>("device-model").cloned();
        descriptor.serial_port = matches.get_one::<String>("serial-port").cloned();
    }
    if requires(kind, RequiredField::TcpPort) {
        let port = matches
            .get_one::<i64>("tcp-port")
            .copied()
            .unwrap_or(slot.default_tcp_port() as i64);
        let port = u16::try_from(port).map_err(|_| anyhow!("TCP port {port} is out of range"))?;
        let default_delay = descriptor
            .device_model_name
            .as_deref()
            .and_then(|model| manager.catalog().get(model))
            .map(|model| model.default_delay)
            .unwrap_or(DEFAULT_DELAY);
        let delay = matches
            .get_one::<i64>("delay")
            .copied()
            .unwrap_or(default_delay as i64);
        let delay = u32::try_from(delay).map_err(|_| anyhow!("Delay {delay} is out of range"))?;
        descriptor = descriptor.with_tcp(port, delay);
    }
    Ok(descriptor)
}

pub fn add(data_dir: &Path, matches: &ArgMatches) -> Result<()> {
    let mut manager = open_manager(data_dir);
    let slot = matches
        .get_one::<i64>("slot")
        .copied()
        .ok_or_else(|| anyhow!("A slot number is required"))?
        .as_slot()?;
    let descriptor = descriptor_from_args(&manager, slot, matches)?;
    manager.add(slot, descriptor)?;
    manager.save()?;
    println!("Slot {slot} configured");
    Ok(())
}

pub fn remove(data_dir: &Path, matches: &ArgMatches) -> Result<()> {
    let mut manager = open_manager(data_dir);
    let slot = matches
        .get_one::<i64>("slot")
        .copied()
        .ok_or_else(|| anyhow!("A slot number is required"))?;
    manager.remove(slot)?;
    manager.save()?;
    println!("Slot {slot} removed");
    Ok(())
}

pub fn config(data_dir: &Path, matches: &ArgMatches) -> Result<()> {
    let mut manager = SlotManager::new(data_dir, Settings::load(data_dir));
    let mut changed = false;

    if let Some(dir) = matches.get_one::<String>("server-dir") {
        manager.set_server_executables_directory_path(dir)?;
        changed = true;
    }
    if let Some(enabled) = matches.get_one::<bool>("use-server-executables") {
        manager.set_use_server_executables(*enabled);
        changed = true;
    }
    if let Some(enabled) = matches.get_one::<bool>("use-server-logs") {
        manager.set_use_server_logs(*enabled);
        changed = true;
    }
    let mut settings = manager.settings().clone();
    if let Some(interval) = matches.get_one::<u64>("tick-interval") {
        settings.tick_interval_ms = *interval;
        changed = true;
    }

    if changed {
        settings.save(data_dir)?;
    }
    print!("{}", toml::to_string_pretty(&settings).context("Failed to serialize settings")?);
    Ok(())
}

/// Drive every started slot until Ctrl-C.
pub fn run(data_dir: &Path, matches: &ArgMatches) -> Result<()> {
    let settings = Settings::load(data_dir);
    let tick_interval = settings.tick_interval();
    let mut manager = SlotManager::new(data_dir, settings);
    if manager.catalog().is_empty() {
        log::error!("No telescope device models are available, internal connections will fail");
    }

    let report = manager.load_and_autostart();
    log::info!(
        "{} telescopes configured, {} entries dropped",
        report.accepted,
        report.rejected.len()
    );

    let (bus, commands, events) = channels();
    if let Some(slots) = matches.get_many::<i64>("start") {
        for slot in slots {
            bus.command_tx
                .send(SlotCommand::Start(slot.as_slot()?))
                .map_err(|err| anyhow!("Failed to queue start of slot {slot}: {err}"))?;
        }
    }

    let quit_tx = bus.command_tx.clone();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(SlotCommand::Quit);
    })
    .context("Failed to install Ctrl-C handler")?;

    let event_rx = bus.event_rx.clone();
    let printer = std::thread::spawn(move || {
        while let Ok(event) = event_rx.recv() {
            match event {
                SlotEvent::Started(slot) => println!("Slot {slot} started"),
                SlotEvent::Stopped(slot) => println!("Slot {slot} stopped"),
                SlotEvent::ConnectionChanged { slot, connected } => println!(
                    "Slot {slot} {}",
                    if connected { "connected" } else { "disconnected" }
                ),
                SlotEvent::CommandFailed(err) => eprintln!("{err}"),
                SlotEvent::Quit => break,
            }
        }
    });
    drop(bus);

    let result = run_tick_loop(
        commands,
        events,
        &mut manager,
        RuntimeConfig {
            tick_interval,
            ..RuntimeConfig::default()
        },
    );
    let _ = printer.join();
    result
}
