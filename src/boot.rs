use anyhow::{bail, Result};
use chrono::Local;
use clap::ArgMatches;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::{self, Write};

use crate::cli::actions;

/// Environment variable naming a file that receives the diagnostic log
pub const LOG_FILE_ENV: &str = "SCOPESLOT_LOG_FILE";

/// Logger setup shared by every entry point.
pub fn init_common() {
    match std::env::var(LOG_FILE_ENV).ok() {
        Some(path) => {
            if let Err(err) = init_file_logger(&path) {
                eprintln!("Failed to initialize file logger at '{path}': {err}");
                init_stderr_logger();
            }
        }
        None => init_stderr_logger(),
    }
}

fn init_stderr_logger() {
    let _ = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Stderr)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .try_init()
        .map_err(io::Error::other)?;

    log::info!("File logger initialized at {path}");
    Ok(())
}

/// Dispatch the parsed command line.
pub fn start(matches: &ArgMatches) -> Result<()> {
    let data_dir = actions::data_dir(matches)?;
    let json = matches.get_flag("json");
    log::debug!("Using data directory {data_dir:?}");

    match matches.subcommand() {
        Some(("list", _)) => actions::list(&data_dir, json),
        Some(("models", _)) => actions::models(&data_dir, json),
        Some(("ports", _)) => actions::ports(json),
        Some(("add", sub)) => actions::add(&data_dir, sub),
        Some(("remove", sub)) => actions::remove(&data_dir, sub),
        Some(("config", sub)) => actions::config(&data_dir, sub),
        Some(("run", sub)) => actions::run(&data_dir, sub),
        Some((other, _)) => bail!("Unknown command {other}"),
        None => bail!("No command given, see --help"),
    }
}
