use anyhow::{Context, Result};
use serialport::SerialPort;
use std::{io::Read, time::Duration};

use super::RetryPacer;
use crate::core::{
    client::TelescopeClient,
    logs::LogChannel,
    types::{Equinox, J2000Position},
};

/// LX200 and NexStar mounts both talk at 9600 8N1.
pub const MOUNT_BAUD_RATE: u32 = 9600;

const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Transport of a serial mount driven by an embedded server
pub struct SerialClient {
    name: String,
    server: String,
    equinox: Equinox,
    port_name: String,
    pacer: RetryPacer,
    port: Option<Box<dyn SerialPort>>,
    received: u64,
    circles: Vec<f64>,
}

impl SerialClient {
    /// The port is opened lazily by the first communication tick.
    pub fn new(
        name: impl Into<String>,
        server: impl Into<String>,
        equinox: Equinox,
        port_name: impl Into<String>,
        delay_micros: u32,
    ) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            equinox,
            port_name: port_name.into(),
            pacer: RetryPacer::from_micros(delay_micros),
            port: None,
            received: 0,
            circles: Vec::new(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn equinox(&self) -> Equinox {
        self.equinox
    }

    fn try_open(&mut self, log: &mut LogChannel) {
        match serialport::new(&self.port_name, MOUNT_BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()
        {
            Ok(port) => {
                log::info!("{}: opened {}", self.name, self.port_name);
                log.line(format_args!("{}: opened {}", self.name, self.port_name));
                self.port = Some(port);
            }
            Err(err) => {
                log.line(format_args!("{}: can't open {}: {err}", self.name, self.port_name));
            }
        }
    }
}

impl TelescopeClient for SerialClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn has_known_position(&self) -> bool {
        false
    }

    fn prepare_communication(&mut self, log: &mut LogChannel) -> bool {
        if self.port.is_none() && self.pacer.try_begin() {
            self.try_open(log);
        }
        self.port.is_some()
    }

    fn perform_communication(&mut self, log: &mut LogChannel) -> Result<()> {
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };
        let pending = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(err) => {
                self.port = None;
                log.line(format_args!("{}: {} lost: {err}", self.name, self.port_name));
                return Err(err).with_context(|| format!("{}: serial port lost", self.name));
            }
        };
        if pending == 0 {
            return Ok(());
        }

        let mut buf = vec![0u8; pending];
        let read = port
            .read(&mut buf)
            .with_context(|| format!("{}: read from {} failed", self.name, self.port_name))?;
        self.received += read as u64;
        Ok(())
    }

    /// Transport only: the mount command set lives in a downstream client.
    fn goto_position(&mut self, target: J2000Position) {
        log::debug!(
            "{}: goto ({:.4}, {:.4}, {:.4}) not sent, no frame codec on this transport",
            self.name,
            target.x,
            target.y,
            target.z
        );
    }

    fn add_fov_circle(&mut self, radius_degrees: f64) {
        self.circles.push(radius_degrees);
    }

    fn fov_circles(&self) -> &[f64] {
        &self.circles
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            log::info!("{}: closed {}", self.name, self.port_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_port_is_retried_later() {
        let mut client = SerialClient::new(
            "Scope",
            "TelescopeServerNexStar",
            Equinox::J2000,
            "/dev/scopeslot-missing-port",
            10_000_000,
        );
        let mut log = LogChannel::Discard;
        assert!(!client.prepare_communication(&mut log));
        assert!(!client.prepare_communication(&mut log));
        assert!(!client.is_connected());
        assert!(client.perform_communication(&mut log).is_ok());
        assert_eq!(client.server(), "TelescopeServerNexStar");

        client.goto_position(J2000Position::new(1.0, 0.0, 0.0));
        assert!(!client.is_connected());
    }
}
