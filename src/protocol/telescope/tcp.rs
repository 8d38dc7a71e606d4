use anyhow::{anyhow, Context, Result};
use std::{
    io::{ErrorKind, Read},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use super::RetryPacer;
use crate::core::{
    client::TelescopeClient,
    logs::LogChannel,
    types::{Equinox, J2000Position},
};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Transport of a mount served over TCP
pub struct TcpClient {
    name: String,
    equinox: Equinox,
    address: SocketAddr,
    pacer: RetryPacer,
    stream: Option<TcpStream>,
    received: u64,
    circles: Vec<f64>,
}

impl TcpClient {
    /// Resolves `host` immediately; an unknown host fails construction.
    pub fn new(
        name: impl Into<String>,
        equinox: Equinox,
        host: &str,
        port: u16,
        delay_micros: u32,
    ) -> Result<Self> {
        let address = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("Unknown host {host}"))?
            .next()
            .ok_or_else(|| anyhow!("No address found for {host}"))?;
        Ok(Self {
            name: name.into(),
            equinox,
            address,
            pacer: RetryPacer::from_micros(delay_micros),
            stream: None,
            received: 0,
            circles: Vec::new(),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn equinox(&self) -> Equinox {
        self.equinox
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    fn try_connect(&mut self, log: &mut LogChannel) {
        match TcpStream::connect_timeout(&self.address, CONNECT_TIMEOUT) {
            Ok(stream) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    log::warn!("{}: can't make socket non-blocking: {err}", self.name);
                    return;
                }
                let _ = stream.set_nodelay(true);
                log::info!("{}: connected to {}", self.name, self.address);
                log.line(format_args!("{}: connected to {}", self.name, self.address));
                self.stream = Some(stream);
            }
            Err(err) => {
                log.line(format_args!("{}: connect to {} failed: {err}", self.name, self.address));
            }
        }
    }

    fn drop_stream(&mut self, log: &mut LogChannel, reason: &str) {
        if self.stream.take().is_some() {
            log::info!("{}: connection closed ({reason})", self.name);
            log.line(format_args!("{}: connection closed ({reason})", self.name));
        }
        self.pacer.reset();
    }
}

impl TelescopeClient for TcpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn has_known_position(&self) -> bool {
        false
    }

    fn prepare_communication(&mut self, log: &mut LogChannel) -> bool {
        if self.stream.is_none() && self.pacer.try_begin() {
            self.try_connect(log);
        }
        self.stream.is_some()
    }

    fn perform_communication(&mut self, log: &mut LogChannel) -> Result<()> {
        let mut buf = [0u8; 512];
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.drop_stream(log, "closed by server");
                    return Ok(());
                }
                Ok(n) => self.received += n as u64,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.drop_stream(log, "read error");
                    return Err(err).with_context(|| format!("{}: read failed", self.name));
                }
            }
        }
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
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}
