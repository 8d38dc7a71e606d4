/// Built-in telescope connections
///
/// These implement [`TelescopeClient`] for the init strings produced by the
/// slot manager. Only the transport is handled here; command framing of the
/// individual mount protocols lives outside this crate.
pub mod serial;
pub mod simulator;
pub mod tcp;

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::core::client::{ClientFactory, ClientInit, TelescopeClient, DUMMY_SERVER};

pub use serial::SerialClient;
pub use simulator::SimulatorClient;
pub use tcp::TcpClient;

/// Spaces out (re)connection attempts by the slot's delay
#[derive(Debug, Clone)]
pub struct RetryPacer {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl RetryPacer {
    pub fn from_micros(delay_micros: u32) -> Self {
        Self {
            interval: Duration::from_micros(delay_micros as u64),
            last_attempt: None,
        }
    }

    /// Whether an attempt may be made now. Records the attempt if so.
    pub fn try_begin(&mut self) -> bool {
        let now = Instant::now();
        match self.last_attempt {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_attempt = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_attempt = None;
    }
}

/// Factory used when the front end does not provide its own
#[derive(Debug, Default)]
pub struct BuiltinClientFactory;

impl ClientFactory for BuiltinClientFactory {
    fn create(&mut self, init: &ClientInit) -> Result<Box<dyn TelescopeClient>> {
        let client: Box<dyn TelescopeClient> = match init {
            ClientInit::Dummy { name, equinox } => {
                Box::new(SimulatorClient::new(name.clone(), *equinox))
            }
            ClientInit::Embedded {
                name,
                server,
                equinox,
                ..
            } if server == DUMMY_SERVER => Box::new(SimulatorClient::new(name.clone(), *equinox)),
            ClientInit::Embedded {
                name,
                server,
                equinox,
                serial_port,
                delay_micros,
            } => Box::new(SerialClient::new(
                name.clone(),
                server.clone(),
                *equinox,
                serial_port.clone(),
                *delay_micros,
            )),
            ClientInit::Tcp {
                name,
                equinox,
                host,
                port,
                delay_micros,
            } => Box::new(TcpClient::new(
                name.clone(),
                *equinox,
                host,
                *port,
                *delay_micros,
            )?),
        };
        log::info!("Created telescope connection {init}");
        Ok(client)
    }
}
