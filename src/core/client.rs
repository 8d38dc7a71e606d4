/// Connection objects and how they are built
///
/// A slot's live connection is a [`TelescopeClient`]. The slot manager never
/// looks inside one: it builds a [`ClientInit`] from the descriptor, hands it
/// to a [`ClientFactory`] and afterwards only drives the client through the
/// trait.
use anyhow::{anyhow, Result};
use std::fmt;

use super::{
    device_models::{DeviceModel, EMBEDDED_SERVERS},
    logs::LogChannel,
    types::{ConnectionDescriptor, ConnectionKind, Equinox, J2000Position, SlotNumber},
};

/// Server name the simulator answers to in init strings
pub const DUMMY_SERVER: &str = EMBEDDED_SERVERS[0];

pub trait TelescopeClient: Send {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn has_known_position(&self) -> bool;

    /// Last known pointing, if any.
    fn position(&self) -> Option<J2000Position> {
        None
    }

    /// Get ready for this tick's exchange. Returning `false` skips
    /// [`TelescopeClient::perform_communication`] for this tick.
    fn prepare_communication(&mut self, log: &mut LogChannel) -> bool;

    fn perform_communication(&mut self, log: &mut LogChannel) -> Result<()>;

    /// Point the mount at `target`. Clients without a mount command set
    /// (the bare TCP and serial transports) only log the request; framing
    /// is left to a client that wraps them.
    fn goto_position(&mut self, target: J2000Position);

    fn add_fov_circle(&mut self, radius_degrees: f64);

    fn fov_circles(&self) -> &[f64];

    fn disconnect(&mut self);
}

/// Connection parameters in the form the factory consumes.
///
/// The [`fmt::Display`] form is the colon separated init string,
/// `name:type:equinox[:params]`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInit {
    /// Simulated mount
    Dummy { name: String, equinox: Equinox },
    /// Serial mount driven by an in-process server implementation
    Embedded {
        name: String,
        server: String,
        equinox: Equinox,
        serial_port: String,
        delay_micros: u32,
    },
    /// Mount reached over TCP, possibly through a local helper server
    Tcp {
        name: String,
        equinox: Equinox,
        host: String,
        port: u16,
        delay_micros: u32,
    },
}

impl ClientInit {
    /// Build the init parameters of a validated descriptor.
    ///
    /// `model` must be the catalog entry of the descriptor's device model
    /// when the connection is [`ConnectionKind::Internal`].
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        model: Option<&DeviceModel>,
    ) -> Result<Self> {
        // ':' separates init string fields
        let name = descriptor.name.replace(':', "_");
        let equinox = descriptor.equinox;
        let delay_micros = descriptor.delay_or_default();
        let tcp_port = || {
            descriptor
                .tcp_port
                .ok_or_else(|| anyhow!("No TCP port for {}", descriptor.name))
        };

        let init = match descriptor.connection_kind {
            ConnectionKind::Virtual => ClientInit::Dummy { name, equinox },
            ConnectionKind::Internal => {
                let model = model.ok_or_else(|| {
                    anyhow!(
                        "No device model {:?} for {}",
                        descriptor.device_model_name,
                        descriptor.name
                    )
                })?;
                if model.use_executable {
                    ClientInit::Tcp {
                        name,
                        equinox,
                        host: "localhost".into(),
                        port: tcp_port()?,
                        delay_micros,
                    }
                } else {
                    ClientInit::Embedded {
                        name,
                        server: model.server.clone(),
                        equinox,
                        serial_port: descriptor
                            .serial_port
                            .clone()
                            .ok_or_else(|| anyhow!("No serial port for {}", descriptor.name))?,
                        delay_micros,
                    }
                }
            }
            ConnectionKind::Local => ClientInit::Tcp {
                name,
                equinox,
                host: "localhost".into(),
                port: tcp_port()?,
                delay_micros,
            },
            ConnectionKind::Remote => ClientInit::Tcp {
                name,
                equinox,
                host: descriptor
                    .host
                    .clone()
                    .ok_or_else(|| anyhow!("No host name for {}", descriptor.name))?,
                port: tcp_port()?,
                delay_micros,
            },
        };
        Ok(init)
    }

    pub fn name(&self) -> &str {
        match self {
            ClientInit::Dummy { name, .. }
            | ClientInit::Embedded { name, .. }
            | ClientInit::Tcp { name, .. } => name,
        }
    }

    pub fn equinox(&self) -> Equinox {
        match self {
            ClientInit::Dummy { equinox, .. }
            | ClientInit::Embedded { equinox, .. }
            | ClientInit::Tcp { equinox, .. } => *equinox,
        }
    }
}

impl fmt::Display for ClientInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientInit::Dummy { name, equinox } => write!(f, "{name}:{DUMMY_SERVER}:{equinox}"),
            ClientInit::Embedded {
                name,
                server,
                equinox,
                serial_port,
                delay_micros,
            } => write!(f, "{name}:{server}:{equinox}:{serial_port}:{delay_micros}"),
            ClientInit::Tcp {
                name,
                equinox,
                host,
                port,
                delay_micros,
            } => write!(f, "{name}:TCP:{equinox}:{host}:{port}:{delay_micros}"),
        }
    }
}

/// Produces connection objects from init parameters
pub trait ClientFactory: Send {
    fn create(&mut self, init: &ClientInit) -> Result<Box<dyn TelescopeClient>>;
}

/// Build the connection of a slot and attach the descriptor's circles.
pub fn create_connection(
    factory: &mut dyn ClientFactory,
    slot: SlotNumber,
    descriptor: &ConnectionDescriptor,
    model: Option<&DeviceModel>,
) -> Result<Box<dyn TelescopeClient>> {
    let init = ClientInit::from_descriptor(descriptor, model)?;
    log::debug!("Creating connection for slot {slot}: {init}");
    let mut client = factory.create(&init)?;
    for radius in &descriptor.fov_circles {
        client.add_fov_circle(*radius);
    }
    Ok(client)
}

/// Access to whatever currently holds the "selected object".
///
/// A connection that is selected must be deselected before it is dropped.
pub trait ObjectSelection: Send {
    fn selected_connection_for_slot(&self, slot: SlotNumber) -> bool;

    fn deselect(&mut self);
}

/// Selection stand-in for front ends without object selection
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSelection;

impl ObjectSelection for NoSelection {
    fn selected_connection_for_slot(&self, _slot: SlotNumber) -> bool {
        false
    }

    fn deselect(&mut self) {}
}
