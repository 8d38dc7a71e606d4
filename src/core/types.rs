/// Shared slot and descriptor types
///
/// Every map in the slot manager is keyed by [`SlotNumber`]; the descriptor
/// types here are the validated, in-memory form of one entry of
/// `telescopes.json`.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use strum::{AsRefStr, EnumIter, EnumString};

use super::validation::RejectReason;

pub const MIN_SLOT_NUMBER: u8 = 1;
pub const MAX_SLOT_NUMBER: u8 = 9;

pub const MIN_TCP_PORT: u16 = 1024;
pub const MAX_TCP_PORT: u16 = 65535;
pub const DEFAULT_TCP_PORT: u16 = 10000;

/// Connection delay bounds, in microseconds
pub const MIN_DELAY: u32 = 1;
pub const MAX_DELAY: u32 = 10_000_000;
pub const DEFAULT_DELAY: u32 = 500_000;

pub const MAX_CIRCLE_COUNT: usize = 10;

#[cfg(windows)]
pub const SERIAL_PORT_PREFIX: &str = "COM";
#[cfg(not(windows))]
pub const SERIAL_PORT_PREFIX: &str = "/dev/";

/// Version stamped into every document this crate writes.
pub const SCHEMA_VERSION: &str = "0.3.0";

/// A slot number inside `[MIN_SLOT_NUMBER, MAX_SLOT_NUMBER]`.
///
/// The only way to obtain one is through [`SlotNumber::new`] (or its
/// `TryFrom`/`FromStr` wrappers), so holding a `SlotNumber` means the range
/// check already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SlotNumber(u8);

impl SlotNumber {
    pub fn new(value: i64) -> Result<Self, RejectReason> {
        if value < MIN_SLOT_NUMBER as i64 || value > MAX_SLOT_NUMBER as i64 {
            return Err(RejectReason::SlotOutOfRange { value });
        }
        Ok(Self(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Every valid slot, ascending.
    pub fn all() -> impl Iterator<Item = SlotNumber> {
        (MIN_SLOT_NUMBER..=MAX_SLOT_NUMBER).map(SlotNumber)
    }

    /// TCP port suggested for a new descriptor at this slot.
    pub fn default_tcp_port(self) -> u16 {
        DEFAULT_TCP_PORT + self.0 as u16
    }
}

impl TryFrom<i64> for SlotNumber {
    type Error = RejectReason;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for SlotNumber {
    type Err = RejectReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|_| RejectReason::SlotKeyNotNumeric { key: s.to_string() })?;
        Self::new(value)
    }
}

impl fmt::Display for SlotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a slot reaches its telescope
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionKind {
    /// Simulated telescope, no I/O at all
    Virtual,
    /// Serial device, either driven in-process or bridged by a helper server
    Internal,
    /// TCP server on this machine
    Local,
    /// TCP server on another host
    Remote,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    EnumIter,
)]
pub enum Equinox {
    #[default]
    J2000,
    JNow,
}

impl fmt::Display for Equinox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Persisted description of how to (re)create the connection of one slot.
///
/// Optional fields are only meaningful for the connection kinds that require
/// them; see [`crate::core::validation::validate_descriptor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    pub name: String,
    pub connection_kind: ConnectionKind,
    pub equinox: Equinox,
    pub host: Option<String>,
    pub tcp_port: Option<u16>,
    /// Microseconds between communication attempts
    pub delay_micros: Option<u32>,
    pub connect_at_startup: bool,
    /// Field-of-view circle radii in degrees
    pub fov_circles: Vec<f64>,
    pub device_model_name: Option<String>,
    pub serial_port: Option<String>,
}

impl ConnectionDescriptor {
    /// A descriptor with only the fields every kind shares filled in.
    pub fn new(name: impl Into<String>, connection_kind: ConnectionKind) -> Self {
        Self {
            name: name.into(),
            connection_kind,
            equinox: Equinox::default(),
            host: None,
            tcp_port: None,
            delay_micros: None,
            connect_at_startup: false,
            fov_circles: Vec::new(),
            device_model_name: None,
            serial_port: None,
        }
    }

    pub fn with_equinox(mut self, equinox: Equinox) -> Self {
        self.equinox = equinox;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_tcp(mut self, tcp_port: u16, delay_micros: u32) -> Self {
        self.tcp_port = Some(tcp_port);
        self.delay_micros = Some(delay_micros);
        self
    }

    pub fn with_device(
        mut self,
        device_model_name: impl Into<String>,
        serial_port: impl Into<String>,
    ) -> Self {
        self.device_model_name = Some(device_model_name.into());
        self.serial_port = Some(serial_port.into());
        self
    }

    pub fn with_circles(mut self, circles: impl IntoIterator<Item = f64>) -> Self {
        self.fov_circles = circles.into_iter().collect();
        self
    }

    pub fn connect_at_startup(mut self, flag: bool) -> Self {
        self.connect_at_startup = flag;
        self
    }

    pub fn delay_or_default(&self) -> u32 {
        self.delay_micros.unwrap_or(DEFAULT_DELAY)
    }
}

/// Unit vector in the equatorial J2000 frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct J2000Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl J2000Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build from right ascension and declination, both in radians.
    pub fn from_ra_dec(ra: f64, dec: f64) -> Self {
        Self {
            x: dec.cos() * ra.cos(),
            y: dec.cos() * ra.sin(),
            z: dec.sin(),
        }
    }

    pub fn normalized(self) -> Self {
        let len = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if len == 0.0 {
            return self;
        }
        Self::new(self.x / len, self.y / len, self.z / len)
    }
}
