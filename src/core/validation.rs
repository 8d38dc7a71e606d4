/// Descriptor validation
///
/// Which optional fields a descriptor needs depends on its connection kind.
/// That mapping lives in one table ([`KIND_RULES`]) so that adding a
/// descriptor, loading one from disk and starting a slot all agree on it.
use derive_more::Display;
use serde_json::{Map, Value};

use super::types::{
    ConnectionDescriptor, ConnectionKind, Equinox, SlotNumber, MAX_CIRCLE_COUNT, MAX_DELAY,
    MAX_TCP_PORT, MIN_DELAY, MIN_TCP_PORT, SERIAL_PORT_PREFIX,
};

/// Why a slot number, descriptor or persisted entry was rejected
#[derive(Debug, Clone, PartialEq, Display)]
pub enum RejectReason {
    #[display("slot number {value} is out of range")]
    SlotOutOfRange { value: i64 },
    #[display("slot key '{key}' is not a number")]
    SlotKeyNotNumeric { key: String },
    #[display("entry is not a JSON object")]
    NotAnObject,
    #[display("no name specified")]
    MissingName,
    #[display("unrecognized connection type '{value}'")]
    UnknownConnectionKind { value: String },
    #[display("unrecognized equinox '{value}'")]
    InvalidEquinox { value: String },
    #[display("{kind} connection requires field '{field}'")]
    MissingField {
        kind: ConnectionKind,
        field: RequiredField,
    },
    #[display("TCP port {value} is outside 1024..=65535")]
    InvalidTcpPort { value: i64 },
    #[display("delay {value} is outside 1..=10000000 microseconds")]
    InvalidDelay { value: i64 },
    #[display("serial port '{value}' is not a valid device name")]
    InvalidSerialPort { value: String },
    #[display("invalid field of view circle {value}")]
    InvalidCircle { value: f64 },
    #[display("{count} field of view circles exceed the limit of 10")]
    TooManyCircles { count: usize },
}

impl std::error::Error for RejectReason {}

/// Optional descriptor fields that some connection kinds require.
///
/// The `Display` form is the key used in `telescopes.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RequiredField {
    #[display("host_name")]
    Host,
    #[display("tcp_port")]
    TcpPort,
    #[display("delay")]
    Delay,
    #[display("device_model")]
    DeviceModel,
    #[display("serial_port")]
    SerialPort,
}

/// Required-field set of one connection kind
pub struct KindRules {
    pub kind: ConnectionKind,
    pub required: &'static [RequiredField],
}

pub const KIND_RULES: [KindRules; 4] = [
    KindRules {
        kind: ConnectionKind::Virtual,
        required: &[],
    },
    KindRules {
        kind: ConnectionKind::Internal,
        required: &[
            RequiredField::TcpPort,
            RequiredField::Delay,
            RequiredField::DeviceModel,
            RequiredField::SerialPort,
        ],
    },
    KindRules {
        kind: ConnectionKind::Local,
        required: &[RequiredField::TcpPort, RequiredField::Delay],
    },
    KindRules {
        kind: ConnectionKind::Remote,
        required: &[
            RequiredField::Host,
            RequiredField::TcpPort,
            RequiredField::Delay,
        ],
    },
];

pub fn required_fields(kind: ConnectionKind) -> &'static [RequiredField] {
    KIND_RULES
        .iter()
        .find(|rules| rules.kind == kind)
        .map(|rules| rules.required)
        .unwrap_or(&[])
}

pub fn requires(kind: ConnectionKind, field: RequiredField) -> bool {
    required_fields(kind).contains(&field)
}

pub fn is_valid_port(port: i64) -> bool {
    (MIN_TCP_PORT as i64..=MAX_TCP_PORT as i64).contains(&port)
}

pub fn is_valid_delay(delay: i64) -> bool {
    (MIN_DELAY as i64..=MAX_DELAY as i64).contains(&delay)
}

pub fn is_valid_serial_port(port: &str) -> bool {
    port.len() > SERIAL_PORT_PREFIX.len() && port.starts_with(SERIAL_PORT_PREFIX)
}

fn is_valid_circle(radius: f64) -> bool {
    radius.is_finite() && radius > 0.0
}

/// Check a descriptor against the rules of its connection kind.
///
/// On success the returned descriptor carries only the fields its kind
/// uses; everything else is cleared so it never reaches disk.
pub fn validate_descriptor(
    mut descriptor: ConnectionDescriptor,
) -> Result<ConnectionDescriptor, RejectReason> {
    let kind = descriptor.connection_kind;
    // Same normalization as a reloaded entry.
    descriptor.name = descriptor.name.trim().to_string();
    for field in [
        &mut descriptor.host,
        &mut descriptor.device_model_name,
        &mut descriptor.serial_port,
    ] {
        *field = field
            .take()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
    }
    if descriptor.name.is_empty() {
        return Err(RejectReason::MissingName);
    }

    for field in required_fields(kind) {
        let missing = |field: RequiredField| RejectReason::MissingField { kind, field };
        match field {
            RequiredField::Host => match descriptor.host.as_deref() {
                Some(host) if !host.trim().is_empty() => {}
                _ => return Err(missing(RequiredField::Host)),
            },
            RequiredField::TcpPort => match descriptor.tcp_port {
                Some(port) if is_valid_port(port as i64) => {}
                Some(port) => return Err(RejectReason::InvalidTcpPort { value: port as i64 }),
                None => return Err(missing(RequiredField::TcpPort)),
            },
            RequiredField::Delay => match descriptor.delay_micros {
                Some(delay) if is_valid_delay(delay as i64) => {}
                Some(delay) => return Err(RejectReason::InvalidDelay { value: delay as i64 }),
                None => return Err(missing(RequiredField::Delay)),
            },
            RequiredField::DeviceModel => match descriptor.device_model_name.as_deref() {
                Some(model) if !model.trim().is_empty() => {}
                _ => return Err(missing(RequiredField::DeviceModel)),
            },
            RequiredField::SerialPort => match descriptor.serial_port.as_deref() {
                Some(port) if is_valid_serial_port(port) => {}
                Some(port) => {
                    return Err(RejectReason::InvalidSerialPort {
                        value: port.to_string(),
                    })
                }
                None => return Err(missing(RequiredField::SerialPort)),
            },
        }
    }

    if descriptor.fov_circles.len() > MAX_CIRCLE_COUNT {
        return Err(RejectReason::TooManyCircles {
            count: descriptor.fov_circles.len(),
        });
    }
    if let Some(bad) = descriptor
        .fov_circles
        .iter()
        .copied()
        .find(|radius| !is_valid_circle(*radius))
    {
        return Err(RejectReason::InvalidCircle { value: bad });
    }

    if !requires(kind, RequiredField::Host) {
        descriptor.host = None;
    }
    if !requires(kind, RequiredField::TcpPort) {
        descriptor.tcp_port = None;
    }
    if !requires(kind, RequiredField::Delay) {
        descriptor.delay_micros = None;
    }
    if !requires(kind, RequiredField::DeviceModel) {
        descriptor.device_model_name = None;
    }
    if !requires(kind, RequiredField::SerialPort) {
        descriptor.serial_port = None;
    }
    Ok(descriptor)
}

/// Keep at most [`MAX_CIRCLE_COUNT`] circles and drop anything that is not a
/// positive number. An empty result means "no circles".
pub fn normalize_circles(raw: Option<&Value>) -> Vec<f64> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .take(MAX_CIRCLE_COUNT)
        .filter_map(Value::as_f64)
        .filter(|radius| is_valid_circle(*radius))
        .collect()
}

fn string_field(entry: &Map<String, Value>, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Turn one raw `telescopes.json` entry into a descriptor.
///
/// Pure: the caller decides what to do with a rejected entry.
pub fn validate_entry(
    key: &str,
    raw: &Value,
) -> Result<(SlotNumber, ConnectionDescriptor), RejectReason> {
    let slot: SlotNumber = key.parse()?;
    let entry = raw.as_object().ok_or(RejectReason::NotAnObject)?;

    let name = string_field(entry, "name").ok_or(RejectReason::MissingName)?;
    let connection = string_field(entry, "connection").unwrap_or_default();
    let connection_kind = connection
        .parse::<ConnectionKind>()
        .map_err(|_| RejectReason::UnknownConnectionKind { value: connection })?;

    // Entries written before equinox support carry no equinox at all.
    let equinox = match entry.get("equinox") {
        None | Some(Value::Null) => Equinox::default(),
        Some(Value::String(value)) => value
            .parse::<Equinox>()
            .map_err(|_| RejectReason::InvalidEquinox {
                value: value.clone(),
            })?,
        Some(other) => {
            return Err(RejectReason::InvalidEquinox {
                value: other.to_string(),
            })
        }
    };

    let tcp_port = match entry.get("tcp_port").and_then(Value::as_i64) {
        Some(port) if is_valid_port(port) => Some(port as u16),
        Some(port) if requires(connection_kind, RequiredField::TcpPort) => {
            return Err(RejectReason::InvalidTcpPort { value: port })
        }
        _ => None,
    };
    let delay_micros = match entry.get("delay").and_then(Value::as_i64) {
        Some(delay) if is_valid_delay(delay) => Some(delay as u32),
        Some(delay) if requires(connection_kind, RequiredField::Delay) => {
            return Err(RejectReason::InvalidDelay { value: delay })
        }
        _ => None,
    };

    let descriptor = ConnectionDescriptor {
        name,
        connection_kind,
        equinox,
        host: string_field(entry, "host_name"),
        tcp_port,
        delay_micros,
        connect_at_startup: entry
            .get("connect_at_startup")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        fov_circles: normalize_circles(entry.get("circles")),
        device_model_name: string_field(entry, "device_model"),
        serial_port: string_field(entry, "serial_port"),
    };

    Ok((slot, validate_descriptor(descriptor)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn serial(name: &str) -> String {
        format!("{SERIAL_PORT_PREFIX}{name}")
    }

    #[test]
    fn every_kind_has_rules() {
        use strum::IntoEnumIterator;
        for kind in ConnectionKind::iter() {
            assert!(KIND_RULES.iter().any(|rules| rules.kind == kind));
        }
    }

    #[test]
    fn port_and_delay_ranges() {
        assert!(!is_valid_port(1023));
        assert!(is_valid_port(1024));
        assert!(is_valid_port(65535));
        assert!(!is_valid_port(65536));
        assert!(!is_valid_delay(0));
        assert!(is_valid_delay(1));
        assert!(is_valid_delay(10_000_000));
        assert!(!is_valid_delay(10_000_001));
    }

    #[test]
    fn virtual_needs_only_a_name() {
        let descriptor = ConnectionDescriptor::new("Sim", ConnectionKind::Virtual)
            .with_host("ignored")
            .with_tcp(10001, 500);
        let validated = validate_descriptor(descriptor).unwrap();
        assert_eq!(validated.host, None);
        assert_eq!(validated.tcp_port, None);
        assert_eq!(validated.delay_micros, None);

        let nameless = ConnectionDescriptor::new("  ", ConnectionKind::Virtual);
        assert_eq!(validate_descriptor(nameless), Err(RejectReason::MissingName));
    }

    #[test]
    fn text_fields_are_trimmed() {
        let descriptor = ConnectionDescriptor::new(" Backyard ", ConnectionKind::Remote)
            .with_host("10.0.0.5 ")
            .with_tcp(10001, 500);
        let validated = validate_descriptor(descriptor).unwrap();
        assert_eq!(validated.name, "Backyard");
        assert_eq!(validated.host.as_deref(), Some("10.0.0.5"));

        let blank_host = ConnectionDescriptor::new("Far", ConnectionKind::Remote)
            .with_host("   ")
            .with_tcp(10001, 500);
        assert!(matches!(
            validate_descriptor(blank_host),
            Err(RejectReason::MissingField {
                field: RequiredField::Host,
                ..
            })
        ));
    }

    #[test]
    fn remote_requires_host() {
        let descriptor =
            ConnectionDescriptor::new("Far", ConnectionKind::Remote).with_tcp(10001, 500);
        assert_eq!(
            validate_descriptor(descriptor),
            Err(RejectReason::MissingField {
                kind: ConnectionKind::Remote,
                field: RequiredField::Host
            })
        );
    }

    #[test]
    fn internal_requires_device_and_prefixed_serial_port() {
        let base = ConnectionDescriptor::new("Mount", ConnectionKind::Internal).with_tcp(10001, 500);
        assert!(matches!(
            validate_descriptor(base.clone()),
            Err(RejectReason::MissingField {
                field: RequiredField::DeviceModel,
                ..
            })
        ));
        assert!(matches!(
            validate_descriptor(base.clone().with_device("Meade-ETX", "ttyUSB0")),
            Err(RejectReason::InvalidSerialPort { .. })
        ));
        assert!(validate_descriptor(base.with_device("Meade-ETX", serial("ttyUSB0"))).is_ok());
    }

    #[test]
    fn circles_are_bounded_and_positive() {
        let too_many = ConnectionDescriptor::new("Sim", ConnectionKind::Virtual)
            .with_circles((1..=11).map(f64::from));
        assert!(matches!(
            validate_descriptor(too_many),
            Err(RejectReason::TooManyCircles { count: 11 })
        ));
        let negative =
            ConnectionDescriptor::new("Sim", ConnectionKind::Virtual).with_circles([0.5, -1.0]);
        assert!(matches!(
            validate_descriptor(negative),
            Err(RejectReason::InvalidCircle { .. })
        ));
    }

    #[test]
    fn entry_with_bad_port_is_rejected() {
        let raw = json!({
            "name": "Scope",
            "connection": "local",
            "tcp_port": 80,
            "delay": 500000
        });
        assert_eq!(
            validate_entry("2", &raw),
            Err(RejectReason::InvalidTcpPort { value: 80 })
        );
    }

    #[test]
    fn entry_circles_are_normalized() {
        let raw = json!({
            "name": "Sim",
            "connection": "virtual",
            "equinox": "JNow",
            "circles": [0.5, "wide", -2.0, 1.5, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]
        });
        let (slot, descriptor) = validate_entry("5", &raw).unwrap();
        assert_eq!(slot.get(), 5);
        assert_eq!(descriptor.equinox, Equinox::JNow);
        assert_eq!(
            descriptor.fov_circles,
            vec![0.5, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]
        );

        let junk = json!({"name": "Sim", "connection": "virtual", "circles": ["a", -1]});
        assert!(validate_entry("5", &junk).unwrap().1.fov_circles.is_empty());
    }

    #[test]
    fn entry_equinox_and_kind_must_be_known() {
        let bad_equinox = json!({"name": "Sim", "connection": "virtual", "equinox": "B1950"});
        assert!(matches!(
            validate_entry("1", &bad_equinox),
            Err(RejectReason::InvalidEquinox { .. })
        ));
        let bad_kind = json!({"name": "Sim", "connection": "bluetooth"});
        assert!(matches!(
            validate_entry("1", &bad_kind),
            Err(RejectReason::UnknownConnectionKind { .. })
        ));
        let no_equinox = json!({"name": "Sim", "connection": "virtual"});
        assert_eq!(validate_entry("1", &no_equinox).unwrap().1.equinox, Equinox::J2000);
    }
}
