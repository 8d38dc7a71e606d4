use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

use crate::core::types::SERIAL_PORT_PREFIX;

/// Serial device paths usable in a descriptor, most likely telescope
/// adapters first.
pub fn available_ports_sorted() -> Vec<String> {
    let raw_ports = serialport::available_ports().unwrap_or_default();
    sort_and_dedup_ports(raw_ports)
}

// USB adapters first, then ACM modems, then on-board UARTs.
fn priority(name: &str) -> i32 {
    let n = name.to_lowercase();
    if n.contains("ttyusb") || n.contains("usbserial") {
        0
    } else if n.contains("acm") {
        1
    } else if n.contains("ttys") || n.contains("serial") {
        2
    } else {
        10
    }
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<(String, bool)> = raw_ports
        .into_iter()
        .filter(|p| p.port_name.starts_with(SERIAL_PORT_PREFIX))
        .filter(|p| seen.insert(p.port_name.clone()))
        .map(|p| {
            let usb = matches!(p.port_type, SerialPortType::UsbPort(_));
            (p.port_name, usb)
        })
        .collect();

    ports.sort_by(|(a, a_usb), (b, b_usb)| {
        let pa = if *a_usb { 0 } else { priority(a) };
        let pb = if *b_usb { 0 } else { priority(b) };
        pa.cmp(&pb).then_with(|| a.cmp(b))
    });
    ports.into_iter().map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn usb_adapters_sort_first() {
        let input = vec![
            make("/dev/ttyS1"),
            make("/dev/ttyUSB0"),
            make("/dev/ttyACM0"),
            make("/dev/ttyS0"),
            make("/dev/ttyUSB0"),
            make("COM3"),
        ];
        assert_eq!(
            sort_and_dedup_ports(input),
            vec!["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyS0", "/dev/ttyS1"]
        );
    }
}
