use serialport::SerialPortInfo;
use std::collections::HashSet;

use super::com_number;

/// COM ports in numeric order, deduplicated case-insensitively.
pub fn available_ports_sorted() -> Vec<String> {
    let raw_ports = serialport::available_ports().unwrap_or_default();
    sort_and_dedup_ports(raw_ports)
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<(u32, String)> = raw_ports
        .into_iter()
        .filter_map(|p| {
            let name = p.port_name.to_uppercase();
            com_number(&name).map(|n| (n, name))
        })
        .filter(|(_, name)| seen.insert(name.clone()))
        .collect();
    ports.sort();
    ports.into_iter().map(|(_, name)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::SerialPortType;

    fn make_com(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn windows_numeric_sort_and_dedup() {
        let input = vec![
            make_com("COM10"),
            make_com("COM3"),
            make_com("com3"),
            make_com("COM1"),
            make_com("NULL_COM3"),
        ];
        assert_eq!(sort_and_dedup_ports(input), vec!["COM1", "COM3", "COM10"]);
    }
}
