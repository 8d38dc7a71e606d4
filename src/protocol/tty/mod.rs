// Platform-dispatched serial port helpers

#[cfg(windows)]
mod tty_windows;
#[cfg(windows)]
pub use tty_windows::available_ports_sorted;

#[cfg(unix)]
mod tty_unix;
#[cfg(unix)]
pub use tty_unix::available_ports_sorted;

#[cfg(not(any(unix, windows)))]
pub fn available_ports_sorted() -> Vec<String> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port_name)
        .collect()
}

/// Naming convention of serial device paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Trailing port number of a Windows `COMn` name.
fn com_number(port: &str) -> Option<u32> {
    let upper = port.to_ascii_uppercase();
    let digits = upper.strip_prefix("COM")?;
    let digits = digits.trim_end_matches(':');
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Serial port argument handed to a helper server.
///
/// Windows only opens `COM10` and above through the `\\.\` device
/// namespace, and the helpers expect the trailing colon either way.
pub fn normalize_serial_port_name(platform: Platform, port: &str) -> String {
    match platform {
        Platform::Unix => port.to_string(),
        Platform::Windows => {
            let bare = port.trim_end_matches(':');
            match com_number(bare) {
                Some(n) if n > 9 => format!("\\\\.\\{bare}:"),
                _ => format!("{bare}:"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_names_pass_through() {
        assert_eq!(
            normalize_serial_port_name(Platform::Unix, "/dev/ttyUSB0"),
            "/dev/ttyUSB0"
        );
        assert_eq!(
            normalize_serial_port_name(Platform::Unix, "/dev/tty.usbserial-A1"),
            "/dev/tty.usbserial-A1"
        );
    }

    #[test]
    fn windows_low_ports_get_colon() {
        assert_eq!(normalize_serial_port_name(Platform::Windows, "COM1"), "COM1:");
        assert_eq!(normalize_serial_port_name(Platform::Windows, "COM9"), "COM9:");
        assert_eq!(normalize_serial_port_name(Platform::Windows, "COM3:"), "COM3:");
    }

    #[test]
    fn windows_high_ports_use_device_namespace() {
        assert_eq!(
            normalize_serial_port_name(Platform::Windows, "COM10"),
            "\\\\.\\COM10:"
        );
        assert_eq!(
            normalize_serial_port_name(Platform::Windows, "COM23"),
            "\\\\.\\COM23:"
        );
    }

    #[test]
    fn com_number_parsing() {
        assert_eq!(com_number("COM12"), Some(12));
        assert_eq!(com_number("com4"), Some(4));
        assert_eq!(com_number("COMX"), None);
        assert_eq!(com_number("/dev/ttyS0"), None);
    }
}
