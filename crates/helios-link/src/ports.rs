//! Serial port discovery
//!
//! Lists the ports a controller may be attached to and picks a default. The
//! default is the highest-numbered port, since USB adapters usually enumerate
//! after the built-in ones.

#[cfg(not(feature = "serial"))]
use tracing::warn;
use tracing::{debug, trace};

/// Port paths tried when the OS listing is unavailable or empty
const COMMON_DEVICE_PATHS: &[&str] = &[
    // Linux
    "/dev/ttyUSB*",
    "/dev/ttyACM*",
    // macOS
    "/dev/tty.usbserial-*",
    "/dev/cu.usbserial-*",
    "/dev/tty.SLAB_USBtoUART*",
];

/// Source of candidate serial ports
pub trait PortResolver: Send + Sync {
    /// Identifiers of the ports that currently exist, sorted
    fn list_candidate_ports(&self) -> Vec<String>;

    /// Port to use when none was configured
    ///
    /// Picks the port with the highest trailing number. Ports without a
    /// number only win when nothing is numbered.
    fn default_port(&self) -> Option<String> {
        self.list_candidate_ports()
            .into_iter()
            .max_by(|a, b| port_sort_key(a).cmp(&port_sort_key(b)))
    }
}

/// Trailing decimal number of a port name (`COM12` -> 12)
pub fn port_number(name: &str) -> Option<u32> {
    let digits = name
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

fn port_sort_key(name: &str) -> (Option<u32>, &str) {
    (port_number(name), name)
}

/// Sort ports by stem, then numerically (`COM2` before `COM10`)
pub fn sort_ports(ports: &mut [String]) {
    ports.sort_by(|a, b| {
        let stem = |s: &str| {
            let n = s.bytes().rev().take_while(|b| b.is_ascii_digit()).count();
            s[..s.len() - n].to_string()
        };
        stem(a)
            .cmp(&stem(b))
            .then_with(|| port_number(a).cmp(&port_number(b)))
            .then_with(|| a.cmp(b))
    });
}

/// Ports reported by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortResolver;

impl SystemPortResolver {
    /// Create a resolver for the host system
    pub fn new() -> Self {
        Self
    }

    /// Detailed information about each port
    pub fn list_ports(&self) -> Vec<PortInfo> {
        #[cfg(feature = "serial")]
        {
            if let Ok(ports) = serialport::available_ports() {
                if !ports.is_empty() {
                    return ports.iter().map(PortInfo::from_serial_port).collect();
                }
            }
        }

        #[cfg(not(feature = "serial"))]
        warn!("Serial feature not enabled, falling back to device path scan");

        scan_device_paths()
            .into_iter()
            .map(|path| PortInfo::from_path(&path))
            .collect()
    }
}

impl PortResolver for SystemPortResolver {
    fn list_candidate_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.list_ports().into_iter().map(|p| p.path).collect();
        sort_ports(&mut ports);
        ports.dedup();
        debug!(count = ports.len(), "Listed serial ports");
        ports
    }
}

fn scan_device_paths() -> Vec<String> {
    let mut found = Vec::new();
    for pattern in COMMON_DEVICE_PATHS {
        if let Ok(entries) = glob::glob(pattern) {
            for entry in entries.flatten() {
                let path = entry.to_string_lossy().to_string();
                trace!(path = %path, "Found device path");
                if !found.contains(&path) {
                    found.push(path);
                }
            }
        }
    }
    found
}

/// Fixed list of ports, for tests and explicit configuration
#[derive(Debug, Clone, Default)]
pub struct StaticPortResolver {
    ports: Vec<String>,
}

impl StaticPortResolver {
    /// Create from a list of port names
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ports: Vec<String> = ports.into_iter().map(Into::into).collect();
        sort_ports(&mut ports);
        Self { ports }
    }
}

impl PortResolver for StaticPortResolver {
    fn list_candidate_ports(&self) -> Vec<String> {
        self.ports.clone()
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    /// Path or name of the port (e.g. /dev/ttyUSB0, COM3)
    pub path: String,
    /// Port type description
    pub port_type: String,
    /// USB Vendor ID (if available)
    pub vendor_id: Option<u16>,
    /// USB Product ID (if available)
    pub product_id: Option<u16>,
    /// Product name (if available)
    pub product_name: Option<String>,
    /// Manufacturer (if available)
    pub manufacturer: Option<String>,
}

impl PortInfo {
    #[cfg(feature = "serial")]
    fn from_serial_port(port: &serialport::SerialPortInfo) -> Self {
        use serialport::SerialPortType;

        let (port_type, vendor_id, product_id, product_name, manufacturer) = match &port.port_type
        {
            SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.product.clone(),
                usb.manufacturer.clone(),
            ),
            SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None),
            SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None),
            SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None),
        };

        Self {
            path: port.port_name.clone(),
            port_type,
            vendor_id,
            product_id,
            product_name,
            manufacturer,
        }
    }

    fn from_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            port_type: "Unknown".to_string(),
            vendor_id: None,
            product_id: None,
            product_name: None,
            manufacturer: None,
        }
    }
}
