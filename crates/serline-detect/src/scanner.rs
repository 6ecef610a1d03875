//! Port scanner
//!
//! Lists the addresses a transport can open and decides which backend
//! serves each one. OS serial ports come from the `serialport` crate;
//! vendor bridges that bypass the OS serial stack plug in through a
//! [`BridgeProvider`].

use std::sync::Arc;

use serialport::{available_ports, SerialPortType};
use serline_transport::{
    Backend, BackendKind, Connector, PortSettings, SerialConnector, TransportError,
};
use tracing::{debug, info};

use crate::error::DetectError;
use crate::usb_ids;

/// Information about a port
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Address to open (e.g., /dev/ttyUSB0, COM3, a bridge path)
    pub address: String,
    /// Backend that serves this address
    pub kind: BackendKind,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl PortInfo {
    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                address: name,
                kind: BackendKind::StandardSerial,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self::bare(name, BackendKind::StandardSerial),
        }
    }

    fn bare(address: String, kind: BackendKind) -> Self {
        Self {
            address,
            kind,
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Human-readable description for listings
    pub fn description(&self) -> String {
        if let Some(product) = &self.product {
            return product.clone();
        }
        if let Some(name) = self.vid.and_then(usb_ids::adapter_name) {
            return name.to_string();
        }
        match self.kind {
            BackendKind::StandardSerial => "Unknown".to_string(),
            BackendKind::VendorUsbBridge => "USB bridge".to_string(),
        }
    }

    /// Whether this port carries the requested USB IDs
    ///
    /// Each ID is only checked when given; with neither, every port matches.
    pub fn matches_ids(&self, vid: Option<u16>, pid: Option<u16>) -> bool {
        vid.map_or(true, |v| self.vid == Some(v)) && pid.map_or(true, |p| self.pid == Some(p))
    }
}

/// A vendor USB bridge backend
///
/// Addresses listed here resolve to [`BackendKind::VendorUsbBridge`].
pub trait BridgeProvider: Send + Sync {
    /// Addresses of attached bridge devices
    fn list(&self) -> Vec<String>;

    /// Open `settings.address` exclusively
    fn connect(&self, settings: &PortSettings) -> Result<Box<dyn Backend>, TransportError>;
}

/// Serial port scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Skip ports matching these patterns
    pub skip_patterns: Vec<String>,
}

/// Port scanner and address router
pub struct PortScanner {
    config: ScannerConfig,
    serial: SerialConnector,
    bridge: Option<Arc<dyn BridgeProvider>>,
}

impl std::fmt::Debug for PortScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortScanner")
            .field("config", &self.config)
            .field("bridge", &self.bridge.as_ref().map(|_| "<bridge>"))
            .finish()
    }
}

/// Ordering used for listings:
///  - ttyACM* ports first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then COM ports (sorted numerically)
///  - then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = [("ttyACM", 0u8), ("ttyUSB", 1), ("COM", 2)];
    for (prefix, rank) in numbered {
        if let Some(rest) = basename.strip_prefix(prefix) {
            if let Ok(num) = rest.parse::<usize>() {
                return (rank, num, basename.to_string());
            }
        }
    }
    (3, 0, basename.to_string())
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::with_config(ScannerConfig {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
            ],
        })
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self {
            config,
            serial: SerialConnector::new(),
            bridge: None,
        }
    }

    /// Route bridge addresses to `bridge`
    pub fn with_bridge(mut self, bridge: Arc<dyn BridgeProvider>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    fn bridge_addresses(&self) -> Vec<String> {
        self.bridge.as_ref().map(|b| b.list()).unwrap_or_default()
    }

    /// Enumerate all available ports, serial ports first
    pub fn enumerate_ports(&self) -> Result<Vec<PortInfo>, DetectError> {
        info!("Enumerating serial ports...");
        let ports = available_ports()?;

        let serial = ports
            .into_iter()
            .map(|p| PortInfo::from_serialport(p.port_name, &p.port_type))
            .collect();
        let result = self.assemble(serial);

        if result.is_empty() {
            info!("No ports found");
        } else {
            info!("Found {} port(s)", result.len());
            for port in &result {
                info!("  {} - {} ({})", port.address, port.description(), port.kind);
            }
        }

        Ok(result)
    }

    // Filter and order the serial ports, then append the bridges.
    fn assemble(&self, serial: Vec<PortInfo>) -> Vec<PortInfo> {
        let mut result: Vec<PortInfo> = serial
            .into_iter()
            .filter(|p| !self.should_skip_port(p))
            .collect();
        result.sort_by_key(|p| port_sort_key(&p.address));

        result.extend(
            self.bridge_addresses()
                .into_iter()
                .map(|a| PortInfo::bare(a, BackendKind::VendorUsbBridge)),
        );
        result
    }

    /// Available ports, optionally filtered by USB IDs
    ///
    /// The ID filter applies to serial ports; bridge addresses are always
    /// appended after them.
    pub fn ports(
        &self,
        vid: Option<u16>,
        pid: Option<u16>,
    ) -> Result<Vec<PortInfo>, DetectError> {
        let ports = self.enumerate_ports()?;
        Ok(Self::select(ports, vid, pid))
    }

    /// Addresses of available ports, filtered like [`PortScanner::ports`]
    pub fn list(&self, vid: Option<u16>, pid: Option<u16>) -> Result<Vec<String>, DetectError> {
        Ok(self
            .ports(vid, pid)?
            .into_iter()
            .map(|p| p.address)
            .collect())
    }

    fn select(ports: Vec<PortInfo>, vid: Option<u16>, pid: Option<u16>) -> Vec<PortInfo> {
        ports
            .into_iter()
            .filter(|p| p.kind == BackendKind::VendorUsbBridge || p.matches_ids(vid, pid))
            .collect()
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &PortInfo) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.address.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for PortScanner {
    fn resolve(&self, address: &str) -> BackendKind {
        let kind = if self.bridge_addresses().iter().any(|a| a == address) {
            BackendKind::VendorUsbBridge
        } else {
            BackendKind::StandardSerial
        };
        debug!("Resolved {} to {}", address, kind);
        kind
    }

    fn connect(
        &self,
        kind: BackendKind,
        settings: &PortSettings,
    ) -> Result<Box<dyn Backend>, TransportError> {
        match (kind, &self.bridge) {
            (BackendKind::VendorUsbBridge, Some(bridge)) => bridge.connect(settings),
            _ => self.serial.connect(kind, settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(address: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            vid: Some(vid),
            pid: Some(pid),
            ..PortInfo::bare(address.to_string(), BackendKind::StandardSerial)
        }
    }

    struct FixedBridge(Vec<String>);

    impl BridgeProvider for FixedBridge {
        fn list(&self) -> Vec<String> {
            self.0.clone()
        }

        fn connect(&self, settings: &PortSettings) -> Result<Box<dyn Backend>, TransportError> {
            Err(TransportError::open_failed(
                settings.address.clone().unwrap_or_default(),
                "fixture bridge",
            ))
        }
    }

    #[test]
    fn test_port_info_from_usb() {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: Some("12345".to_string()),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R".to_string()),
        });

        let info = PortInfo::from_serialport("/dev/ttyUSB0".to_string(), &usb_info);

        assert_eq!(info.kind, BackendKind::StandardSerial);
        assert_eq!(info.vid, Some(0x0403));
        assert_eq!(info.pid, Some(0x6001));
        assert_eq!(info.description(), "FT232R");
    }

    #[test]
    fn test_description_fallbacks() {
        assert_eq!(usb("/dev/ttyUSB0", 0x10C4, 0xEA60).description(), "Silicon Labs CP210x");
        assert_eq!(
            PortInfo::bare("/dev/ttyS0".into(), BackendKind::StandardSerial).description(),
            "Unknown"
        );
        assert_eq!(
            PortInfo::bare("usb#0".into(), BackendKind::VendorUsbBridge).description(),
            "USB bridge"
        );
    }

    #[test]
    fn test_id_filter() {
        let port = usb("/dev/ttyACM0", 0x2E8A, 0x000A);

        assert!(port.matches_ids(None, None));
        assert!(port.matches_ids(Some(0x2E8A), None));
        assert!(port.matches_ids(None, Some(0x000A)));
        assert!(port.matches_ids(Some(0x2E8A), Some(0x000A)));
        assert!(!port.matches_ids(Some(0x0403), None));
        assert!(!port.matches_ids(Some(0x2E8A), Some(0x0001)));

        let plain = PortInfo::bare("/dev/ttyS0".into(), BackendKind::StandardSerial);
        assert!(!plain.matches_ids(Some(0x2E8A), None));
    }

    #[test]
    fn test_assemble_orders_and_appends_bridges() {
        let scanner = PortScanner::new()
            .with_bridge(Arc::new(FixedBridge(vec!["usb#vendor-0".to_string()])));

        let serial = vec![
            usb("/dev/ttyUSB1", 0x0403, 0x6001),
            usb("/dev/ttyACM10", 0x2E8A, 0x000A),
            PortInfo::bare("/dev/cu.Bluetooth-Incoming-Port".into(), BackendKind::StandardSerial),
            usb("/dev/ttyACM2", 0x2E8A, 0x000A),
            PortInfo::bare("/dev/ttyS0".into(), BackendKind::StandardSerial),
        ];

        let ports = scanner.assemble(serial);
        let names: Vec<_> = ports.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/dev/ttyACM2",
                "/dev/ttyACM10",
                "/dev/ttyUSB1",
                "/dev/ttyS0",
                "usb#vendor-0",
            ]
        );
        assert_eq!(ports[4].kind, BackendKind::VendorUsbBridge);

        let selected: Vec<_> = PortScanner::select(ports, Some(0x2E8A), None)
            .into_iter()
            .map(|p| p.address)
            .collect();
        assert_eq!(selected, vec!["/dev/ttyACM2", "/dev/ttyACM10", "usb#vendor-0"]);
    }

    #[test]
    fn test_com_ports_sort_numerically() {
        let mut names = vec!["COM10", "COM3", "COM1"];
        names.sort_by_key(|n| port_sort_key(n));
        assert_eq!(names, vec!["COM1", "COM3", "COM10"]);
    }

    #[test]
    fn test_resolve_routes_bridge_addresses() {
        let scanner = PortScanner::new()
            .with_bridge(Arc::new(FixedBridge(vec!["usb#vendor-0".to_string()])));

        assert_eq!(scanner.resolve("usb#vendor-0"), BackendKind::VendorUsbBridge);
        assert_eq!(scanner.resolve("/dev/ttyACM0"), BackendKind::StandardSerial);
        assert_eq!(
            PortScanner::new().resolve("usb#vendor-0"),
            BackendKind::StandardSerial
        );
    }

    #[test]
    fn test_connect_bridge_without_provider_fails() {
        let settings = PortSettings::for_address("usb#vendor-0");
        let err = PortScanner::new()
            .connect(BackendKind::VendorUsbBridge, &settings)
            .err()
            .expect("connect should fail");
        assert!(matches!(err, TransportError::DeviceOpen { .. }));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn numbered_ports_sort_by_number(a in 0usize..1000, b in 0usize..1000) {
                let (low, high) = (a.min(b), a.max(b));
                for prefix in ["/dev/ttyACM", "/dev/ttyUSB", "COM"] {
                    let low_key = port_sort_key(&format!("{prefix}{low}"));
                    let high_key = port_sort_key(&format!("{prefix}{high}"));
                    prop_assert!(low_key <= high_key);
                }
                prop_assert!(
                    port_sort_key(&format!("/dev/ttyACM{high}"))
                        < port_sort_key(&format!("/dev/ttyUSB{low}")),
                    "ttyACM ports should sort before ttyUSB ports"
                );
            }
        }
    }
}
