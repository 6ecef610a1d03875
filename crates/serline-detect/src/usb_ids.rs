//! USB Vendor IDs of common USB-to-serial adapters
//!
//! Used to give ports without a product string a readable name.

/// FTDI (Future Technology Devices International)
pub const FTDI: u16 = 0x0403;
/// Silicon Labs CP210x
pub const CP210X: u16 = 0x10C4;
/// WCH CH340/CH341
pub const CH340: u16 = 0x1A86;
/// Prolific PL2303
pub const PROLIFIC: u16 = 0x067B;

const ADAPTERS: &[(u16, &str)] = &[
    (FTDI, "FTDI"),
    (CP210X, "Silicon Labs CP210x"),
    (CH340, "WCH CH340"),
    (PROLIFIC, "Prolific PL2303"),
];

/// Adapter family for a vendor ID
pub fn adapter_name(vid: u16) -> Option<&'static str> {
    ADAPTERS
        .iter()
        .find(|(v, _)| *v == vid)
        .map(|(_, name)| *name)
}

/// Whether the vendor ID belongs to a known adapter family
pub fn is_known_adapter(vid: u16) -> bool {
    adapter_name(vid).is_some()
}
