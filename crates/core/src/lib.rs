use serde::{Deserialize, Serialize};

pub mod meta;

/// One physical USB mass-storage unit, as reported by the host platform.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct UsbStorage {
    pub vendor_id: String,  // uppercase hex, no 0x prefix
    pub product_id: String, // uppercase hex, no 0x prefix
    pub serial: String,
    pub vendor: String,
    pub product: String,
    pub volumes: Vec<Volume>, // discovery order
}

/// A mounted or mountable filesystem on one device.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub label: String,
    pub mount_point: String,
    pub file_system: String, // as reported: "MS-DOS FAT32", "vfat", "FAT", ...
    pub capacity: u64,       // bytes, 0 when unknown
    pub free_space: u64,     // bytes, 0 when unknown
}

/// Uppercases a vendor/product id, dropping a single leading "0x"/"0X".
/// The remainder is not validated; malformed input passes through.
pub fn normalize_hex(value: &str) -> String {
    let stripped = match value.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("0x") => &value[2..],
        _ => value,
    };
    stripped.to_ascii_uppercase()
}
