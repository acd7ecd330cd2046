use crate::{UsbStorage, Volume};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Marker file holding a pre-populated identity record at a volume root.
pub const DEVICE_META_FILE: &str = ".device_meta";

#[derive(Debug, Deserialize)]
struct DeviceMeta {
    #[serde(rename = "VendorID", default)]
    vendor_id: String,
    #[serde(rename = "ProductID", default)]
    product_id: String,
    #[serde(rename = "Serial", default)]
    serial: String,
    #[serde(rename = "Vendor", default)]
    vendor: String,
    #[serde(rename = "Product", default)]
    product: String,
}

/// Load identity records from marker files at the given volume roots,
/// preserving input order. Paths without a readable marker are skipped.
pub fn read_from_volumes<P: AsRef<Path>>(volumes: &[P]) -> Vec<UsbStorage> {
    let mut storages = Vec::new();
    for volume in volumes {
        if let Some(storage) = read_volume_meta(volume.as_ref()) {
            storages.push(storage);
        }
    }
    storages
}

fn read_volume_meta(volume: &Path) -> Option<UsbStorage> {
    let file = File::open(volume.join(DEVICE_META_FILE)).ok()?;
    let record: DeviceMeta = serde_json::from_reader(BufReader::new(file)).ok()?;
    // an empty Product means the marker carries no real identity
    if record.product.is_empty() {
        return None;
    }
    Some(UsbStorage {
        vendor_id: record.vendor_id,
        product_id: record.product_id,
        serial: record.serial,
        vendor: record.vendor,
        product: record.product,
        volumes: vec![Volume {
            mount_point: volume.to_string_lossy().into_owned(),
            ..Volume::default()
        }],
    })
}
