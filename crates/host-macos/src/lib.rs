use anyhow::Result;
use plist::{Dictionary, Value};
use usbprobe_core::{normalize_hex, UsbStorage, Volume};

/// List USB mass-storage devices with their volumes, from the system USB
/// topology report (`system_profiler SPUSBDataType`). Errors only when the
/// report itself cannot be obtained or decoded.
#[cfg(target_os = "macos")]
pub fn list_usb_storage() -> Result<Vec<UsbStorage>> {
    use anyhow::{bail, Context};
    use std::process::Command;

    let output = Command::new("system_profiler")
        .args(["-xml", "SPUSBDataType"])
        .output()
        .context("run system_profiler")?;
    if !output.status.success() {
        bail!(
            "system_profiler failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let doc = Value::from_reader(std::io::Cursor::new(output.stdout))
        .context("decode SPUSBDataType plist")?;
    Ok(collect(&doc))
}

#[cfg(not(target_os = "macos"))]
pub fn list_usb_storage() -> Result<Vec<UsbStorage>> {
    Err(anyhow::anyhow!("usbprobe-host-macos requires macOS"))
}

/// Build the canonical device list from a decoded SPUSBDataType document.
/// The document is an array holding one dictionary per data type; buses sit
/// under its `_items`, devices one level below under each bus's `_items`.
pub fn collect(doc: &Value) -> Vec<UsbStorage> {
    let buses = doc
        .as_array()
        .and_then(|roots| roots.first())
        .and_then(Value::as_dictionary)
        .and_then(|root| root.get("_items"))
        .and_then(Value::as_array);
    let Some(buses) = buses else {
        // no buses reported at all
        return Vec::new();
    };

    let mut storages = Vec::new();
    for bus in buses {
        let devices = bus
            .as_dictionary()
            .and_then(|bus| bus.get("_items"))
            .and_then(Value::as_array);
        // not every bus hosts devices
        let Some(devices) = devices else { continue };
        for device in devices {
            if let Some(storage) = storage_entry(device) {
                storages.push(storage);
            }
        }
    }
    storages
}

fn storage_entry(device: &Value) -> Option<UsbStorage> {
    let device = device.as_dictionary()?;

    // reported as "0x1234 (Vendor Name)"; keep only the hex part
    let mut vendor_id = normalize_hex(&string_field(device, "vendor_id"));
    if let Some(space) = vendor_id.find(' ') {
        vendor_id.truncate(space);
    }

    // only storage devices carry a Media entry
    let media = device.get("Media")?;

    let mut volumes = Vec::new();
    if let Some(media) = media.as_array() {
        for medium in media {
            push_media_volumes(medium, &mut volumes);
        }
    }

    Some(UsbStorage {
        vendor_id,
        product_id: normalize_hex(&string_field(device, "product_id")),
        serial: string_field(device, "serial_num"),
        vendor: string_field(device, "manufacturer"),
        product: string_field(device, "_name"),
        volumes,
    })
}

fn push_media_volumes(medium: &Value, volumes: &mut Vec<Volume>) {
    let entries = medium
        .as_dictionary()
        .and_then(|medium| medium.get("volumes"))
        .and_then(Value::as_array);
    let Some(entries) = entries else { return };

    for entry in entries {
        let Some(entry) = entry.as_dictionary() else {
            continue;
        };
        // size_in_bytes stands in for both totals; the topology report does
        // not break out free space at this granularity
        let Some(size) = entry
            .get("size_in_bytes")
            .and_then(Value::as_unsigned_integer)
        else {
            continue;
        };
        let name = string_field(entry, "_name");
        volumes.push(Volume {
            label: name.clone(),
            name,
            mount_point: string_field(entry, "mount_point"),
            file_system: string_field(entry, "file_system"),
            capacity: size,
            free_space: size,
        });
    }
}

fn string_field(dict: &Dictionary, key: &str) -> String {
    dict.get(key)
        .and_then(Value::as_string)
        .unwrap_or_default()
        .to_string()
}
