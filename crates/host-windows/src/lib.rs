use anyhow::Result;
use serde::Deserialize;
use usbprobe_core::{meta, normalize_hex, UsbStorage, Volume};

#[cfg(windows)]
mod query;
#[cfg(windows)]
pub use query::WmiStorageQuery;

/// A Win32_USBControllerDevice association row: the controller on the left,
/// an attached PnP entity on the right, both as object-path descriptors.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UsbControllerDevice {
    pub antecedent: String,
    pub dependent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskDrive {
    #[serde(rename = "DeviceID")]
    pub device_id: String, // \\.\PHYSICALDRIVE2
    #[serde(rename = "Model", default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskPartition {
    #[serde(rename = "DeviceID")]
    pub device_id: String, // Disk #1, Partition #0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogicalDisk {
    #[serde(rename = "DeviceID")]
    pub device_id: String, // F:
    pub name: String,
    #[serde(default)]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub file_system: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub free_space: u64,
}

/// The management-data queries the collector runs, in the order it runs
/// them. Backed by WMI on Windows; tests substitute canned record sets.
pub trait StorageQuery {
    fn controller_devices(&self) -> Result<Vec<UsbControllerDevice>>;
    fn disk_drives(&self, pnp_device_id: &str) -> Result<Vec<DiskDrive>>;
    fn drive_partitions(&self, drive_device_id: &str) -> Result<Vec<DiskPartition>>;
    fn partition_logical_disks(&self, partition_device_id: &str) -> Result<Vec<LogicalDisk>>;
    fn removable_volume_paths(&self) -> Vec<String>;
}

/// List USB mass-storage devices with their volumes. Management-data
/// failures never fail the call on this platform; the result degrades to
/// whatever could be resolved.
#[cfg(windows)]
pub fn list_usb_storage() -> Result<Vec<UsbStorage>> {
    let query = match WmiStorageQuery::new() {
        Ok(query) => query,
        // no management data at all still honors the marker-file fallback
        Err(_) => return Ok(meta::read_from_volumes(&query::removable_drive_letters())),
    };
    Ok(collect(&query))
}

#[cfg(not(windows))]
pub fn list_usb_storage() -> Result<Vec<UsbStorage>> {
    Err(anyhow::anyhow!("usbprobe-host-windows requires Windows"))
}

/// Full enumeration over one set of management-data queries: marker-file
/// fallback first, then controller-association pairing.
pub fn collect(query: &impl StorageQuery) -> Vec<UsbStorage> {
    let fallback = meta::read_from_volumes(&query.removable_volume_paths());
    if !fallback.is_empty() {
        return fallback;
    }

    let Ok(rows) = query.controller_devices() else {
        return Vec::new();
    };

    let mut storages = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let Some(pnp_device_id) = descriptor_device_id(&row.dependent) else {
            continue;
        };
        if !pnp_device_id.starts_with("USBSTOR") {
            continue;
        }
        // the generic USB entity row for the same port sits immediately
        // before its USBSTOR row
        let Some(previous) = index.checked_sub(1).map(|i| &rows[i]) else {
            continue;
        };
        if previous.antecedent != row.antecedent {
            continue;
        }
        let Some(usb_device_id) = descriptor_device_id(&previous.dependent) else {
            continue;
        };
        let Some(mut storage) = parse_device_ids(&usb_device_id, &pnp_device_id) else {
            continue;
        };
        let Some(volumes) = resolve_volumes(query, &pnp_device_id) else {
            continue;
        };
        // populate the product from the volume when there is exactly one
        if let [volume] = volumes.as_slice() {
            storage.product = volume_product(volume);
        }
        storage.volumes = volumes;
        storages.push(storage);
    }
    storages
}

// `\\HOST\root\cimv2:Win32_PnPEntity.DeviceID="USBSTOR\..."` -> the quoted id
fn descriptor_device_id(descriptor: &str) -> Option<String> {
    let (_, id) = descriptor.split_once('=')?;
    Some(id.trim_matches('"').to_string())
}

/// Identity fields from the paired PnP identifiers:
/// `USB\VID_xxxx&PID_xxxx\serial` and
/// `USBSTOR\DISK&VEN_vendor&PROD_product&REV_rev\instance`.
/// Rows whose identifiers do not carry every expected piece are dropped.
fn parse_device_ids(usb: &str, usbstor: &str) -> Option<UsbStorage> {
    let vid = usb.find("VID_")?;
    let pid = usb.find("PID_")?;
    let vendor_id = usb.get(vid + 4..vid + 8)?;
    let product_id = usb.get(pid + 4..pid + 8)?;
    let serial = usb.rsplit('\\').next()?;

    // ids may arrive with WQL-escaped doubled backslashes
    let mut segments = usbstor.split('\\').filter(|segment| !segment.is_empty());
    let disk = segments.nth(1)?;
    let tokens: Vec<&str> = disk.split('&').collect();
    let vendor = tokens.get(1)?.get(4..)?; // VEN_
    let product = tokens.get(2)?.get(5..)?; // PROD_

    Some(UsbStorage {
        vendor_id: normalize_hex(vendor_id),
        product_id: normalize_hex(product_id),
        serial: serial.to_string(),
        vendor: vendor.to_string(),
        product: product.to_string(),
        volumes: Vec::new(),
    })
}

/// Volumes behind a USBSTOR PnP id. `None` means no disk drive answered to
/// the id and the association pairing was spurious.
fn resolve_volumes(query: &impl StorageQuery, pnp_device_id: &str) -> Option<Vec<Volume>> {
    let drives = query.disk_drives(pnp_device_id).unwrap_or_default();
    let drive = drives.first()?;

    let partitions = query.drive_partitions(&drive.device_id).unwrap_or_default();
    let mut volumes = Vec::new();
    for partition in &partitions {
        let disks = query
            .partition_logical_disks(&partition.device_id)
            .unwrap_or_default();
        // a partition carries at most one logical disk
        let Some(disk) = disks.first() else { continue };
        volumes.push(Volume {
            name: disk.name.clone(),
            label: disk.volume_name.clone().unwrap_or_default(),
            mount_point: disk.device_id.clone(),
            file_system: disk.file_system.clone().unwrap_or_default(),
            capacity: disk.size,
            free_space: disk.free_space,
        });
    }
    Some(volumes)
}

fn volume_product(volume: &Volume) -> String {
    if volume.label.is_empty() {
        volume.mount_point.clone()
    } else {
        format!("{} - ({})", volume.label, volume.mount_point)
    }
}
