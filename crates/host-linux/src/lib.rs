use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::process::Command;
use usbprobe_core::{normalize_hex, UsbStorage, Volume};

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

/// One node of the `lsblk --json` tree; root entries are whole disks and
/// `children` their partitions.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BlockDevice {
    pub name: String,
    pub label: Option<String>,
    pub fstype: Option<String>,
    pub fsavail: Option<String>,
    pub mountpoints: Vec<Option<String>>,
    pub children: Vec<BlockDevice>,
}

/// List USB mass-storage devices with their volumes. The block-device tree
/// comes from `lsblk` (failure is fatal); each root device is then matched
/// against its udev properties, and devices whose properties cannot be read
/// are left out without failing the enumeration.
pub fn list_usb_storage() -> Result<Vec<UsbStorage>> {
    let output = Command::new("lsblk")
        .args(["-p", "-f", "-b", "--json"])
        .output()
        .context("run lsblk")?;
    if !output.status.success() {
        bail!("lsblk failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    let parsed: LsblkOutput =
        serde_json::from_slice(&output.stdout).context("parse lsblk output")?;

    let mut storages = Vec::new();
    for device in &parsed.blockdevices {
        let properties = match device_properties(&device.name) {
            Ok(text) => text,
            Err(_) => continue,
        };
        if let Some(storage) = storage_from_device(device, &properties) {
            storages.push(storage);
        }
    }
    Ok(storages)
}

fn device_properties(name: &str) -> Result<String> {
    let output = Command::new("udevadm")
        .args(["info", "-q", "property", "-n", name])
        .output()
        .with_context(|| format!("run udevadm for {name}"))?;
    if !output.status.success() {
        bail!("udevadm failed for {name}");
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pair a root block device with its udev property text. Yields a device
/// only when the properties name the usb-storage driver.
pub fn storage_from_device(device: &BlockDevice, properties: &str) -> Option<UsbStorage> {
    let props = parse_properties(properties);
    if !props.usb_storage {
        return None;
    }

    let mut volumes = Vec::new();
    for partition in &device.children {
        // lsblk lists an unmounted partition with a single null entry; a
        // partition with no entries at all has nothing to report as a
        // mount point and is skipped
        let Some(mount_point) = partition.mountpoints.first() else {
            continue;
        };
        volumes.push(Volume {
            name: partition.name.clone(),
            label: partition.label.clone().unwrap_or_default(),
            mount_point: mount_point.clone().unwrap_or_default(),
            file_system: partition.fstype.clone().unwrap_or_default(),
            // lsblk -f reports available space but not partition totals
            capacity: 0,
            free_space: partition
                .fsavail
                .as_deref()
                .and_then(|avail| avail.parse().ok())
                .unwrap_or(0),
        });
    }

    Some(UsbStorage {
        vendor_id: props.vendor_id,
        product_id: props.product_id,
        serial: props.serial,
        vendor: props.vendor,
        product: props.product,
        volumes,
    })
}

#[derive(Debug, Default)]
struct DeviceProperties {
    vendor_id: String,
    product_id: String,
    serial: String,
    vendor: String,
    product: String,
    usb_storage: bool,
}

fn parse_properties(text: &str) -> DeviceProperties {
    let mut props = DeviceProperties::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "ID_VENDOR_ID" => props.vendor_id = normalize_hex(value),
            "ID_VENDOR_ENC" => props.vendor = decode_escapes(value),
            "ID_MODEL_ID" => props.product_id = normalize_hex(value),
            "ID_MODEL_ENC" => props.product = decode_escapes(value),
            "ID_SERIAL_SHORT" => props.serial = value.to_string(),
            "ID_USB_DRIVER" => props.usb_storage = value == "usb-storage",
            _ => {}
        }
    }
    props
}

// udev encodes spaces in *_ENC values as the literal four characters \x20
fn decode_escapes(value: &str) -> String {
    value.replace("\\x20", " ").trim_matches(' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINGSTON_PROPS: &str = "DEVNAME=/dev/sdb\n\
        ID_VENDOR_ID=0951\n\
        ID_VENDOR_ENC=Kingston\\x20Technology\n\
        ID_MODEL_ID=1666\n\
        ID_MODEL_ENC=DataTraveler\\x203.0\\x20\n\
        ID_SERIAL_SHORT=50E549C69BC5\n\
        ID_USB_DRIVER=usb-storage\n\
        ID_PART_TABLE_TYPE=dos\n";

    fn partition(name: &str, mountpoints: Vec<Option<String>>) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            label: Some("UDISK".to_string()),
            fstype: Some("vfat".to_string()),
            fsavail: Some("61906944".to_string()),
            mountpoints,
            children: Vec::new(),
        }
    }

    fn stick(children: Vec<BlockDevice>) -> BlockDevice {
        BlockDevice {
            name: "/dev/sdb".to_string(),
            children,
            ..BlockDevice::default()
        }
    }

    #[test]
    fn usb_storage_device_maps_identity_and_volumes() {
        let device = stick(vec![partition(
            "/dev/sdb1",
            vec![Some("/media/user/UDISK".to_string())],
        )]);

        let storage = storage_from_device(&device, KINGSTON_PROPS).unwrap();
        assert_eq!(storage.vendor_id, "0951");
        assert_eq!(storage.product_id, "1666");
        assert_eq!(storage.serial, "50E549C69BC5");
        assert_eq!(storage.vendor, "Kingston Technology");
        assert_eq!(storage.product, "DataTraveler 3.0");

        assert_eq!(storage.volumes.len(), 1);
        let volume = &storage.volumes[0];
        assert_eq!(volume.name, "/dev/sdb1");
        assert_eq!(volume.label, "UDISK");
        assert_eq!(volume.mount_point, "/media/user/UDISK");
        assert_eq!(volume.file_system, "vfat");
        assert_eq!(volume.free_space, 61906944);
        assert_eq!(volume.capacity, 0);
    }

    #[test]
    fn other_drivers_are_excluded() {
        let device = stick(Vec::new());
        let props = "ID_VENDOR_ID=0951\nID_USB_DRIVER=uas\n";
        assert!(storage_from_device(&device, props).is_none());
    }

    #[test]
    fn missing_driver_key_excludes_the_device() {
        let device = stick(Vec::new());
        let props = "ID_VENDOR_ID=0951\nID_MODEL_ID=1666\nID_SERIAL_SHORT=X\n";
        assert!(storage_from_device(&device, props).is_none());
    }

    #[test]
    fn device_without_partitions_still_appears() {
        let device = stick(Vec::new());
        let storage = storage_from_device(&device, KINGSTON_PROPS).unwrap();
        assert!(storage.volumes.is_empty());
    }

    #[test]
    fn property_values_split_on_first_equals_only() {
        let device = stick(Vec::new());
        let props = "ID_SERIAL_SHORT=AB=CD\nID_USB_DRIVER=usb-storage\n";
        let storage = storage_from_device(&device, props).unwrap();
        assert_eq!(storage.serial, "AB=CD");
    }

    #[test]
    fn encoded_spaces_decode_and_trim() {
        let device = stick(Vec::new());
        let props = "ID_VENDOR_ENC=\\x20Generic\\x20Flash\\x20\nID_USB_DRIVER=usb-storage\n";
        let storage = storage_from_device(&device, props).unwrap();
        assert_eq!(storage.vendor, "Generic Flash");
    }

    #[test]
    fn unparsable_fsavail_reads_as_zero() {
        let mut part = partition("/dev/sdb1", vec![Some("/mnt".to_string())]);
        part.fsavail = Some("n/a".to_string());
        let device = stick(vec![part]);
        let storage = storage_from_device(&device, KINGSTON_PROPS).unwrap();
        assert_eq!(storage.volumes[0].free_space, 0);
    }

    #[test]
    fn unmounted_partition_reports_empty_mount_point() {
        let device = stick(vec![partition("/dev/sdb1", vec![None])]);
        let storage = storage_from_device(&device, KINGSTON_PROPS).unwrap();
        assert_eq!(storage.volumes.len(), 1);
        assert!(storage.volumes[0].mount_point.is_empty());
    }

    #[test]
    fn partition_with_no_mount_point_entries_is_skipped() {
        let device = stick(vec![
            partition("/dev/sdb1", Vec::new()),
            partition("/dev/sdb2", vec![Some("/mnt".to_string())]),
        ]);
        let storage = storage_from_device(&device, KINGSTON_PROPS).unwrap();
        assert_eq!(storage.volumes.len(), 1);
        assert_eq!(storage.volumes[0].name, "/dev/sdb2");
    }

    #[test]
    fn lsblk_json_decodes_with_null_fields() {
        let json = r#"{
            "blockdevices": [
                {"name":"/dev/sdb", "fstype":null, "fsver":null, "label":null,
                 "uuid":null, "fsavail":null, "fsuse%":null, "mountpoints":[null],
                 "children": [
                    {"name":"/dev/sdb1", "fstype":"vfat", "fsver":"FAT32",
                     "label":"UDISK", "uuid":"A1B2-C3D4", "fsavail":"61906944",
                     "fsuse%":"2%", "mountpoints":["/media/user/UDISK"]}
                 ]}
            ]
        }"#;
        let parsed: LsblkOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.blockdevices.len(), 1);

        let storage = storage_from_device(&parsed.blockdevices[0], KINGSTON_PROPS).unwrap();
        assert_eq!(storage.volumes.len(), 1);
        assert_eq!(storage.volumes[0].label, "UDISK");
        assert_eq!(storage.volumes[0].mount_point, "/media/user/UDISK");
    }
}
