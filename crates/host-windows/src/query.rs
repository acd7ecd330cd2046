use crate::{DiskDrive, DiskPartition, LogicalDisk, StorageQuery, UsbControllerDevice};
use anyhow::{Context, Result};
use windows::core::PCWSTR;
use windows::Win32::Storage::FileSystem::{GetDriveTypeW, GetLogicalDrives, DRIVE_REMOVABLE};
use wmi::{COMLibrary, WMIConnection};

/// Live WMI implementation of the relational queries.
pub struct WmiStorageQuery {
    connection: WMIConnection,
}

impl WmiStorageQuery {
    pub fn new() -> Result<Self> {
        let com = COMLibrary::new().context("initialize COM")?;
        let connection = WMIConnection::new(com).context("connect to WMI")?;
        Ok(Self { connection })
    }
}

impl StorageQuery for WmiStorageQuery {
    fn controller_devices(&self) -> Result<Vec<UsbControllerDevice>> {
        Ok(self
            .connection
            .raw_query("SELECT Antecedent, Dependent FROM Win32_USBControllerDevice")?)
    }

    fn disk_drives(&self, pnp_device_id: &str) -> Result<Vec<DiskDrive>> {
        // the id arrives from the association descriptor already in its
        // WQL-escaped form
        Ok(self.connection.raw_query(&format!(
            "SELECT DeviceID, Model FROM Win32_DiskDrive WHERE PnPDeviceID='{pnp_device_id}'"
        ))?)
    }

    fn drive_partitions(&self, drive_device_id: &str) -> Result<Vec<DiskPartition>> {
        Ok(self.connection.raw_query(&format!(
            "ASSOCIATORS OF {{Win32_DiskDrive.DeviceID='{drive_device_id}'}} \
             WHERE ResultClass = Win32_DiskPartition"
        ))?)
    }

    fn partition_logical_disks(&self, partition_device_id: &str) -> Result<Vec<LogicalDisk>> {
        Ok(self.connection.raw_query(&format!(
            "ASSOCIATORS OF {{Win32_DiskPartition.DeviceID='{partition_device_id}'}} \
             WHERE ResultClass = Win32_LogicalDisk"
        ))?)
    }

    fn removable_volume_paths(&self) -> Vec<String> {
        removable_drive_letters()
    }
}

fn wide(s: &str) -> Vec<u16> {
    use std::os::windows::prelude::*;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Drive roots currently backed by removable media, as `X:` paths.
pub fn removable_drive_letters() -> Vec<String> {
    let mut letters = Vec::new();
    unsafe {
        let mask = GetLogicalDrives();
        for (index, letter) in ('A'..='Z').enumerate() {
            if mask & (1u32 << index) == 0 {
                continue;
            }
            let root = wide(&format!("{letter}:\\"));
            if GetDriveTypeW(PCWSTR(root.as_ptr())) == DRIVE_REMOVABLE {
                letters.push(format!("{letter}:"));
            }
        }
    }
    letters
}
