use diskscope_core::{
    partition_style_name, physical_drive_path, volume_path, DiskMap, DiskRecord, DriveLayout,
    PartitionRecord, FILE_DEVICE_DISK,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::{Access, ControlCode, DeviceSource, DiskDevice};
use crate::error::{DeviceError, DiscoveryError};
use crate::layout::{
    decode_device_descriptor, decode_device_number, decode_drive_layout, decode_geometry_ex,
    device_property_query, DeviceDescriptor, DEVICE_NUMBER_SIZE, GEOMETRY_BUFFER_SIZE,
    LAYOUT_BUFFER_SIZE, PROPERTY_BUFFER_SIZE,
};

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub disks: DiskMap,
    pub skipped: Vec<SkippedDevice>,
}

#[derive(Debug)]
pub struct SkippedDevice {
    pub path: String,
    pub reason: DeviceError,
}

/// Builds the topology of every present disk, keyed by device number.
///
/// One device failing to open or decode never aborts the scan; it is listed
/// in `skipped` with the reason.
pub fn enumerate<S: DeviceSource>(source: &S) -> Result<DiscoveryReport, DiscoveryError> {
    let paths = source.present_disks()?;
    if paths.is_empty() {
        return Err(DiscoveryError::NoDevices);
    }

    let mut report = DiscoveryReport::default();
    for path in paths {
        match read_disk(source, &path) {
            Ok(disk) if report.disks.contains_key(&disk.device_number) => {
                warn!(path = %path, device_number = disk.device_number, "duplicate device number");
                report.skipped.push(SkippedDevice {
                    path,
                    reason: DeviceError::DuplicateDeviceNumber(disk.device_number),
                });
            }
            Ok(disk) => {
                debug!(
                    "{} => {} ({})",
                    disk.device_number,
                    disk.device_path,
                    partition_style_name(disk.style())
                );
                report.disks.insert(disk.device_number, disk);
            }
            Err(reason) => {
                warn!(path = %path, error = %reason, "skipping disk");
                report.skipped.push(SkippedDevice { path, reason });
            }
        }
    }

    info!(
        disks = report.disks.len(),
        skipped = report.skipped.len(),
        "disk discovery finished"
    );
    Ok(report)
}

fn read_disk<S: DeviceSource>(source: &S, path: &str) -> Result<DiskRecord, DeviceError> {
    let mut device = source.open(path, Access::Read)?;

    let mut buf = [0u8; DEVICE_NUMBER_SIZE];
    let n = device.control(ControlCode::GetDeviceNumber, &[], &mut buf)?;
    let number = decode_device_number(&buf[..n])?;

    let descriptor = query_descriptor(&mut device).unwrap_or_else(|error| {
        warn!(path = %path, error = %error, "device property query failed");
        DeviceDescriptor::default()
    });

    let mut buf = [0u8; GEOMETRY_BUFFER_SIZE];
    let n = device.control(ControlCode::GetDriveGeometryEx, &[], &mut buf)?;
    let (geometry, size_bytes) = decode_geometry_ex(&buf[..n])?;

    let mut buf = vec![0u8; LAYOUT_BUFFER_SIZE];
    let n = device.control(ControlCode::GetDriveLayoutEx, &[], &mut buf)?;
    let decoded = decode_drive_layout(&buf[..n])?;

    match decoded.layout {
        DriveLayout::Mbr {
            signature,
            checksum,
        } => debug!("disk {}: Mbr.Signature {:#010x} Mbr.CheckSum {:#010x}", number.device_number, signature, checksum),
        DriveLayout::Gpt { disk_id, .. } => {
            debug!("disk {}: Gpt.DiskId {}", number.device_number, disk_id)
        }
        DriveLayout::Raw => debug!("disk {}: raw", number.device_number),
    }
    debug!(
        "disk {} has {} partitions ({} entries)",
        number.device_number,
        decoded.partitions.len(),
        decoded.reported_count
    );

    let device_name =
        (number.device_type == FILE_DEVICE_DISK).then(|| physical_drive_path(number.device_number));

    Ok(DiskRecord {
        device_number: number.device_number,
        device_type: number.device_type,
        device_path: path.to_string(),
        device_name,
        vendor_id: descriptor.vendor_id,
        product_id: descriptor.product_id,
        product_revision: descriptor.product_revision,
        serial_number: descriptor.serial_number,
        removable: descriptor.removable,
        geometry,
        size_bytes,
        layout: decoded.layout,
        partitions: decoded.partitions,
    })
}

fn query_descriptor<D: DiskDevice>(device: &mut D) -> Result<DeviceDescriptor, DeviceError> {
    let mut buf = vec![0u8; PROPERTY_BUFFER_SIZE];
    let n = device.control(ControlCode::QueryProperty, &device_property_query(), &mut buf)?;
    decode_device_descriptor(&buf[..n])
}

/// Drive letters and mount folders bound to the volume with this identifier.
/// The first entry is the conventional display name.
pub fn dos_names_for_volume<S: DeviceSource>(source: &S, id: &Uuid) -> Vec<String> {
    let path = volume_path(id);
    match source.volume_path_names(&path) {
        Ok(names) => names,
        Err(error) => {
            debug!(volume = %path, error = %error, "no volume path names");
            Vec::new()
        }
    }
}

pub fn dos_names_for_partition<S: DeviceSource>(source: &S, partition: &PartitionRecord) -> Vec<String> {
    dos_names_for_volume(source, &partition.partition_id())
}
