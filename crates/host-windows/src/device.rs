use std::fmt;

use crate::error::{DeviceError, DiscoveryError};

/// The device-control requests the engines issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    GetDeviceNumber,
    QueryProperty,
    GetDriveGeometryEx,
    GetDriveLayoutEx,
    SetDriveLayoutEx,
}

impl ControlCode {
    pub fn name(self) -> &'static str {
        match self {
            ControlCode::GetDeviceNumber => "IOCTL_STORAGE_GET_DEVICE_NUMBER",
            ControlCode::QueryProperty => "IOCTL_STORAGE_QUERY_PROPERTY",
            ControlCode::GetDriveGeometryEx => "IOCTL_DISK_GET_DRIVE_GEOMETRY_EX",
            ControlCode::GetDriveLayoutEx => "IOCTL_DISK_GET_DRIVE_LAYOUT_EX",
            ControlCode::SetDriveLayoutEx => "IOCTL_DISK_SET_DRIVE_LAYOUT_EX",
        }
    }

    pub fn writes(self) -> bool {
        matches!(self, ControlCode::SetDriveLayoutEx)
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// An open disk handle. The handle is released when the value is dropped.
pub trait DiskDevice {
    /// Issues `code` with `input` and fills `output`, returning the number of
    /// bytes the device wrote.
    fn control(
        &mut self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, DeviceError>;
}

pub trait DeviceSource {
    type Device: DiskDevice;

    /// Interface paths of disk-class devices that are present and have the
    /// disk interface enabled.
    fn present_disks(&self) -> Result<Vec<String>, DiscoveryError>;

    fn open(&self, path: &str, access: Access) -> Result<Self::Device, DeviceError>;

    /// Drive letters and mounted folders for a `\\?\Volume{GUID}\` path, in
    /// platform order.
    fn volume_path_names(&self, volume_path: &str) -> Result<Vec<String>, DeviceError>;
}
