use crate::device::{Access, ControlCode, DeviceSource, DiskDevice};
use crate::error::{DeviceError, DiscoveryError};

pub struct WindowsDisk;

impl DiskDevice for WindowsDisk {
    fn control(
        &mut self,
        _code: ControlCode,
        _input: &[u8],
        _output: &mut [u8],
    ) -> Result<usize, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSource;

impl WindowsSource {
    pub fn new() -> Self {
        WindowsSource
    }
}

impl DeviceSource for WindowsSource {
    type Device = WindowsDisk;

    fn present_disks(&self) -> Result<Vec<String>, DiscoveryError> {
        Err(DiscoveryError::Unsupported)
    }

    fn open(&self, _path: &str, _access: Access) -> Result<WindowsDisk, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn volume_path_names(&self, _volume_path: &str) -> Result<Vec<String>, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

pub fn is_process_elevated() -> bool {
    false
}
