use std::ffi::c_void;
use std::io;
use std::mem::size_of;

use tracing::debug;
use windows::core::{GUID, PCWSTR};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT, HDEVINFO,
    SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
};
use windows::Win32::Foundation::{CloseHandle, ERROR_NO_MORE_ITEMS, HANDLE, HWND};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, GetVolumePathNamesForVolumeNameW, FILE_ATTRIBUTE_NORMAL, FILE_GENERIC_READ,
    FILE_GENERIC_WRITE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::{
    GUID_DEVINTERFACE_DISK, IOCTL_DISK_GET_DRIVE_GEOMETRY_EX, IOCTL_DISK_GET_DRIVE_LAYOUT_EX,
    IOCTL_DISK_SET_DRIVE_LAYOUT_EX, IOCTL_STORAGE_GET_DEVICE_NUMBER, IOCTL_STORAGE_QUERY_PROPERTY,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use crate::device::{Access, ControlCode, DeviceSource, DiskDevice};
use crate::error::{DeviceError, DiscoveryError};

pub(crate) fn wide(s: &str) -> Vec<u16> {
    use std::os::windows::prelude::*;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Maps a `windows` error onto the Win32 code it wraps.
pub(crate) fn os_error(error: &windows::core::Error) -> io::Error {
    let code = error.code().0 as u32;
    if code & 0xFFFF_0000 == 0x8007_0000 {
        io::Error::from_raw_os_error((code & 0xFFFF) as i32)
    } else {
        io::Error::from_raw_os_error(code as i32)
    }
}

/// Closes the wrapped handle on drop.
pub(crate) struct OwnedHandle(pub(crate) HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

struct DeviceInfoSet(HDEVINFO);

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        unsafe {
            let _ = SetupDiDestroyDeviceInfoList(self.0);
        }
    }
}

fn ioctl(code: ControlCode) -> u32 {
    match code {
        ControlCode::GetDeviceNumber => IOCTL_STORAGE_GET_DEVICE_NUMBER,
        ControlCode::QueryProperty => IOCTL_STORAGE_QUERY_PROPERTY,
        ControlCode::GetDriveGeometryEx => IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
        ControlCode::GetDriveLayoutEx => IOCTL_DISK_GET_DRIVE_LAYOUT_EX,
        ControlCode::SetDriveLayoutEx => IOCTL_DISK_SET_DRIVE_LAYOUT_EX,
    }
}

pub struct WindowsDisk {
    handle: OwnedHandle,
}

impl DiskDevice for WindowsDisk {
    fn control(
        &mut self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, DeviceError> {
        let mut returned = 0u32;
        let input_ptr = (!input.is_empty()).then(|| input.as_ptr() as *const c_void);
        let output_ptr = (!output.is_empty()).then(|| output.as_mut_ptr() as *mut c_void);
        unsafe {
            DeviceIoControl(
                self.handle.0,
                ioctl(code),
                input_ptr,
                input.len() as u32,
                output_ptr,
                output.len() as u32,
                Some(&mut returned),
                None,
            )
        }
        .map_err(|error| DeviceError::Control {
            code,
            source: os_error(&error),
        })?;
        Ok(returned as usize)
    }
}

/// The live host: SetupAPI for the disk interface class, CreateFileW and
/// DeviceIoControl for each device.
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
        let class: GUID = GUID_DEVINTERFACE_DISK;
        let set = unsafe {
            SetupDiGetClassDevsW(
                Some(&class),
                PCWSTR::null(),
                HWND::default(),
                DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
            )
        }
        .map_err(|error| DiscoveryError::DeviceClass(os_error(&error)))?;
        let set = DeviceInfoSet(set);

        let mut paths = Vec::new();
        for index in 0.. {
            let mut interface = SP_DEVICE_INTERFACE_DATA {
                cbSize: size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
                ..Default::default()
            };
            let enumerated =
                unsafe { SetupDiEnumDeviceInterfaces(set.0, None, &class, index, &mut interface) };
            match enumerated {
                Ok(()) => {}
                Err(error) if error.code() == ERROR_NO_MORE_ITEMS.to_hresult() => break,
                Err(error) => return Err(DiscoveryError::DeviceClass(os_error(&error))),
            }
            match interface_path(&set, &interface) {
                Ok(path) => paths.push(path),
                Err(error) => debug!("interface {} has no readable path: {}", index, error),
            }
        }
        Ok(paths)
    }

    fn open(&self, path: &str, access: Access) -> Result<WindowsDisk, DeviceError> {
        let w = wide(path);
        let desired = match access {
            Access::Read => FILE_GENERIC_READ.0,
            Access::ReadWrite => FILE_GENERIC_READ.0 | FILE_GENERIC_WRITE.0,
        };
        let handle = unsafe {
            CreateFileW(
                PCWSTR(w.as_ptr()),
                desired,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }
        .map_err(|error| DeviceError::Open {
            path: path.to_string(),
            source: os_error(&error),
        })?;
        Ok(WindowsDisk {
            handle: OwnedHandle(handle),
        })
    }

    fn volume_path_names(&self, volume_path: &str) -> Result<Vec<String>, DeviceError> {
        let w = wide(volume_path);
        let mut buf = vec![0u16; 512];
        let mut needed = 0u32;
        let mut result = unsafe {
            GetVolumePathNamesForVolumeNameW(PCWSTR(w.as_ptr()), Some(&mut buf), &mut needed)
        };
        if result.is_err() && needed as usize > buf.len() {
            buf = vec![0u16; needed as usize];
            result = unsafe {
                GetVolumePathNamesForVolumeNameW(PCWSTR(w.as_ptr()), Some(&mut buf), &mut needed)
            };
        }
        result.map_err(|error| DeviceError::VolumeNames {
            path: volume_path.to_string(),
            source: os_error(&error),
        })?;
        Ok(split_multi_sz(&buf))
    }
}

fn interface_path(set: &DeviceInfoSet, interface: &SP_DEVICE_INTERFACE_DATA) -> io::Result<String> {
    let mut required = 0u32;
    // First call only sizes the detail structure and is expected to fail.
    let _ = unsafe {
        SetupDiGetDeviceInterfaceDetailW(set.0, interface, None, 0, Some(&mut required), None)
    };
    if required == 0 {
        return Err(io::Error::last_os_error());
    }

    // u32 storage keeps the detail header aligned.
    let mut storage = vec![0u32; (required as usize + 3) / 4];
    let detail = storage.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
    unsafe {
        (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
        SetupDiGetDeviceInterfaceDetailW(set.0, interface, Some(detail), required, None, None)
            .map_err(|error| os_error(&error))?;
    }

    let units = unsafe {
        std::slice::from_raw_parts(
            storage.as_ptr().cast::<u8>().add(4).cast::<u16>(),
            (required as usize - 4) / 2,
        )
    };
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    Ok(String::from_utf16_lossy(&units[..end]))
}

fn split_multi_sz(buf: &[u16]) -> Vec<String> {
    buf.split(|&u| u == 0)
        .take_while(|name| !name.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// True when the process token is elevated.
pub fn is_process_elevated() -> bool {
    let mut token = HANDLE::default();
    if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) }.is_err() {
        return false;
    }
    let token = OwnedHandle(token);

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned = 0u32;
    let queried = unsafe {
        GetTokenInformation(
            token.0,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    queried.is_ok() && elevation.TokenIsElevated != 0
}
