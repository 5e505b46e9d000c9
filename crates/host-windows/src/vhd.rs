//! Whole-disk virtual images: clone a physical disk into a VHD/VHDX, attach
//! it permanently, detach it. The storage type is left unknown so the image
//! format follows the file extension.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VhdError {
    #[error("{operation} failed for {path} with Win32 error {code}")]
    Win32 {
        operation: &'static str,
        path: String,
        code: u32,
    },
    #[error("virtual disk operations require Windows")]
    Unsupported,
}

impl VhdError {
    pub fn code(&self) -> Option<u32> {
        match self {
            VhdError::Win32 { code, .. } => Some(*code),
            VhdError::Unsupported => None,
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::VhdError;
    use std::path::Path;
    use tracing::{debug, info};
    use uuid::Uuid;

    use windows::core::{GUID, PCWSTR};
    use windows::Win32::Foundation::{HANDLE, WIN32_ERROR};
    use windows::Win32::Security::PSECURITY_DESCRIPTOR;
    use windows::Win32::Storage::Vhd::{
        AttachVirtualDisk, CreateVirtualDisk, DetachVirtualDisk, OpenVirtualDisk,
        ATTACH_VIRTUAL_DISK_FLAG_PERMANENT_LIFETIME, ATTACH_VIRTUAL_DISK_PARAMETERS,
        ATTACH_VIRTUAL_DISK_VERSION_1, CREATE_VIRTUAL_DISK_FLAG_FULL_PHYSICAL_ALLOCATION,
        CREATE_VIRTUAL_DISK_PARAMETERS, CREATE_VIRTUAL_DISK_VERSION_2,
        DETACH_VIRTUAL_DISK_FLAG_NONE, OPEN_VIRTUAL_DISK_FLAG_NONE, OPEN_VIRTUAL_DISK_PARAMETERS,
        OPEN_VIRTUAL_DISK_VERSION_2, VIRTUAL_DISK_ACCESS_NONE, VIRTUAL_STORAGE_TYPE,
    };

    use crate::win::{wide, OwnedHandle};

    const STORAGE_TYPE_DEVICE_UNKNOWN: u32 = 0;

    fn unknown_storage_type() -> VIRTUAL_STORAGE_TYPE {
        VIRTUAL_STORAGE_TYPE {
            DeviceId: STORAGE_TYPE_DEVICE_UNKNOWN,
            VendorId: GUID::zeroed(),
        }
    }

    fn check(operation: &'static str, path: &Path, status: WIN32_ERROR) -> Result<(), VhdError> {
        if status.is_ok() {
            return Ok(());
        }
        Err(VhdError::Win32 {
            operation,
            path: path.display().to_string(),
            code: status.0,
        })
    }

    pub fn clone_from_disk(disk_number: u32, vhd_path: &Path) -> Result<(), VhdError> {
        let source = diskscope_core::physical_drive_path(disk_number);
        info!("cloning {} into {}", source, vhd_path.display());
        let source_w = wide(&source);
        let path_w = wide(&vhd_path.to_string_lossy());

        let mut params = CREATE_VIRTUAL_DISK_PARAMETERS::default();
        params.Version = CREATE_VIRTUAL_DISK_VERSION_2;
        unsafe {
            let v2 = &mut params.Anonymous.Version2;
            v2.UniqueId = GUID::from_u128(Uuid::new_v4().as_u128());
            v2.MaximumSize = 0;
            v2.SourcePath = PCWSTR(source_w.as_ptr());
        }

        let storage_type = unknown_storage_type();
        let mut handle = HANDLE::default();
        // Blocks until the whole disk has been copied.
        let status = unsafe {
            CreateVirtualDisk(
                &storage_type,
                PCWSTR(path_w.as_ptr()),
                VIRTUAL_DISK_ACCESS_NONE,
                PSECURITY_DESCRIPTOR::default(),
                CREATE_VIRTUAL_DISK_FLAG_FULL_PHYSICAL_ALLOCATION,
                0,
                &params,
                None,
                &mut handle,
            )
        };
        if !handle.is_invalid() && handle != HANDLE::default() {
            drop(OwnedHandle(handle));
        }
        check("CreateVirtualDisk", vhd_path, status)
    }

    fn open(vhd_path: &Path) -> Result<OwnedHandle, VhdError> {
        let path_w = wide(&vhd_path.to_string_lossy());
        let storage_type = unknown_storage_type();
        let mut params = OPEN_VIRTUAL_DISK_PARAMETERS::default();
        params.Version = OPEN_VIRTUAL_DISK_VERSION_2;

        let mut handle = HANDLE::default();
        let status = unsafe {
            OpenVirtualDisk(
                &storage_type,
                PCWSTR(path_w.as_ptr()),
                VIRTUAL_DISK_ACCESS_NONE,
                OPEN_VIRTUAL_DISK_FLAG_NONE,
                Some(&params),
                &mut handle,
            )
        };
        check("OpenVirtualDisk", vhd_path, status)?;
        debug!("opened {}", vhd_path.display());
        Ok(OwnedHandle(handle))
    }

    pub fn attach(vhd_path: &Path) -> Result<(), VhdError> {
        let handle = open(vhd_path)?;
        let mut params = ATTACH_VIRTUAL_DISK_PARAMETERS::default();
        params.Version = ATTACH_VIRTUAL_DISK_VERSION_1;

        // A permanent surface outlives the handle.
        let status = unsafe {
            AttachVirtualDisk(
                handle.0,
                PSECURITY_DESCRIPTOR::default(),
                ATTACH_VIRTUAL_DISK_FLAG_PERMANENT_LIFETIME,
                0,
                Some(&params),
                None,
            )
        };
        check("AttachVirtualDisk", vhd_path, status)?;
        info!("attached {}", vhd_path.display());
        Ok(())
    }

    pub fn detach(vhd_path: &Path) -> Result<(), VhdError> {
        let handle = open(vhd_path)?;
        let status = unsafe { DetachVirtualDisk(handle.0, DETACH_VIRTUAL_DISK_FLAG_NONE, 0) };
        check("DetachVirtualDisk", vhd_path, status)?;
        info!("detached {}", vhd_path.display());
        Ok(())
    }
}

#[cfg(windows)]
pub fn clone_from_disk(disk_number: u32, vhd_path: impl AsRef<Path>) -> Result<(), VhdError> {
    windows_impl::clone_from_disk(disk_number, vhd_path.as_ref())
}

#[cfg(not(windows))]
pub fn clone_from_disk(_disk_number: u32, _vhd_path: impl AsRef<Path>) -> Result<(), VhdError> {
    Err(VhdError::Unsupported)
}

#[cfg(windows)]
pub fn attach(vhd_path: impl AsRef<Path>) -> Result<(), VhdError> {
    windows_impl::attach(vhd_path.as_ref())
}

#[cfg(not(windows))]
pub fn attach(_vhd_path: impl AsRef<Path>) -> Result<(), VhdError> {
    Err(VhdError::Unsupported)
}

#[cfg(windows)]
pub fn detach(vhd_path: impl AsRef<Path>) -> Result<(), VhdError> {
    windows_impl::detach(vhd_path.as_ref())
}

#[cfg(not(windows))]
pub fn detach(_vhd_path: impl AsRef<Path>) -> Result<(), VhdError> {
    Err(VhdError::Unsupported)
}
