//! Volume Shadow Copy bindings for the snapshot orchestrator.

use std::ptr;

use tracing::debug;
use uuid::Uuid;
use windows::core::{BSTR, GUID, HRESULT, PWSTR};
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Storage::Vss::{
    CreateVssBackupComponentsInternal, IVssAsync, IVssBackupComponents,
    VssFreeSnapshotPropertiesInternal, VSS_BT_FULL, VSS_SNAPSHOT_PROP, VSS_S_ASYNC_CANCELLED,
    VSS_S_ASYNC_FINISHED, VSS_WRITER_STATE,
};
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_APARTMENTTHREADED};

use crate::snapshot::{
    AsyncOperation, AsyncStatus, BackupSession, PlatformError, SnapshotPlatform, WriterState,
    WriterStatus,
};

fn platform(context: &'static str) -> impl FnOnce(windows::core::Error) -> PlatformError {
    move |error| PlatformError::new(context, error.code().0)
}

fn uuid(id: GUID) -> Uuid {
    Uuid::from_u128(id.to_u128())
}

/// Uninitializes COM on drop.
pub struct ComApartment(());

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VssPlatform;

impl SnapshotPlatform for VssPlatform {
    type Apartment = ComApartment;
    type Session = VssSession;

    fn initialize_com(&self) -> Result<ComApartment, PlatformError> {
        unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }
            .ok()
            .map_err(platform("CoInitializeEx"))?;
        Ok(ComApartment(()))
    }

    fn create_session(&self, _apartment: &ComApartment) -> Result<VssSession, PlatformError> {
        let components = unsafe { CreateVssBackupComponentsInternal() }.map_err(|error| {
            let code = error.code();
            if code == E_ACCESSDENIED {
                PlatformError::new("CreateVssBackupComponents (access denied, not elevated?)", code.0)
            } else {
                PlatformError::new("CreateVssBackupComponents", code.0)
            }
        })?;
        Ok(VssSession { components })
    }
}

pub struct VssSession {
    components: IVssBackupComponents,
}

pub struct VssAsync(IVssAsync);

impl AsyncOperation for VssAsync {
    fn query_status(&mut self) -> Result<AsyncStatus, PlatformError> {
        let mut status = HRESULT(0);
        unsafe { self.0.QueryStatus(&mut status, ptr::null_mut()) }
            .map_err(platform("IVssAsync::QueryStatus"))?;
        Ok(if status == VSS_S_ASYNC_FINISHED {
            AsyncStatus::Finished
        } else if status == VSS_S_ASYNC_CANCELLED {
            AsyncStatus::Cancelled
        } else {
            AsyncStatus::Pending
        })
    }
}

impl BackupSession for VssSession {
    type Async = VssAsync;

    fn initialize_for_backup(&mut self) -> Result<(), PlatformError> {
        unsafe { self.components.InitializeForBackup(&BSTR::new()) }
            .map_err(platform("InitializeForBackup"))
    }

    fn gather_writer_metadata(&mut self) -> Result<VssAsync, PlatformError> {
        unsafe { self.components.GatherWriterMetadata() }
            .map(VssAsync)
            .map_err(platform("GatherWriterMetadata"))
    }

    fn set_backup_state(&mut self) -> Result<(), PlatformError> {
        unsafe { self.components.SetBackupState(false, false, VSS_BT_FULL, false) }
            .map_err(platform("SetBackupState"))
    }

    fn start_snapshot_set(&mut self) -> Result<Uuid, PlatformError> {
        unsafe { self.components.StartSnapshotSet() }
            .map(uuid)
            .map_err(platform("StartSnapshotSet"))
    }

    fn add_to_snapshot_set(&mut self, volume: &str) -> Result<Uuid, PlatformError> {
        let mut w = crate::win::wide(volume);
        unsafe {
            self.components
                .AddToSnapshotSet(PWSTR(w.as_mut_ptr()), GUID::zeroed())
        }
        .map(uuid)
        .map_err(platform("AddToSnapshotSet"))
    }

    fn prepare_for_backup(&mut self) -> Result<VssAsync, PlatformError> {
        unsafe { self.components.PrepareForBackup() }
            .map(VssAsync)
            .map_err(platform("PrepareForBackup"))
    }

    fn gather_writer_status(&mut self) -> Result<VssAsync, PlatformError> {
        unsafe { self.components.GatherWriterStatus() }
            .map(VssAsync)
            .map_err(platform("GatherWriterStatus"))
    }

    fn writer_statuses(&mut self) -> Result<Vec<WriterStatus>, PlatformError> {
        let count = unsafe { self.components.GetWriterStatusCount() }
            .map_err(platform("GetWriterStatusCount"))?;
        let mut writers = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut instance = GUID::zeroed();
            let mut writer = GUID::zeroed();
            let mut name = BSTR::new();
            let mut state = VSS_WRITER_STATE(0);
            let mut failure = HRESULT(0);
            unsafe {
                self.components.GetWriterStatus(
                    index,
                    &mut instance,
                    &mut writer,
                    &mut name,
                    &mut state,
                    &mut failure,
                )
            }
            .map_err(platform("GetWriterStatus"))?;
            writers.push(WriterStatus {
                name: name.to_string(),
                instance_id: uuid(instance),
                writer_id: uuid(writer),
                state: WriterState::from_raw(state.0 as u32),
                failure: failure.0,
            });
        }
        Ok(writers)
    }

    fn free_writer_status(&mut self) -> Result<(), PlatformError> {
        unsafe { self.components.FreeWriterStatus() }.map_err(platform("FreeWriterStatus"))
    }

    fn do_snapshot_set(&mut self) -> Result<VssAsync, PlatformError> {
        unsafe { self.components.DoSnapshotSet() }
            .map(VssAsync)
            .map_err(platform("DoSnapshotSet"))
    }

    fn snapshot_device(&mut self, snapshot_id: Uuid) -> Result<String, PlatformError> {
        let mut props = VSS_SNAPSHOT_PROP::default();
        unsafe {
            self.components
                .GetSnapshotProperties(GUID::from_u128(snapshot_id.as_u128()), &mut props)
        }
        .map_err(platform("GetSnapshotProperties"))?;
        let device = unsafe { props.m_pwszSnapshotDeviceObject.to_string() };
        unsafe { VssFreeSnapshotPropertiesInternal(&mut props) };
        let device = device.map_err(|_| PlatformError::new("GetSnapshotProperties", 0))?;
        debug!("snapshot {} exposed at {}", snapshot_id, device);
        Ok(device)
    }

    fn free_writer_metadata(&mut self) -> Result<(), PlatformError> {
        unsafe { self.components.FreeWriterMetadata() }.map_err(platform("FreeWriterMetadata"))
    }

    fn backup_complete(&mut self) -> Result<VssAsync, PlatformError> {
        unsafe { self.components.BackupComplete() }
            .map(VssAsync)
            .map_err(platform("BackupComplete"))
    }
}
