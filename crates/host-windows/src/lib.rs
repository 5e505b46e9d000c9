//! Disk topology discovery, MBR signature editing, volume snapshots and
//! virtual disk images on Windows.
//!
//! The engines are written against the [`DeviceSource`] and
//! [`SnapshotPlatform`] traits. [`WindowsSource`] and `VssPlatform` bind them
//! to the host; off Windows the bindings report `Unsupported`.

mod device;
mod discovery;
mod error;
mod layout;
mod signature;
pub mod snapshot;
pub mod vhd;

#[cfg(windows)]
mod win;
#[cfg(not(windows))]
mod win_stub;
#[cfg(windows)]
mod vss;

#[cfg(test)]
mod testing;

pub use device::{Access, ControlCode, DeviceSource, DiskDevice};
pub use discovery::{
    dos_names_for_partition, dos_names_for_volume, enumerate, DiscoveryReport, SkippedDevice,
};
pub use error::{DeviceError, DiscoveryError};
pub use signature::{update_signature, SignatureStatus};
pub use snapshot::{
    SnapshotError, SnapshotOptions, SnapshotOrchestrator, SnapshotOutcome, SnapshotPhase,
};

#[cfg(windows)]
pub use vss::VssPlatform;
#[cfg(windows)]
pub use win::{is_process_elevated, WindowsSource};
#[cfg(not(windows))]
pub use win_stub::{is_process_elevated, WindowsSource};

/// Copies the snapshot artifact of `source_volume` into `destination` through
/// a shadow copy of the volume.
#[cfg(windows)]
pub fn shadow_copy(
    source_volume: &str,
    destination: &str,
    options: SnapshotOptions,
) -> Result<SnapshotOutcome, SnapshotError> {
    SnapshotOrchestrator::new(VssPlatform, options).snapshot_copy(source_volume, destination)
}

#[cfg(not(windows))]
pub fn shadow_copy(
    _source_volume: &str,
    _destination: &str,
    _options: SnapshotOptions,
) -> Result<SnapshotOutcome, SnapshotError> {
    Err(SnapshotError::Unsupported)
}
