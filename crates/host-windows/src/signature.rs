use diskscope_core::physical_drive_path;
use diskscope_safety::{can_update_signature, Refusal, SafetyDecision};
use tracing::{info, warn};

use crate::device::{Access, ControlCode, DeviceSource, DiskDevice};
use crate::error::DeviceError;
use crate::layout::{layout_style, patch_mbr_signature, LAYOUT_BUFFER_SIZE};
use diskscope_core::PartitionStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Updated { previous: u32 },
    RefusedZeroSignature,
    RefusedBootDisk,
    NotMbr,
}

impl SignatureStatus {
    /// Process exit code for the status.
    pub fn code(self) -> i32 {
        match self {
            SignatureStatus::Updated { .. } => 0,
            SignatureStatus::RefusedZeroSignature => -1,
            SignatureStatus::RefusedBootDisk => -2,
            SignatureStatus::NotMbr => -3,
        }
    }
}

/// Rewrites the MBR disk signature of `\\.\PhysicalDrive<disk_number>`.
///
/// The whole layout is read into the full-capacity buffer, only the signature
/// field is changed, and the same buffer is written back in one request.
pub fn update_signature<S: DeviceSource>(
    source: &S,
    disk_number: u32,
    signature: u32,
) -> Result<SignatureStatus, DeviceError> {
    match can_update_signature(disk_number, signature) {
        SafetyDecision::Allow => {}
        SafetyDecision::Deny(refusal) => {
            warn!(disk_number, "{}", refusal);
            return Ok(match refusal {
                Refusal::ZeroSignature => SignatureStatus::RefusedZeroSignature,
                Refusal::BootDisk => SignatureStatus::RefusedBootDisk,
            });
        }
    }

    let path = physical_drive_path(disk_number);
    let mut device = source.open(&path, Access::ReadWrite)?;

    let mut buf = vec![0u8; LAYOUT_BUFFER_SIZE];
    device.control(ControlCode::GetDriveLayoutEx, &[], &mut buf)?;
    if layout_style(&buf)? != PartitionStyle::Mbr {
        warn!(disk_number, "disk is not using MBR, not updating signature");
        return Ok(SignatureStatus::NotMbr);
    }

    let previous = patch_mbr_signature(&mut buf, signature)?;
    info!("{}: MBR signature {:#010x} -> {:#010x}", path, previous, signature);
    device.control(ControlCode::SetDriveLayoutEx, &buf, &mut [])?;
    Ok(SignatureStatus::Updated { previous })
}
