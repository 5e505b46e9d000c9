use thiserror::Error;

/// Device number the platform assigns to the disk it booted from.
pub const BOOT_DISK_NUMBER: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow,
    Deny(Refusal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Refusal {
    #[error("a zero disk signature is not a valid MBR signature")]
    ZeroSignature,
    #[error("refusing to modify disk {BOOT_DISK_NUMBER} (boot disk)")]
    BootDisk,
}

/// Checked before the disk is opened, so a refusal never reaches the device.
pub fn can_update_signature(disk_number: u32, signature: u32) -> SafetyDecision {
    if signature == 0 {
        return SafetyDecision::Deny(Refusal::ZeroSignature);
    }
    if disk_number == BOOT_DISK_NUMBER {
        return SafetyDecision::Deny(Refusal::BootDisk);
    }
    SafetyDecision::Allow
}
