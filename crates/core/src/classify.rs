//! Well-known partition type identifiers and their display names.

use crate::PartitionStyle;
use uuid::Uuid;

pub const UNKNOWN_PARTITION_TYPE: &str = "UNKNOWN";

pub const PARTITION_BASIC_DATA_GUID: Uuid = Uuid::from_u128(0xebd0a0a2_b9e5_4433_87c0_68b6b72699c7);
pub const PARTITION_ENTRY_UNUSED_GUID: Uuid = Uuid::nil();
pub const PARTITION_SYSTEM_GUID: Uuid = Uuid::from_u128(0xc12a7328_f81f_11d2_ba4b_00a0c93ec93b);
pub const PARTITION_MSFT_RESERVED_GUID: Uuid = Uuid::from_u128(0xe3c9e316_0b5c_4db8_817d_f92df00215ae);
pub const PARTITION_LDM_METADATA_GUID: Uuid = Uuid::from_u128(0x5808c8aa_7e8f_42e0_85d2_e1e90434cfb3);
pub const PARTITION_LDM_DATA_GUID: Uuid = Uuid::from_u128(0xaf9b60a0_1431_4f62_bc68_3311714a69ad);
pub const PARTITION_MSFT_RECOVERY_GUID: Uuid = Uuid::from_u128(0xde94bba4_06d1_4d40_a16a_bfd50179d6ac);

const GPT_TYPES: &[(Uuid, &str)] = &[
    (PARTITION_BASIC_DATA_GUID, "PARTITION_BASIC_DATA_GUID"),
    (PARTITION_ENTRY_UNUSED_GUID, "PARTITION_ENTRY_UNUSED_GUID"),
    (PARTITION_SYSTEM_GUID, "PARTITION_SYSTEM_GUID"),
    (PARTITION_MSFT_RESERVED_GUID, "PARTITION_MSFT_RESERVED_GUID"),
    (PARTITION_LDM_METADATA_GUID, "PARTITION_LDM_METADATA_GUID"),
    (PARTITION_LDM_DATA_GUID, "PARTITION_LDM_DATA_GUID"),
    (PARTITION_MSFT_RECOVERY_GUID, "PARTITION_MSFT_RECOVERY_GUID"),
];

// winioctl.h partition type codes
const MBR_TYPES: &[(u8, &str)] = &[
    (0x00, "PARTITION_ENTRY_UNUSED"),
    (0x01, "PARTITION_FAT_12"),
    (0x04, "PARTITION_FAT_16"),
    (0x05, "PARTITION_EXTENDED"),
    (0x07, "PARTITION_IFS"),
    (0x0B, "PARTITION_FAT32"),
    (0x0C, "PARTITION_FAT32_XINT13"),
    (0x0E, "PARTITION_XINT13"),
    (0x0F, "PARTITION_XINT13_EXTENDED"),
    (0x27, "PARTITION_MSFT_RECOVERY"),
    (0x42, "PARTITION_LDM"),
];

pub fn gpt_partition_type_name(partition_type: &Uuid) -> &'static str {
    GPT_TYPES
        .iter()
        .find(|(id, _)| id == partition_type)
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_PARTITION_TYPE)
}

pub fn mbr_partition_type_name(partition_type: u8) -> &'static str {
    MBR_TYPES
        .iter()
        .find(|(code, _)| *code == partition_type)
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_PARTITION_TYPE)
}

pub fn partition_style_name(style: PartitionStyle) -> &'static str {
    match style {
        PartitionStyle::Mbr => "PARTITION_STYLE_MBR",
        PartitionStyle::Gpt => "PARTITION_STYLE_GPT",
        PartitionStyle::Raw => "PARTITION_STYLE_RAW",
    }
}
