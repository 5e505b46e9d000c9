//! Decoding of the device-control output structures (x64 layouts).
//!
//! Every structure is read out of a caller-owned byte buffer with explicit
//! offsets, so a short or malformed reply becomes a `DeviceError` instead of an
//! out-of-bounds read.

use diskscope_core::{
    DiskGeometry, DriveLayout, GptPartition, MbrPartition, PartitionKind, PartitionRecord,
    PartitionStyle, MAX_PARTITION_ENTRIES,
};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::DeviceError;

pub const DEVICE_NUMBER_SIZE: usize = 12;
pub const PROPERTY_BUFFER_SIZE: usize = 8 * 1024;
pub const GEOMETRY_BUFFER_SIZE: usize = 256;

/// `DRIVE_LAYOUT_INFORMATION_EX` up to (not including) `PartitionEntry`.
pub const LAYOUT_HEADER_SIZE: usize = 48;
/// `sizeof(PARTITION_INFORMATION_EX)`.
pub const PARTITION_ENTRY_SIZE: usize = 144;
/// Fixed over-allocation for the layout query, one slot per GPT entry.
pub const LAYOUT_BUFFER_SIZE: usize = LAYOUT_HEADER_SIZE + MAX_PARTITION_ENTRIES * PARTITION_ENTRY_SIZE;

const STYLE_MBR: u32 = 0;
const STYLE_GPT: u32 = 1;
const STYLE_RAW: u32 = 2;

const DESCRIPTOR_MIN_SIZE: usize = 28;
const GEOMETRY_EX_MIN_SIZE: usize = 32;
const GPT_NAME_CHARS: usize = 36;

/// Signature field offset inside `DRIVE_LAYOUT_INFORMATION_EX`.
pub const MBR_SIGNATURE_OFFSET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNumber {
    pub device_type: u32,
    pub device_number: u32,
    pub partition_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: String,
    pub product_id: String,
    pub product_revision: String,
    pub serial_number: String,
    pub removable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLayout {
    pub layout: DriveLayout,
    pub reported_count: usize,
    pub partitions: BTreeMap<u32, PartitionRecord>,
}

/// `STORAGE_PROPERTY_QUERY { StorageDeviceProperty, PropertyStandardQuery }`.
pub fn device_property_query() -> [u8; 12] {
    [0u8; 12]
}

pub fn decode_device_number(buf: &[u8]) -> Result<DeviceNumber, DeviceError> {
    require(buf, DEVICE_NUMBER_SIZE, "STORAGE_DEVICE_NUMBER")?;
    Ok(DeviceNumber {
        device_type: read_u32(buf, 0),
        device_number: read_u32(buf, 4),
        partition_number: read_u32(buf, 8),
    })
}

pub fn decode_device_descriptor(buf: &[u8]) -> Result<DeviceDescriptor, DeviceError> {
    require(buf, DESCRIPTOR_MIN_SIZE, "STORAGE_DEVICE_DESCRIPTOR")?;
    let string_at = |field: usize| read_cstr(buf, read_u32(buf, field) as usize).unwrap_or_default();
    Ok(DeviceDescriptor {
        removable: buf[10] != 0,
        vendor_id: string_at(12),
        product_id: string_at(16),
        product_revision: string_at(20),
        serial_number: string_at(24),
    })
}

pub fn decode_geometry_ex(buf: &[u8]) -> Result<(DiskGeometry, u64), DeviceError> {
    require(buf, GEOMETRY_EX_MIN_SIZE, "DISK_GEOMETRY_EX")?;
    let geometry = DiskGeometry {
        cylinders: read_i64(buf, 0),
        media_type: read_u32(buf, 8),
        tracks_per_cylinder: read_u32(buf, 12),
        sectors_per_track: read_u32(buf, 16),
        bytes_per_sector: read_u32(buf, 20),
    };
    Ok((geometry, read_i64(buf, 24)))
}

pub fn layout_style(buf: &[u8]) -> Result<PartitionStyle, DeviceError> {
    require(buf, LAYOUT_HEADER_SIZE, "DRIVE_LAYOUT_INFORMATION_EX")?;
    style_from_raw(read_u32(buf, 0))
}

pub fn decode_drive_layout(buf: &[u8]) -> Result<DecodedLayout, DeviceError> {
    let style = layout_style(buf)?;
    let count = read_u32(buf, 4) as usize;
    if count > MAX_PARTITION_ENTRIES {
        return Err(DeviceError::TooManyPartitions {
            count,
            max: MAX_PARTITION_ENTRIES,
        });
    }
    require(
        buf,
        LAYOUT_HEADER_SIZE + count * PARTITION_ENTRY_SIZE,
        "DRIVE_LAYOUT_INFORMATION_EX",
    )?;

    let layout = match style {
        PartitionStyle::Mbr => DriveLayout::Mbr {
            signature: read_u32(buf, MBR_SIGNATURE_OFFSET),
            checksum: read_u32(buf, 12),
        },
        PartitionStyle::Gpt => DriveLayout::Gpt {
            disk_id: read_guid(buf, 8),
            starting_usable_offset: read_i64(buf, 24),
            usable_length: read_i64(buf, 32),
            max_partition_count: read_u32(buf, 40),
        },
        PartitionStyle::Raw => DriveLayout::Raw,
    };

    let mut partitions = BTreeMap::new();
    if style != PartitionStyle::Raw {
        for index in 0..count {
            let entry = &buf[LAYOUT_HEADER_SIZE + index * PARTITION_ENTRY_SIZE..][..PARTITION_ENTRY_SIZE];
            if let Some(record) = decode_partition_entry(entry, index, style)? {
                partitions.insert(index as u32, record);
            }
        }
    }

    Ok(DecodedLayout {
        layout,
        reported_count: count,
        partitions,
    })
}

/// Zero-length entries yield `None`; they are never stored.
fn decode_partition_entry(
    entry: &[u8],
    index: usize,
    disk_style: PartitionStyle,
) -> Result<Option<PartitionRecord>, DeviceError> {
    let length = read_i64(entry, 16);
    if length == 0 {
        return Ok(None);
    }
    let entry_style = style_from_raw(read_u32(entry, 0))?;
    if entry_style != disk_style {
        return Err(DeviceError::StyleMismatch {
            index,
            expected: disk_style,
            found: entry_style,
        });
    }

    let kind = match disk_style {
        PartitionStyle::Mbr => PartitionKind::Mbr(MbrPartition {
            partition_type: entry[32],
            boot_indicator: entry[33] != 0,
            recognized: entry[34] != 0,
            hidden_sectors: read_u32(entry, 36),
            partition_id: read_guid(entry, 40),
        }),
        PartitionStyle::Gpt => PartitionKind::Gpt(GptPartition {
            partition_type: read_guid(entry, 32),
            partition_id: read_guid(entry, 48),
            attributes: read_u64(entry, 64),
            name: read_utf16_name(&entry[72..72 + GPT_NAME_CHARS * 2]),
        }),
        PartitionStyle::Raw => return Ok(None),
    };

    Ok(Some(PartitionRecord::new(
        read_i64(entry, 8),
        length,
        read_u32(entry, 24),
        entry[28] != 0,
        entry[29] != 0,
        kind,
    )))
}

/// Rewrites the MBR signature in a layout buffer in place and returns the
/// previous value. Nothing else in the buffer changes.
pub fn patch_mbr_signature(buf: &mut [u8], signature: u32) -> Result<u32, DeviceError> {
    let style = layout_style(buf)?;
    if style != PartitionStyle::Mbr {
        return Err(DeviceError::StyleMismatch {
            index: 0,
            expected: PartitionStyle::Mbr,
            found: style,
        });
    }
    let previous = read_u32(buf, MBR_SIGNATURE_OFFSET);
    buf[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 4].copy_from_slice(&signature.to_le_bytes());
    Ok(previous)
}

fn style_from_raw(raw: u32) -> Result<PartitionStyle, DeviceError> {
    match raw {
        STYLE_MBR => Ok(PartitionStyle::Mbr),
        STYLE_GPT => Ok(PartitionStyle::Gpt),
        STYLE_RAW => Ok(PartitionStyle::Raw),
        other => Err(DeviceError::UnknownStyle(other)),
    }
}

fn require(buf: &[u8], needed: usize, structure: &'static str) -> Result<(), DeviceError> {
    if buf.len() < needed {
        return Err(DeviceError::Truncated {
            structure,
            needed,
            got: buf.len(),
        });
    }
    Ok(())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

// LARGE_INTEGER fields; a negative value is treated as zero.
fn read_i64(buf: &[u8], off: usize) -> u64 {
    (read_u64(buf, off) as i64).max(0) as u64
}

fn read_guid(buf: &[u8], off: usize) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&buf[off..off + 16]);
    Uuid::from_bytes_le(bytes)
}

// Offset zero means the field is absent.
fn read_cstr(buf: &[u8], off: usize) -> Option<String> {
    if off == 0 || off >= buf.len() {
        return None;
    }
    let tail = &buf[off..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Some(String::from_utf8_lossy(&tail[..end]).trim().to_string())
}

fn read_utf16_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor_bytes, device_number_bytes, geometry_bytes, LayoutBuilder};
    use diskscope_core::{classify, parse_volume_path};

    #[test]
    fn layout_buffer_matches_gpt_capacity() {
        assert_eq!(LAYOUT_BUFFER_SIZE, 18480);
    }

    #[test]
    fn decodes_device_number() {
        let number = decode_device_number(&device_number_bytes(7, 3, 0)).unwrap();
        assert_eq!(number.device_type, 7);
        assert_eq!(number.device_number, 3);
        assert_eq!(number.partition_number, 0);
    }

    #[test]
    fn short_device_number_is_truncated() {
        assert!(matches!(
            decode_device_number(&[0u8; 8]),
            Err(DeviceError::Truncated { needed: 12, got: 8, .. })
        ));
    }

    #[test]
    fn descriptor_zero_offsets_mean_absent() {
        let buf = descriptor_bytes(None, Some("Samsung SSD 970"), Some("2B2QEXM7"), None, true);
        let desc = decode_device_descriptor(&buf).unwrap();
        assert_eq!(desc.vendor_id, "");
        assert_eq!(desc.product_id, "Samsung SSD 970");
        assert_eq!(desc.product_revision, "2B2QEXM7");
        assert_eq!(desc.serial_number, "");
        assert!(desc.removable);
    }

    #[test]
    fn descriptor_offset_past_buffer_is_absent() {
        let mut buf = descriptor_bytes(Some("ATA"), None, None, None, false);
        buf[24..28].copy_from_slice(&(10_000u32).to_le_bytes());
        let desc = decode_device_descriptor(&buf).unwrap();
        assert_eq!(desc.vendor_id, "ATA");
        assert_eq!(desc.serial_number, "");
    }

    #[test]
    fn geometry_reports_true_size() {
        let (geometry, size) = decode_geometry_ex(&geometry_bytes(4096, 2_000_398_934_016)).unwrap();
        assert_eq!(geometry.bytes_per_sector, 4096);
        assert_eq!(size, 2_000_398_934_016);
    }

    #[test]
    fn mbr_layout_drops_zero_length_entries() {
        let id = Uuid::from_u128(0xAAAA_0000_0000_0000_0000_0000_0000_0001);
        let buf = LayoutBuilder::mbr(0x1234_ABCD, 0x55)
            .mbr_entry(1 << 20, 500 << 20, 1, 0x07, true, id)
            .empty_entry()
            .empty_entry()
            .empty_entry()
            .build();
        let decoded = decode_drive_layout(&buf).unwrap();
        assert_eq!(
            decoded.layout,
            DriveLayout::Mbr {
                signature: 0x1234_ABCD,
                checksum: 0x55
            }
        );
        assert_eq!(decoded.reported_count, 4);
        assert_eq!(decoded.partitions.len(), 1);
        let part = &decoded.partitions[&0];
        match &part.kind {
            PartitionKind::Mbr(mbr) => {
                assert_eq!(mbr.partition_type, 0x07);
                assert!(mbr.boot_indicator);
                assert_eq!(mbr.partition_id, id);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(parse_volume_path(&part.volume_id), Some(id));
    }

    #[test]
    fn gpt_layout_decodes_names_and_ids() {
        let disk_id = Uuid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        let part_id = Uuid::from_u128(0x1111_2222_3333_4444_5555_6666_7777_8888);
        let buf = LayoutBuilder::gpt(disk_id)
            .gpt_entry(
                17408,
                16 << 20,
                1,
                classify::PARTITION_MSFT_RESERVED_GUID,
                Uuid::from_u128(9),
                "Microsoft reserved partition",
            )
            .gpt_entry(
                17 << 20,
                64 << 30,
                2,
                classify::PARTITION_BASIC_DATA_GUID,
                part_id,
                "Basic data partition",
            )
            .build();
        let decoded = decode_drive_layout(&buf).unwrap();
        match decoded.layout {
            DriveLayout::Gpt {
                disk_id: id,
                max_partition_count,
                ..
            } => {
                assert_eq!(id, disk_id);
                assert_eq!(max_partition_count, 128);
            }
            other => panic!("unexpected layout {:?}", other),
        }
        let data = &decoded.partitions[&1];
        assert_eq!(data.partition_number, 2);
        assert_eq!(data.partition_id(), part_id);
        match &data.kind {
            PartitionKind::Gpt(gpt) => {
                assert_eq!(gpt.name, "Basic data partition");
                assert_eq!(gpt.partition_type, classify::PARTITION_BASIC_DATA_GUID);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(data.volume_id.ends_with('\\'));
    }

    #[test]
    fn guid_bytes_use_mixed_endian_layout() {
        let id = Uuid::parse_str("682fa6ca-76b7-497e-9b64-7f495f731e5d").unwrap();
        let buf = LayoutBuilder::gpt(id).build();
        assert_eq!(&buf[8..12], &[0xca, 0xa6, 0x2f, 0x68]);
        assert_eq!(decode_drive_layout(&buf).unwrap().layout.style(), PartitionStyle::Gpt);
    }

    #[test]
    fn raw_disk_has_no_partitions() {
        let buf = LayoutBuilder::raw().build();
        let decoded = decode_drive_layout(&buf).unwrap();
        assert_eq!(decoded.layout, DriveLayout::Raw);
        assert!(decoded.partitions.is_empty());
    }

    #[test]
    fn count_above_capacity_is_rejected() {
        let mut buf = LayoutBuilder::gpt(Uuid::nil()).build();
        buf.resize(LAYOUT_BUFFER_SIZE, 0);
        buf[4..8].copy_from_slice(&129u32.to_le_bytes());
        assert!(matches!(
            decode_drive_layout(&buf),
            Err(DeviceError::TooManyPartitions { count: 129, max: 128 })
        ));
    }

    #[test]
    fn count_beyond_returned_bytes_is_truncated() {
        let mut buf = LayoutBuilder::mbr(1, 0).empty_entry().build();
        buf[4..8].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            decode_drive_layout(&buf),
            Err(DeviceError::Truncated { .. })
        ));
    }

    #[test]
    fn entry_style_must_match_disk_style() {
        let buf = LayoutBuilder::mbr(1, 0)
            .gpt_entry(
                1 << 20,
                1 << 20,
                1,
                classify::PARTITION_BASIC_DATA_GUID,
                Uuid::from_u128(5),
                "x",
            )
            .build();
        assert!(matches!(
            decode_drive_layout(&buf),
            Err(DeviceError::StyleMismatch {
                index: 0,
                expected: PartitionStyle::Mbr,
                found: PartitionStyle::Gpt
            })
        ));
    }

    #[test]
    fn unknown_style_is_rejected() {
        let mut buf = LayoutBuilder::raw().build();
        buf[0..4].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            decode_drive_layout(&buf),
            Err(DeviceError::UnknownStyle(9))
        ));
    }

    #[test]
    fn signature_patch_touches_only_signature_bytes() {
        let original = LayoutBuilder::mbr(0x1111_1111, 0x2222)
            .mbr_entry(1 << 20, 1 << 30, 1, 0x07, false, Uuid::from_u128(3))
            .build();
        let mut patched = original.clone();
        let previous = patch_mbr_signature(&mut patched, 0xABCD_EF01).unwrap();
        assert_eq!(previous, 0x1111_1111);
        for (i, (a, b)) in original.iter().zip(patched.iter()).enumerate() {
            if (MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 4).contains(&i) {
                continue;
            }
            assert_eq!(a, b, "byte {} changed", i);
        }
        assert_eq!(
            decode_drive_layout(&patched).unwrap().layout,
            DriveLayout::Mbr {
                signature: 0xABCD_EF01,
                checksum: 0x2222
            }
        );
    }

    #[test]
    fn signature_patch_refuses_gpt() {
        let mut buf = LayoutBuilder::gpt(Uuid::nil()).build();
        assert!(patch_mbr_signature(&mut buf, 1).is_err());
    }
}
