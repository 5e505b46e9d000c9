use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub mod classify;

pub use classify::{
    gpt_partition_type_name, mbr_partition_type_name, partition_style_name, UNKNOWN_PARTITION_TYPE,
};

pub const TOPOLOGY_SCHEMA_VERSION: &str = "1.0.0";

/// Largest partition count a GPT layout can report; the layout query buffer is
/// sized for exactly this many entries.
pub const MAX_PARTITION_ENTRIES: usize = 128;

/// `FILE_DEVICE_DISK` from the device-number query.
pub const FILE_DEVICE_DISK: u32 = 0x0000_0007;

pub type DiskMap = BTreeMap<u32, DiskRecord>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    pub device_number: u32,
    pub device_type: u32,
    pub device_path: String,
    pub device_name: Option<String>, // \\.\PhysicalDriveN for FILE_DEVICE_DISK
    pub vendor_id: String,
    pub product_id: String,
    pub product_revision: String,
    pub serial_number: String,
    pub removable: bool,
    pub geometry: DiskGeometry, // may be faked by the driver
    pub size_bytes: u64,        // always the true size
    pub layout: DriveLayout,
    pub partitions: BTreeMap<u32, PartitionRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskGeometry {
    pub cylinders: u64,
    pub media_type: u32,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "style", rename_all = "lowercase")]
pub enum DriveLayout {
    Mbr {
        signature: u32,
        checksum: u32,
    },
    Gpt {
        disk_id: Uuid,
        starting_usable_offset: u64,
        usable_length: u64,
        max_partition_count: u32,
    },
    Raw,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStyle {
    Mbr,
    Gpt,
    Raw,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub starting_offset: u64,
    pub length: u64,
    pub partition_number: u32,
    pub rewrite_partition: bool,
    pub is_service_partition: bool,
    pub kind: PartitionKind,
    pub volume_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "style", rename_all = "lowercase")]
pub enum PartitionKind {
    Mbr(MbrPartition),
    Gpt(GptPartition),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MbrPartition {
    pub partition_type: u8,
    pub boot_indicator: bool,
    pub recognized: bool,
    pub hidden_sectors: u32,
    pub partition_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GptPartition {
    pub partition_type: Uuid,
    pub partition_id: Uuid,
    pub attributes: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureCollision {
    pub signature: u32,
    pub first: u32,
    pub second: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyDocument {
    pub schema_version: String,
    pub generated_at_utc: String,
    pub disks: Vec<DiskRecord>,
}

impl DriveLayout {
    pub fn style(&self) -> PartitionStyle {
        match self {
            DriveLayout::Mbr { .. } => PartitionStyle::Mbr,
            DriveLayout::Gpt { .. } => PartitionStyle::Gpt,
            DriveLayout::Raw => PartitionStyle::Raw,
        }
    }
}

impl DiskRecord {
    pub fn style(&self) -> PartitionStyle {
        self.layout.style()
    }

    pub fn mbr_signature(&self) -> Option<u32> {
        match self.layout {
            DriveLayout::Mbr { signature, .. } => Some(signature),
            _ => None,
        }
    }

    pub fn gpt_disk_id(&self) -> Option<Uuid> {
        match self.layout {
            DriveLayout::Gpt { disk_id, .. } => Some(disk_id),
            _ => None,
        }
    }

    pub fn physical_drive(&self) -> String {
        physical_drive_path(self.device_number)
    }
}

impl PartitionKind {
    pub fn style(&self) -> PartitionStyle {
        match self {
            PartitionKind::Mbr(_) => PartitionStyle::Mbr,
            PartitionKind::Gpt(_) => PartitionStyle::Gpt,
        }
    }

    /// The identifier the volume manager keys the partition's volume by.
    pub fn partition_id(&self) -> Uuid {
        match self {
            PartitionKind::Mbr(mbr) => mbr.partition_id,
            PartitionKind::Gpt(gpt) => gpt.partition_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PartitionKind::Mbr(mbr) => mbr_partition_type_name(mbr.partition_type),
            PartitionKind::Gpt(gpt) => gpt_partition_type_name(&gpt.partition_type),
        }
    }
}

impl PartitionRecord {
    pub fn new(
        starting_offset: u64,
        length: u64,
        partition_number: u32,
        rewrite_partition: bool,
        is_service_partition: bool,
        kind: PartitionKind,
    ) -> Self {
        let volume_id = volume_path(&kind.partition_id());
        Self {
            starting_offset,
            length,
            partition_number,
            rewrite_partition,
            is_service_partition,
            kind,
            volume_id,
        }
    }

    pub fn partition_id(&self) -> Uuid {
        self.kind.partition_id()
    }

    pub fn ending_offset(&self) -> u64 {
        self.starting_offset.saturating_add(self.length)
    }
}

impl TopologyDocument {
    pub fn new(disks: &DiskMap) -> Self {
        Self {
            schema_version: TOPOLOGY_SCHEMA_VERSION.to_string(),
            generated_at_utc: now_utc_rfc3339(),
            disks: disks.values().cloned().collect(),
        }
    }

    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

/// Upper-case braced form, `{682FA6CA-76B7-497E-9B64-7F495F731E5D}`.
pub fn guid_string(id: &Uuid) -> String {
    id.braced().to_string().to_uppercase()
}

/// `\\?\Volume{GUID}\`. The trailing separator is required by the volume
/// path-name lookup.
pub fn volume_path(id: &Uuid) -> String {
    format!(r"\\?\Volume{}\", guid_string(id))
}

pub fn parse_volume_path(path: &str) -> Option<Uuid> {
    let inner = path.strip_prefix(r"\\?\Volume")?.strip_suffix('\\')?;
    if !(inner.starts_with('{') && inner.ends_with('}')) {
        return None;
    }
    Uuid::parse_str(inner).ok()
}

pub fn physical_drive_path(device_number: u32) -> String {
    format!(r"\\.\PhysicalDrive{}", device_number)
}

/// MBR disks sharing a disk signature, in device-number order.
pub fn signature_collisions(disks: &DiskMap) -> Vec<SignatureCollision> {
    let mut seen: BTreeMap<u32, u32> = BTreeMap::new();
    let mut collisions = Vec::new();
    for (number, disk) in disks {
        let Some(signature) = disk.mbr_signature() else {
            continue;
        };
        match seen.get(&signature) {
            Some(first) => collisions.push(SignatureCollision {
                signature,
                first: *first,
                second: *number,
            }),
            None => {
                seen.insert(signature, *number);
            }
        }
    }
    collisions
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mbr_disk(number: u32, signature: u32) -> DiskRecord {
        DiskRecord {
            device_number: number,
            device_type: FILE_DEVICE_DISK,
            device_path: format!(r"\\?\scsi#disk{}", number),
            device_name: Some(physical_drive_path(number)),
            vendor_id: String::new(),
            product_id: "Virtual Disk".to_string(),
            product_revision: String::new(),
            serial_number: String::new(),
            removable: false,
            geometry: DiskGeometry::default(),
            size_bytes: 1 << 30,
            layout: DriveLayout::Mbr {
                signature,
                checksum: 0,
            },
            partitions: BTreeMap::new(),
        }
    }

    #[test]
    fn volume_path_ends_with_separator_and_parses_back() {
        let id = Uuid::parse_str("682fa6ca-76b7-497e-9b64-7f495f731e5d").unwrap();
        let path = volume_path(&id);
        assert_eq!(path, r"\\?\Volume{682FA6CA-76B7-497E-9B64-7F495F731E5D}\");
        assert!(path.ends_with('\\'));
        assert_eq!(parse_volume_path(&path), Some(id));
    }

    #[test]
    fn parse_volume_path_requires_trailing_separator() {
        assert_eq!(
            parse_volume_path(r"\\?\Volume{682FA6CA-76B7-497E-9B64-7F495F731E5D}"),
            None
        );
        assert_eq!(parse_volume_path(r"C:\"), None);
    }

    #[test]
    fn partition_record_derives_volume_id_from_style_identifier() {
        let id = Uuid::from_u128(0x1122_3344_5566_7788_99aa_bbcc_ddee_ff00);
        let record = PartitionRecord::new(
            1 << 20,
            100 << 20,
            1,
            false,
            false,
            PartitionKind::Gpt(GptPartition {
                partition_type: classify::PARTITION_BASIC_DATA_GUID,
                partition_id: id,
                attributes: 0,
                name: "Basic data partition".to_string(),
            }),
        );
        assert_eq!(parse_volume_path(&record.volume_id), Some(id));
        assert_eq!(record.kind.type_name(), "PARTITION_BASIC_DATA_GUID");
        assert_eq!(record.ending_offset(), 101 << 20);
    }

    #[test]
    fn collisions_only_consider_mbr_disks() {
        let mut disks = DiskMap::new();
        disks.insert(0, mbr_disk(0, 0xDEAD_BEEF));
        disks.insert(1, mbr_disk(1, 0x1234_5678));
        disks.insert(3, mbr_disk(3, 0xDEAD_BEEF));
        let mut gpt = mbr_disk(2, 0);
        gpt.layout = DriveLayout::Gpt {
            disk_id: Uuid::nil(),
            starting_usable_offset: 17408,
            usable_length: 0,
            max_partition_count: 128,
        };
        disks.insert(2, gpt);

        let collisions = signature_collisions(&disks);
        assert_eq!(
            collisions,
            vec![SignatureCollision {
                signature: 0xDEAD_BEEF,
                first: 0,
                second: 3,
            }]
        );
    }

    #[test]
    fn layout_accessors_follow_the_style_tag() {
        let disk = mbr_disk(4, 7);
        assert_eq!(disk.style(), PartitionStyle::Mbr);
        assert_eq!(disk.mbr_signature(), Some(7));
        assert_eq!(disk.gpt_disk_id(), None);
        assert_eq!(disk.physical_drive(), r"\\.\PhysicalDrive4");
    }

    #[test]
    fn document_lists_disks_in_device_order() {
        let mut disks = DiskMap::new();
        disks.insert(2, mbr_disk(2, 1));
        disks.insert(0, mbr_disk(0, 2));
        let doc = TopologyDocument::new(&disks);
        let numbers: Vec<u32> = doc.disks.iter().map(|d| d.device_number).collect();
        assert_eq!(numbers, vec![0, 2]);
        let json = doc.to_json(false).unwrap();
        assert!(json.contains("\"style\":\"mbr\""));
    }
}
