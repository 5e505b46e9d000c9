use std::io::{self, Write};

use diskscope_core::{
    guid_string, partition_style_name, DiskMap, DiskRecord, DriveLayout, PartitionKind,
    PartitionRecord, SignatureCollision,
};

use crate::selection::DiskSelection;

const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;

/// How much of each disk the listing prints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct View {
    pub count_only: bool,
    pub terse: bool,
    pub partitions: bool,
    pub verbose: bool,
    pub signature: bool,
    pub dos_names: bool,
}

impl View {
    /// `-s` and `-d` imply terse, `-v` implies partitions, `-c` wins over both.
    pub fn resolve(
        count: bool,
        partitions: bool,
        terse: bool,
        verbose: bool,
        signature: bool,
        dos_names: bool,
    ) -> Self {
        let terse = terse || signature || dos_names;
        let verbose = verbose && !count;
        let partitions = (partitions || verbose) && !count;
        Self {
            count_only: count,
            terse,
            partitions,
            verbose,
            signature,
            dos_names,
        }
    }
}

pub fn render_disks<W, F>(
    out: &mut W,
    disks: &DiskMap,
    selection: &DiskSelection,
    view: View,
    names: F,
) -> io::Result<()>
where
    W: Write,
    F: Fn(&PartitionRecord) -> Vec<String>,
{
    writeln!(out, "Detected {} disks", disks.len())?;
    if view.count_only {
        return Ok(());
    }
    for disk in disks.values().filter(|d| selection.contains(d.device_number)) {
        render_disk(out, disk, view, &names)?;
    }
    Ok(())
}

fn render_disk<W, F>(out: &mut W, disk: &DiskRecord, view: View, names: &F) -> io::Result<()>
where
    W: Write,
    F: Fn(&PartitionRecord) -> Vec<String>,
{
    writeln!(out, "----------------- #{}", disk.device_number)?;
    writeln!(out, "DeviceName: {}", disk.physical_drive())?;
    writeln!(out, "ProductId: {}", disk.product_id)?;
    writeln!(
        out,
        "DiskSize: {}GB ({}MB)",
        disk.size_bytes / GB,
        disk.size_bytes / MB
    )?;

    if view.terse {
        if view.signature {
            if let Some(signature) = disk.mbr_signature() {
                writeln!(out, "Mbr.Signature (Disk ID): {:#010x} ({})", signature, signature)?;
            }
        }
        if view.dos_names {
            let all: Vec<String> = disk.partitions.values().flat_map(names).collect();
            if !all.is_empty() {
                writeln!(out, "DOS names: {}", all.join(" "))?;
            }
        }
        return Ok(());
    }

    writeln!(out, "DevicePath: {}", disk.device_path)?;
    writeln!(out, "VendorId: {}", disk.vendor_id)?;
    writeln!(out, "SerialNumber: {}", disk.serial_number)?;
    writeln!(out, "ProductRevision: {}", disk.product_revision)?;
    writeln!(out, "BytesPerSector: {}", disk.geometry.bytes_per_sector)?;
    match &disk.layout {
        DriveLayout::Mbr { signature, checksum } => {
            writeln!(out, "Mbr.CheckSum: {:#010x}", checksum)?;
            writeln!(out, "Mbr.Signature (Disk ID): {:#010x} ({})", signature, signature)?;
        }
        DriveLayout::Gpt { disk_id, .. } => writeln!(out, "Gpt.DiskId: {}", guid_string(disk_id))?,
        DriveLayout::Raw => {}
    }
    if disk.partitions.is_empty() {
        writeln!(out, "Disk has no defined partitions.")?;
    }
    if view.partitions {
        for (key, partition) in &disk.partitions {
            render_partition(out, *key, partition, view.verbose, names)?;
        }
    }
    Ok(())
}

fn render_partition<W, F>(
    out: &mut W,
    key: u32,
    partition: &PartitionRecord,
    verbose: bool,
    names: &F,
) -> io::Result<()>
where
    W: Write,
    F: Fn(&PartitionRecord) -> Vec<String>,
{
    writeln!(out, "\t----")?;
    writeln!(out, "\tPartitionNumber: {} ({})", partition.partition_number, key)?;
    match names(partition).first() {
        Some(name) => writeln!(out, "\tDOS device: {}", name)?,
        None => writeln!(out, "\tNo DOS device name assigned")?,
    }
    writeln!(out, "\tPartitionStyle: {}", partition_style_name(partition.kind.style()))?;
    writeln!(out, "\tPartitionType: {}", partition.kind.type_name())?;
    writeln!(
        out,
        "\tPartitionLength: {}MB {}GB",
        partition.length / MB,
        partition.length / GB
    )?;
    if !verbose {
        return Ok(());
    }

    writeln!(out, "\tStartingOffset: {}", partition.starting_offset)?;
    writeln!(out, "\tPartitionLength: {}", partition.length)?;
    writeln!(out, "\tRewritePartition: {}", partition.rewrite_partition)?;
    match &partition.kind {
        PartitionKind::Mbr(mbr) => {
            writeln!(out, "\tMbr.PartitionId: {}", guid_string(&mbr.partition_id))?;
            writeln!(out, "\tMbr.BootIndicator: {}", mbr.boot_indicator)?;
            writeln!(out, "\tMbr.PartitionType: {:#04x}", mbr.partition_type)?;
            writeln!(out, "\tMbr.RecognizedPartition: {}", mbr.recognized)?;
            writeln!(out, "\tMbr.HiddenSectors: {}", mbr.hidden_sectors)?;
        }
        PartitionKind::Gpt(gpt) => {
            writeln!(out, "\tGpt.PartitionId: {}", guid_string(&gpt.partition_id))?;
            writeln!(out, "\tGpt.PartitionType: {}", guid_string(&gpt.partition_type))?;
            writeln!(out, "\tGpt.Attributes: {:#018x}", gpt.attributes)?;
            writeln!(out, "\tGpt.Name: {}", gpt.name)?;
        }
    }
    writeln!(out, "\tvolumeID: {}", partition.volume_id)
}

pub fn render_signatures<W: Write>(
    out: &mut W,
    disks: &DiskMap,
    collisions: &[SignatureCollision],
) -> io::Result<()> {
    writeln!(out, "Checking for MBR drive signature collisions")?;
    for disk in disks.values() {
        if let Some(signature) = disk.mbr_signature() {
            writeln!(out, "\t{} => {:#010x}", disk.physical_drive(), signature)?;
        }
    }
    for collision in collisions {
        writeln!(
            out,
            "\tMBR signature collision: {} and {} => {:#010x}",
            diskscope_core::physical_drive_path(collision.first),
            diskscope_core::physical_drive_path(collision.second),
            collision.signature
        )?;
    }
    Ok(())
}
