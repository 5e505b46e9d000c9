//! In-memory stand-ins for the platform: byte builders for the device-control
//! replies and a fake `DeviceSource` that records every request.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use uuid::Uuid;

use crate::device::{Access, ControlCode, DeviceSource, DiskDevice};
use crate::error::{DeviceError, DiscoveryError};
use crate::layout::{LAYOUT_HEADER_SIZE, PARTITION_ENTRY_SIZE};

pub fn device_number_bytes(device_type: u32, device_number: u32, partition_number: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&device_type.to_le_bytes());
    buf.extend_from_slice(&device_number.to_le_bytes());
    buf.extend_from_slice(&partition_number.to_le_bytes());
    buf
}

pub fn descriptor_bytes(
    vendor: Option<&str>,
    product: Option<&str>,
    revision: Option<&str>,
    serial: Option<&str>,
    removable: bool,
) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    buf[10] = removable as u8;
    for (field, value) in [(12, vendor), (16, product), (20, revision), (24, serial)] {
        if let Some(value) = value {
            let offset = buf.len() as u32;
            buf[field..field + 4].copy_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
    }
    let size = buf.len() as u32;
    buf[4..8].copy_from_slice(&size.to_le_bytes());
    buf
}

pub fn geometry_bytes(bytes_per_sector: u32, size: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    let cylinders = size / (255 * 63 * bytes_per_sector as u64);
    buf[0..8].copy_from_slice(&cylinders.to_le_bytes());
    buf[8..12].copy_from_slice(&12u32.to_le_bytes()); // FixedMedia
    buf[12..16].copy_from_slice(&255u32.to_le_bytes());
    buf[16..20].copy_from_slice(&63u32.to_le_bytes());
    buf[20..24].copy_from_slice(&bytes_per_sector.to_le_bytes());
    buf[24..32].copy_from_slice(&size.to_le_bytes());
    buf
}

pub struct LayoutBuilder {
    header: [u8; LAYOUT_HEADER_SIZE],
    entries: Vec<[u8; PARTITION_ENTRY_SIZE]>,
}

impl LayoutBuilder {
    fn with_style(style: u32) -> Self {
        let mut header = [0u8; LAYOUT_HEADER_SIZE];
        header[0..4].copy_from_slice(&style.to_le_bytes());
        Self {
            header,
            entries: Vec::new(),
        }
    }

    pub fn mbr(signature: u32, checksum: u32) -> Self {
        let mut builder = Self::with_style(0);
        builder.header[8..12].copy_from_slice(&signature.to_le_bytes());
        builder.header[12..16].copy_from_slice(&checksum.to_le_bytes());
        builder
    }

    pub fn gpt(disk_id: Uuid) -> Self {
        let mut builder = Self::with_style(1);
        builder.header[8..24].copy_from_slice(&disk_id.to_bytes_le());
        builder.header[24..32].copy_from_slice(&17408u64.to_le_bytes());
        builder.header[32..40].copy_from_slice(&(1u64 << 40).to_le_bytes());
        builder.header[40..44].copy_from_slice(&128u32.to_le_bytes());
        builder
    }

    pub fn raw() -> Self {
        Self::with_style(2)
    }

    fn entry(style: u32, offset: u64, length: u64, number: u32) -> [u8; PARTITION_ENTRY_SIZE] {
        let mut entry = [0u8; PARTITION_ENTRY_SIZE];
        entry[0..4].copy_from_slice(&style.to_le_bytes());
        entry[8..16].copy_from_slice(&offset.to_le_bytes());
        entry[16..24].copy_from_slice(&length.to_le_bytes());
        entry[24..28].copy_from_slice(&number.to_le_bytes());
        entry
    }

    pub fn mbr_entry(
        mut self,
        offset: u64,
        length: u64,
        number: u32,
        partition_type: u8,
        boot: bool,
        id: Uuid,
    ) -> Self {
        let mut entry = Self::entry(0, offset, length, number);
        entry[32] = partition_type;
        entry[33] = boot as u8;
        entry[34] = 1;
        entry[36..40].copy_from_slice(&((offset / 512) as u32).to_le_bytes());
        entry[40..56].copy_from_slice(&id.to_bytes_le());
        self.entries.push(entry);
        self
    }

    pub fn gpt_entry(
        mut self,
        offset: u64,
        length: u64,
        number: u32,
        partition_type: Uuid,
        id: Uuid,
        name: &str,
    ) -> Self {
        let mut entry = Self::entry(1, offset, length, number);
        entry[32..48].copy_from_slice(&partition_type.to_bytes_le());
        entry[48..64].copy_from_slice(&id.to_bytes_le());
        for (i, unit) in name.encode_utf16().take(36).enumerate() {
            entry[72 + i * 2..74 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        self.entries.push(entry);
        self
    }

    pub fn empty_entry(mut self) -> Self {
        let style = u32::from_le_bytes([self.header[0], self.header[1], self.header[2], self.header[3]]);
        self.entries.push(Self::entry(style, 0, 0, 0));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = self.header;
        header[4..8].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        let mut buf = header.to_vec();
        for entry in &self.entries {
            buf.extend_from_slice(entry);
        }
        buf
    }
}

pub type WriteLog = Rc<RefCell<Vec<(String, ControlCode, Vec<u8>)>>>;

#[derive(Clone)]
pub struct FakeDisk {
    pub paths: Vec<String>,
    pub openable: bool,
    pub replies: HashMap<ControlCode, Result<Vec<u8>, i32>>,
}

impl FakeDisk {
    pub fn new(path: &str) -> Self {
        Self {
            paths: vec![path.to_string()],
            openable: true,
            replies: HashMap::new(),
        }
    }

    /// A fully answering disk: number, descriptor, geometry and layout.
    pub fn answering(path: &str, number: u32, layout: Vec<u8>) -> Self {
        Self::new(path)
            .also_at(&diskscope_core::physical_drive_path(number))
            .reply(ControlCode::GetDeviceNumber, device_number_bytes(7, number, 0))
            .reply(
                ControlCode::QueryProperty,
                descriptor_bytes(Some("Msft"), Some("Virtual Disk"), Some("1.0"), None, false),
            )
            .reply(ControlCode::GetDriveGeometryEx, geometry_bytes(512, 64 << 30))
            .reply(ControlCode::GetDriveLayoutEx, layout)
    }

    pub fn also_at(mut self, path: &str) -> Self {
        self.paths.push(path.to_string());
        self
    }

    pub fn reply(mut self, code: ControlCode, bytes: Vec<u8>) -> Self {
        self.replies.insert(code, Ok(bytes));
        self
    }

    pub fn fail(mut self, code: ControlCode, os_error: i32) -> Self {
        self.replies.insert(code, Err(os_error));
        self
    }

    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }
}

#[derive(Default)]
pub struct FakeSource {
    pub disks: Vec<FakeDisk>,
    pub volume_names: HashMap<String, Vec<String>>,
    pub opened: RefCell<Vec<(String, Access)>>,
    pub writes: WriteLog,
    pub class_error: Option<i32>,
}

impl FakeSource {
    pub fn new(disks: Vec<FakeDisk>) -> Self {
        Self {
            disks,
            ..Default::default()
        }
    }

    pub fn with_volume_names(mut self, volume_path: &str, names: &[&str]) -> Self {
        self.volume_names.insert(
            volume_path.to_string(),
            names.iter().map(|name| name.to_string()).collect(),
        );
        self
    }
}

pub struct FakeDevice {
    path: String,
    replies: HashMap<ControlCode, Result<Vec<u8>, i32>>,
    writes: WriteLog,
}

impl DiskDevice for FakeDevice {
    fn control(
        &mut self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, DeviceError> {
        if code.writes() {
            self.writes
                .borrow_mut()
                .push((self.path.clone(), code, input.to_vec()));
        }
        match self.replies.get(&code) {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(output.len());
                output[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(os_error)) => Err(DeviceError::Control {
                code,
                source: io::Error::from_raw_os_error(*os_error),
            }),
            None if code.writes() => Ok(0),
            None => Err(DeviceError::Control {
                code,
                source: io::Error::from_raw_os_error(1),
            }),
        }
    }
}

impl DeviceSource for FakeSource {
    type Device = FakeDevice;

    fn present_disks(&self) -> Result<Vec<String>, DiscoveryError> {
        if let Some(code) = self.class_error {
            return Err(DiscoveryError::DeviceClass(io::Error::from_raw_os_error(code)));
        }
        Ok(self.disks.iter().map(|disk| disk.paths[0].clone()).collect())
    }

    fn open(&self, path: &str, access: Access) -> Result<FakeDevice, DeviceError> {
        self.opened.borrow_mut().push((path.to_string(), access));
        let disk = self
            .disks
            .iter()
            .find(|disk| disk.paths.iter().any(|p| p == path))
            .filter(|disk| disk.openable)
            .ok_or_else(|| DeviceError::Open {
                path: path.to_string(),
                source: io::Error::from_raw_os_error(2),
            })?;
        Ok(FakeDevice {
            path: path.to_string(),
            replies: disk.replies.clone(),
            writes: Rc::clone(&self.writes),
        })
    }

    fn volume_path_names(&self, volume_path: &str) -> Result<Vec<String>, DeviceError> {
        self.volume_names
            .get(volume_path)
            .cloned()
            .ok_or_else(|| DeviceError::VolumeNames {
                path: volume_path.to_string(),
                source: io::Error::from_raw_os_error(2),
            })
    }
}
