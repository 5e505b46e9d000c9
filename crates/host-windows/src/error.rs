use diskscope_core::PartitionStyle;
use std::io;
use thiserror::Error;

use crate::device::ControlCode;

/// A failure confined to one device. Discovery records these and moves on.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{code} failed: {source}")]
    Control {
        code: ControlCode,
        #[source]
        source: io::Error,
    },
    #[error("{structure} truncated: need {needed} bytes, got {got}")]
    Truncated {
        structure: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("layout reports {count} partition entries, more than the {max} supported")]
    TooManyPartitions { count: usize, max: usize },
    #[error("unknown partition style {0}")]
    UnknownStyle(u32),
    #[error("partition entry {index} is {found:?} on a {expected:?} disk")]
    StyleMismatch {
        index: usize,
        expected: PartitionStyle,
        found: PartitionStyle,
    },
    #[error("volume path lookup for {path} failed: {source}")]
    VolumeNames {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("duplicate device number {0}")]
    DuplicateDeviceNumber(u32),
    #[error("disk access requires Windows")]
    Unsupported,
}

/// Failures that stop discovery before any record is produced.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot access the disk device class: {0}")]
    DeviceClass(#[source] io::Error),
    #[error("no disk devices present")]
    NoDevices,
    #[error("disk discovery requires Windows")]
    Unsupported,
}
