//! Crash-consistent volume copy over a backup coordination session.
//!
//! [`SnapshotOrchestrator::snapshot_copy`] walks a fixed sequence of phases.
//! Any failing platform call ends the session at the phase being entered.
//! Nothing is retried and no state survives the call.

use std::fmt;
use std::io;
use std::path::{PathBuf, MAIN_SEPARATOR};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Uninitialized,
    ComInitialized,
    SessionCreated,
    BackupInitialized,
    WriterMetadataGathered,
    BackupStateSet,
    SnapshotSetStarted,
    VolumeAdded,
    WritersPrepared,
    WritersVerified(u8),
    SnapshotTaken,
    SnapshotPropertiesResolved,
    DataCopied,
    BackupCompleted,
    Done,
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotPhase::Uninitialized => f.write_str("Uninitialized"),
            SnapshotPhase::ComInitialized => f.write_str("ComInitialized"),
            SnapshotPhase::SessionCreated => f.write_str("SessionCreated"),
            SnapshotPhase::BackupInitialized => f.write_str("BackupInitialized"),
            SnapshotPhase::WriterMetadataGathered => f.write_str("WriterMetadataGathered"),
            SnapshotPhase::BackupStateSet => f.write_str("BackupStateSet"),
            SnapshotPhase::SnapshotSetStarted => f.write_str("SnapshotSetStarted"),
            SnapshotPhase::VolumeAdded => f.write_str("VolumeAdded"),
            SnapshotPhase::WritersPrepared => f.write_str("WritersPrepared"),
            SnapshotPhase::WritersVerified(round) => write!(f, "WritersVerified({})", round),
            SnapshotPhase::SnapshotTaken => f.write_str("SnapshotTaken"),
            SnapshotPhase::SnapshotPropertiesResolved => f.write_str("SnapshotPropertiesResolved"),
            SnapshotPhase::DataCopied => f.write_str("DataCopied"),
            SnapshotPhase::BackupCompleted => f.write_str("BackupCompleted"),
            SnapshotPhase::Done => f.write_str("Done"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub poll_interval: Duration,
    /// Polls between progress lines while an async call is pending. Zero disables them.
    pub heartbeat_every: u32,
    /// File copied from the snapshot device root to the destination.
    pub artifact: String,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            heartbeat_every: 4,
            artifact: "sg.zip".to_string(),
        }
    }
}

/// A failed platform call and its HRESULT.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{context} failed with status {code:#010x}")]
pub struct PlatformError {
    pub context: &'static str,
    pub code: i32,
}

impl PlatformError {
    pub fn new(context: &'static str, code: i32) -> Self {
        Self { context, code }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot session failed entering {phase}: {source}")]
    Phase {
        phase: SnapshotPhase,
        #[source]
        source: PlatformError,
    },
    #[error("snapshot session cancelled by the platform entering {phase}")]
    Cancelled { phase: SnapshotPhase },
    #[error("copy from {device} failed after reaching {reached}: {source}")]
    Copy {
        reached: SnapshotPhase,
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("volume snapshots require Windows")]
    Unsupported,
}

impl SnapshotError {
    /// The phase the session was entering, or had reached, when it stopped.
    pub fn phase(&self) -> Option<SnapshotPhase> {
        match self {
            SnapshotError::Phase { phase, .. } | SnapshotError::Cancelled { phase } => Some(*phase),
            SnapshotError::Copy { reached, .. } => Some(*reached),
            SnapshotError::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Pending,
    Finished,
    Cancelled,
}

pub trait AsyncOperation {
    fn query_status(&mut self) -> Result<AsyncStatus, PlatformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Unknown,
    Stable,
    WaitingForFreeze,
    WaitingForThaw,
    WaitingForPostSnapshot,
    WaitingForBackupComplete,
    FailedAtIdentify,
    FailedAtPrepareBackup,
    FailedAtPrepareSnapshot,
    FailedAtFreeze,
    FailedAtThaw,
    FailedAtPostSnapshot,
    FailedAtBackupComplete,
    FailedAtPreRestore,
    FailedAtPostRestore,
    FailedAtBackupShutdown,
    Other(u32),
}

impl WriterState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => WriterState::Unknown,
            1 => WriterState::Stable,
            2 => WriterState::WaitingForFreeze,
            3 => WriterState::WaitingForThaw,
            4 => WriterState::WaitingForPostSnapshot,
            5 => WriterState::WaitingForBackupComplete,
            6 => WriterState::FailedAtIdentify,
            7 => WriterState::FailedAtPrepareBackup,
            8 => WriterState::FailedAtPrepareSnapshot,
            9 => WriterState::FailedAtFreeze,
            10 => WriterState::FailedAtThaw,
            11 => WriterState::FailedAtPostSnapshot,
            12 => WriterState::FailedAtBackupComplete,
            13 => WriterState::FailedAtPreRestore,
            14 => WriterState::FailedAtPostRestore,
            15 => WriterState::FailedAtBackupShutdown,
            other => WriterState::Other(other),
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            WriterState::FailedAtIdentify
                | WriterState::FailedAtPrepareBackup
                | WriterState::FailedAtPrepareSnapshot
                | WriterState::FailedAtFreeze
                | WriterState::FailedAtThaw
                | WriterState::FailedAtPostSnapshot
                | WriterState::FailedAtBackupComplete
                | WriterState::FailedAtPreRestore
                | WriterState::FailedAtPostRestore
                | WriterState::FailedAtBackupShutdown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterStatus {
    pub name: String,
    pub instance_id: Uuid,
    pub writer_id: Uuid,
    pub state: WriterState,
    pub failure: i32,
}

impl WriterStatus {
    pub fn is_outlier(&self) -> bool {
        self.state.is_failed() || self.failure != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterVerification {
    pub round: u8,
    pub writers: Vec<WriterStatus>,
}

impl WriterVerification {
    pub fn outliers(&self) -> impl Iterator<Item = &WriterStatus> {
        self.writers.iter().filter(|writer| writer.is_outlier())
    }
}

/// One backup components instance. Dropping it releases the session.
pub trait BackupSession {
    type Async: AsyncOperation;

    fn initialize_for_backup(&mut self) -> Result<(), PlatformError>;
    fn gather_writer_metadata(&mut self) -> Result<Self::Async, PlatformError>;
    /// Full backup, no component selection, no bootable system state, no partial files.
    fn set_backup_state(&mut self) -> Result<(), PlatformError>;
    fn start_snapshot_set(&mut self) -> Result<Uuid, PlatformError>;
    fn add_to_snapshot_set(&mut self, volume: &str) -> Result<Uuid, PlatformError>;
    fn prepare_for_backup(&mut self) -> Result<Self::Async, PlatformError>;
    fn gather_writer_status(&mut self) -> Result<Self::Async, PlatformError>;
    fn writer_statuses(&mut self) -> Result<Vec<WriterStatus>, PlatformError>;
    fn free_writer_status(&mut self) -> Result<(), PlatformError>;
    fn do_snapshot_set(&mut self) -> Result<Self::Async, PlatformError>;
    /// Device path the platform exposes for a completed snapshot.
    fn snapshot_device(&mut self, snapshot_id: Uuid) -> Result<String, PlatformError>;
    fn free_writer_metadata(&mut self) -> Result<(), PlatformError>;
    fn backup_complete(&mut self) -> Result<Self::Async, PlatformError>;
}

pub trait SnapshotPlatform {
    /// Held for the whole session and dropped after it.
    type Apartment;
    type Session: BackupSession;

    fn initialize_com(&self) -> Result<Self::Apartment, PlatformError>;
    fn create_session(&self, apartment: &Self::Apartment) -> Result<Self::Session, PlatformError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub snapshot_set_id: Uuid,
    pub snapshot_id: Uuid,
    pub snapshot_device: String,
    pub source_file: PathBuf,
    pub destination_file: PathBuf,
    pub bytes_copied: u64,
    pub verifications: Vec<WriterVerification>,
}

pub struct SnapshotOrchestrator<P> {
    platform: P,
    options: SnapshotOptions,
}

impl<P: SnapshotPlatform> SnapshotOrchestrator<P> {
    pub fn new(platform: P, options: SnapshotOptions) -> Self {
        Self { platform, options }
    }

    pub fn snapshot_copy(
        &self,
        source_volume: &str,
        destination: &str,
    ) -> Result<SnapshotOutcome, SnapshotError> {
        info!("snapshot of {} into {}", source_volume, destination);
        let volume = with_separator(source_volume);

        // The session borrows the apartment and must be released first.
        let apartment = step(SnapshotPhase::ComInitialized, self.platform.initialize_com())?;
        let mut session = step(
            SnapshotPhase::SessionCreated,
            self.platform.create_session(&apartment),
        )?;

        step(SnapshotPhase::BackupInitialized, session.initialize_for_backup())?;

        let op = step(SnapshotPhase::WriterMetadataGathered, session.gather_writer_metadata())?;
        self.wait(SnapshotPhase::WriterMetadataGathered, op)?;

        step(SnapshotPhase::BackupStateSet, session.set_backup_state())?;

        let snapshot_set_id = step(SnapshotPhase::SnapshotSetStarted, session.start_snapshot_set())?;
        debug!("snapshot set {}", snapshot_set_id);

        let snapshot_id = step(SnapshotPhase::VolumeAdded, session.add_to_snapshot_set(&volume))?;
        debug!("snapshot {} for {}", snapshot_id, volume);

        let op = step(SnapshotPhase::WritersPrepared, session.prepare_for_backup())?;
        self.wait(SnapshotPhase::WritersPrepared, op)?;

        let mut verifications = Vec::with_capacity(3);
        verifications.push(self.verify_writers(&mut session, 1)?);

        let op = step(SnapshotPhase::SnapshotTaken, session.do_snapshot_set())?;
        self.wait(SnapshotPhase::SnapshotTaken, op)?;
        info!("snapshot set {} created", snapshot_set_id);

        verifications.push(self.verify_writers(&mut session, 2)?);

        let snapshot_device = step(
            SnapshotPhase::SnapshotPropertiesResolved,
            session.snapshot_device(snapshot_id),
        )?;
        step(SnapshotPhase::SnapshotPropertiesResolved, session.free_writer_metadata())?;
        info!("snapshot device {}", snapshot_device);

        let source_file = PathBuf::from(format!(
            "{}{}",
            with_separator(&snapshot_device),
            self.options.artifact
        ));
        let destination_file = PathBuf::from(format!(
            "{}{}",
            with_separator(destination),
            self.options.artifact
        ));
        info!("copying {} to {}", source_file.display(), destination_file.display());
        let bytes_copied =
            std::fs::copy(&source_file, &destination_file).map_err(|source| SnapshotError::Copy {
                reached: SnapshotPhase::SnapshotPropertiesResolved,
                device: snapshot_device.clone(),
                source,
            })?;
        debug!("{} bytes copied", bytes_copied);

        let op = step(SnapshotPhase::BackupCompleted, session.backup_complete())?;
        self.wait(SnapshotPhase::BackupCompleted, op)?;

        verifications.push(self.verify_writers(&mut session, 3)?);

        drop(session);
        drop(apartment);
        info!("snapshot copy of {} complete", source_volume);

        Ok(SnapshotOutcome {
            snapshot_set_id,
            snapshot_id,
            snapshot_device,
            source_file,
            destination_file,
            bytes_copied,
            verifications,
        })
    }

    fn wait<A: AsyncOperation>(&self, phase: SnapshotPhase, mut op: A) -> Result<(), SnapshotError> {
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            match step(phase, op.query_status())? {
                AsyncStatus::Finished => {
                    debug!("{} finished after {} polls", phase, polls);
                    return Ok(());
                }
                AsyncStatus::Cancelled => {
                    warn!("{} cancelled by the platform", phase);
                    return Err(SnapshotError::Cancelled { phase });
                }
                AsyncStatus::Pending => {}
            }
            polls += 1;
            if self.options.heartbeat_every > 0 && polls % self.options.heartbeat_every == 0 {
                info!("{}: waiting ({:.1}s)", phase, started.elapsed().as_secs_f32());
            }
            thread::sleep(self.options.poll_interval);
        }
    }

    fn verify_writers(
        &self,
        session: &mut P::Session,
        round: u8,
    ) -> Result<WriterVerification, SnapshotError> {
        let phase = SnapshotPhase::WritersVerified(round);
        let op = step(phase, session.gather_writer_status())?;
        self.wait(phase, op)?;
        let writers = step(phase, session.writer_statuses())?;

        for writer in &writers {
            if writer.is_outlier() {
                warn!(
                    "writer {} ({}) is {:?}, failure {:#010x}",
                    writer.name, writer.instance_id, writer.state, writer.failure
                );
            } else {
                debug!("writer {} ({}) is {:?}", writer.name, writer.instance_id, writer.state);
            }
        }
        step(phase, session.free_writer_status())?;
        info!("{}: {} writers", phase, writers.len());
        Ok(WriterVerification { round, writers })
    }
}

fn step<T>(phase: SnapshotPhase, result: Result<T, PlatformError>) -> Result<T, SnapshotError> {
    result.map_err(|source| SnapshotError::Phase { phase, source })
}

fn with_separator(path: &str) -> String {
    let mut path = path.to_string();
    if !path.ends_with(MAIN_SEPARATOR) {
        path.push(MAIN_SEPARATOR);
    }
    path
}
