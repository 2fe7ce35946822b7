//! Workflow progress reporting.

/// Phase of an export or import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Writing the domain XML into the working directory.
    DumpingMetadata,
    /// Creating the archive from the domain XML.
    SealingMetadata,
    /// Computing a disk's SHA-1.
    HashingDisk,
    /// Adding a disk and its sidecar to the archive.
    ArchivingDisk,
    /// Computing or checking the whole-archive SHA-256.
    HashingArchive,
    /// Test-decrypting the finished archive.
    Verifying,
    /// Extracting the archive.
    Extracting,
    /// Checking extracted disks against their sidecars.
    VerifyingDisks,
    /// Moving disks to their original paths.
    RestoringDisks,
    /// Registering the VM with libvirt.
    Defining,
    /// Restoring SELinux labels.
    Relabeling,
    /// Workflow finished.
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Phase::DumpingMetadata => "Dumping metadata",
            Phase::SealingMetadata => "Sealing metadata",
            Phase::HashingDisk => "Hashing disk",
            Phase::ArchivingDisk => "Archiving disk",
            Phase::HashingArchive => "Hashing archive",
            Phase::Verifying => "Verifying archive",
            Phase::Extracting => "Extracting",
            Phase::VerifyingDisks => "Verifying disks",
            Phase::RestoringDisks => "Restoring disks",
            Phase::Defining => "Defining VM",
            Phase::Relabeling => "Restoring labels",
            Phase::Complete => "Complete",
        };
        f.write_str(text)
    }
}

/// Progress information for a workflow.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current phase.
    pub phase: Phase,
    /// File the phase is working on, if any.
    pub item: Option<String>,
    /// Current disk (1-indexed, 0 before the first disk).
    pub current_disk: usize,
    /// Total number of disks.
    pub total_disks: usize,
    /// Bytes processed in the current phase.
    pub bytes_processed: u64,
    /// Bytes to process in the current phase (0 when unknown).
    pub bytes_total: u64,
}

impl Progress {
    pub fn new(phase: Phase, total_disks: usize) -> Self {
        Self {
            phase,
            item: None,
            current_disk: 0,
            total_disks,
            bytes_processed: 0,
            bytes_total: 0,
        }
    }

    /// Move to `phase`, clearing the per-phase fields.
    pub fn enter(&mut self, phase: Phase, item: Option<String>) {
        self.phase = phase;
        self.item = item;
        self.bytes_processed = 0;
        self.bytes_total = 0;
    }

    /// Percentage of the current phase's bytes done.
    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total == 0 {
            return match self.phase {
                Phase::Complete => 100.0,
                _ => 0.0,
            };
        }
        (self.bytes_processed as f64 / self.bytes_total as f64) * 100.0
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(Progress) + Send>;

/// Calls an optional callback.
pub(crate) struct Reporter<'a>(pub(crate) Option<&'a ProgressCallback>);

impl Reporter<'_> {
    pub(crate) fn report(&self, progress: &Progress) {
        if let Some(callback) = self.0 {
            callback(progress.clone());
        }
    }
}
