//! Frame consumers shipped with the crate.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::traits::{ConsumeResult, FrameConsumer, FrameMetadata};

/// Writes every frame verbatim to `<dir>/frame-<n>.raw`.
///
/// `n` counts invocations from 0, so a failed write still consumes a number.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    next: u64,
}

impl FileSink {
    /// A sink writing into `dir`, which must already exist.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            next: 0,
        }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of times the sink has been invoked.
    pub const fn frames_written(&self) -> u64 {
        self.next
    }

    fn path_for(&self, n: u64) -> PathBuf {
        self.dir.join(format!("frame-{n}.raw"))
    }
}

impl FrameConsumer for FileSink {
    fn consume(&mut self, frame: &[u8], metadata: &FrameMetadata) -> ConsumeResult {
        let path = self.path_for(self.next);
        self.next += 1;

        fs::write(&path, frame)?;
        debug!(
            path = %path.display(),
            sequence = metadata.sequence,
            len = frame.len(),
            "frame written"
        );
        Ok(())
    }
}
