use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};

const INPUT_MARKER: &str = "_input.";
const OUTPUT_MARKER: &str = "_output.";

/// Hands out input/output path pairs that never collide, even when two
/// requests are planned within the same clock tick.
#[derive(Debug, Clone)]
pub struct ScratchNamer {
    root: PathBuf,
    sequence: Arc<AtomicU64>,
}

impl ScratchNamer {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn next_pair(&self, output_extension: &str) -> (PathBuf, PathBuf) {
        let stamp = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stem = format!("{stamp}_{sequence}");
        (
            self.root.join(format!("{stem}{INPUT_MARKER}mp4")),
            self.root.join(format!("{stem}{OUTPUT_MARKER}{output_extension}")),
        )
    }
}

/// Removes the files it holds when dropped.
#[derive(Debug)]
pub struct ScratchGuard {
    paths: Vec<PathBuf>,
}

impl ScratchGuard {
    pub fn new<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed scratch file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove scratch file")
                }
            }
        }
    }
}

/// Deletes scratch files older than `max_age` left behind by a crashed run.
/// Returns how many files were removed.
pub fn sweep_stale_scratch(root: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0usize;
    for entry in std::fs::read_dir(root)?.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_scratch_name(&path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read scratch metadata");
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if now.duration_since(modified).unwrap_or(Duration::ZERO) >= max_age {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove stale scratch file")
                }
            }
        }
    }
    Ok(removed)
}

fn is_scratch_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains(INPUT_MARKER) || name.contains(OUTPUT_MARKER))
        .unwrap_or(false)
}
