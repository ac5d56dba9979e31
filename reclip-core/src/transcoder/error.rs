use std::path::PathBuf;

use thiserror::Error;

use crate::planner::OutputKind;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoder failed: {diagnostic}")]
    Encoder { diagnostic: String },
    #[error("no gif frame rate produced an acceptable file ({attempts} tried)")]
    AllAttemptsFailed { attempts: usize },
    #[error("output is {size_bytes} bytes, above the {limit_bytes} byte ceiling")]
    SizeCeilingExceeded { size_bytes: u64, limit_bytes: u64 },
    #[error("{0:?} output is only produced as a preview frame")]
    UnsupportedKind(OutputKind),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        source: std::io::Error,
        program: PathBuf,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type EncodeResult<T> = Result<T, EncodeError>;
