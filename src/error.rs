//! Error type shared by every stage of the map pipeline.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PmapError {
    /// A bad configuration value, or an entity the computation needs that isn't there
    /// (probe residue, reference atoms, mask voxels, frames, extracted structures).
    #[error("{0}")]
    Value(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("{0}")]
    NotImplemented(String),

    /// Strict dims/origin/delta check between grids that are combined.
    #[error("Grids have different sizes/origins/deltas (mismatched {property})")]
    GridMismatch { property: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl PmapError {
    pub fn value(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented(message.into())
    }

    /// True for the errors that a caller should treat as bad input values.
    pub fn is_value_error(&self) -> bool {
        matches!(self, Self::Value(_) | Self::GridMismatch { .. })
    }

    /// Attach the path to a failed open, so a missing input is reported as such.
    pub(crate) fn from_open(err: io::Error, path: &Path) -> Self {
        if err.kind() == ErrorKind::NotFound {
            Self::FileNotFound(path.to_owned())
        } else {
            Self::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, PmapError>;
