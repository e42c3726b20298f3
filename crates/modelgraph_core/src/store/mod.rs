//! Model file entry points.
//!
//! # Responsibility
//! - Open model files into a registry and save registries to files.
//! - Attach the offending path to every failure.
//!
//! # Invariants
//! - Saving never leaves a truncated model file behind: the stream is
//!   written to a sibling file and renamed into place.
//!
//! # See also
//! - crate::codec

use crate::codec::CodecError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod open;

pub use open::{open_model, save_model};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Codec {
        path: PathBuf,
        source: CodecError,
    },
}

impl StoreError {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Io { path, .. } | Self::Codec { path, .. } => path,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "`{}`: {source}", path.display()),
            Self::Codec { path, source } => write!(f, "`{}`: {source}", path.display()),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Codec { source, .. } => Some(source),
        }
    }
}
