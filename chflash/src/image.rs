//! Firmware image loading.
//!
//! Images are raw binary files, read fully into memory before any device
//! interaction. Anything below [`MIN_IMAGE_SIZE`] bytes is rejected up
//! front as a likely truncated or corrupt build artifact.

use crate::error::{Error, InputError};
use std::fs;
use std::io;
use std::path::Path;

/// Minimum accepted firmware image size in bytes.
pub const MIN_IMAGE_SIZE: usize = 256;

/// A raw firmware image held fully in memory.
#[derive(Debug, Clone)]
pub struct Firmware {
    bytes: Vec<u8>,
}

impl Firmware {
    /// Load a firmware image from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                Error::Input(InputError::FileNotFound(path.to_path_buf()))
            },
            _ => Error::Io(err),
        })?;
        Self::from_bytes(bytes)
    }

    /// Wrap in-memory image bytes, applying the same size validation.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.len() < MIN_IMAGE_SIZE {
            return Err(Error::Input(InputError::FileTooSmall {
                size: bytes.len(),
                minimum: MIN_IMAGE_SIZE,
            }));
        }
        Ok(Self { bytes })
    }

    /// Image contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty (never true for a validated image).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
