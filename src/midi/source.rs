use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Display metadata supplied alongside a resource. Passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub filename: String,
    pub size: u64,
}

/// Something that can hand over the raw bytes of a MIDI resource.
///
/// Fetching over the network is the caller's business: fetch, then wrap the
/// bytes in a [`MidiBytes`].
pub trait MidiSource {
    fn read_bytes(&self) -> Result<Vec<u8>, LoadError>;

    /// Human readable name used in logs and as a fallback file name.
    fn label(&self) -> String;

    fn resource_info(&self) -> Option<ResourceInfo> {
        None
    }
}

impl MidiSource for Path {
    fn read_bytes(&self) -> Result<Vec<u8>, LoadError> {
        fs::read(self).map_err(|source| LoadError::Io {
            path: self.to_path_buf(),
            source,
        })
    }

    fn label(&self) -> String {
        self.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.display().to_string())
    }

    fn resource_info(&self) -> Option<ResourceInfo> {
        let size = fs::metadata(self).ok()?.len();
        let filename = self.file_name()?.to_string_lossy().into_owned();
        Some(ResourceInfo { filename, size })
    }
}

impl MidiSource for PathBuf {
    fn read_bytes(&self) -> Result<Vec<u8>, LoadError> {
        self.as_path().read_bytes()
    }

    fn label(&self) -> String {
        self.as_path().label()
    }

    fn resource_info(&self) -> Option<ResourceInfo> {
        self.as_path().resource_info()
    }
}

/// An already fetched resource.
#[derive(Debug, Clone)]
pub struct MidiBytes {
    pub name: String,
    pub bytes: Vec<u8>,
    pub info: Option<ResourceInfo>,
}

impl MidiBytes {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            info: None,
        }
    }

    pub fn with_info(mut self, info: ResourceInfo) -> Self {
        self.info = Some(info);
        self
    }
}

impl MidiSource for MidiBytes {
    fn read_bytes(&self) -> Result<Vec<u8>, LoadError> {
        Ok(self.bytes.clone())
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn resource_info(&self) -> Option<ResourceInfo> {
        self.info.clone()
    }
}
