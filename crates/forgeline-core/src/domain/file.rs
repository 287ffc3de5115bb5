//! Config file blobs.

use serde::{Deserialize, Serialize};

/// A named config file and its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlob {
    pub name: String,
    pub data: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Lossy UTF-8 view of the content.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Keep only `.yml` files, preserving order.
pub fn filter_pipeline_files(files: Vec<FileBlob>) -> Vec<FileBlob> {
    files
        .into_iter()
        .filter(|f| f.name.ends_with(".yml"))
        .collect()
}
