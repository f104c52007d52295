//! Multipart upload lifecycle types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a buffered multipart upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// No multipart upload has been initiated yet.
    #[default]
    Uninitiated,
    /// The multipart upload was initiated and is accepting parts.
    Uploading,
    /// The multipart upload was completed.
    Completed,
    /// The multipart upload was aborted.
    Aborted,
}

impl UploadState {
    /// Check if parts can still be uploaded.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading)
    }

    /// Check if the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Lowercase name, as used in logs and serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitiated => "uninitiated",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An acknowledged part of a multipart upload.
///
/// The ordered list of tags is what the completion call sends back to the
/// storage service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartTag {
    /// 1-based part number.
    pub part_number: i32,
    /// Opaque entity tag returned by the storage service for the part.
    pub e_tag: String,
}

impl PartTag {
    /// Create a new part tag.
    pub fn new(part_number: i32, e_tag: impl Into<String>) -> Self {
        Self {
            part_number,
            e_tag: e_tag.into(),
        }
    }
}
