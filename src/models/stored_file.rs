//! Records describing files persisted under the storage root.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A file written by an upload request.
///
/// Identity is `(bucket, storage_name)`, which is also its relative path
/// beneath the storage root.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Multipart field the file arrived under.
    pub field_name: String,

    /// Client-supplied filename. Untrusted, echoed back only.
    pub original_name: String,

    /// Sanitized, suffixed filename on disk.
    pub storage_name: String,

    /// UTC date directory holding the file.
    pub bucket: NaiveDate,

    /// `YYYY-MM-DD/<storage_name>`, always `/`-separated.
    pub relative_path: String,

    /// Declared content type of the part.
    pub mime_type: String,

    pub size_bytes: u64,

    /// Birth time of the committed file, or its modification time where
    /// the filesystem records no birth time.
    pub created_at: Option<DateTime<Utc>>,

    /// Public retrieval URL.
    pub url: String,
}

/// One entry of a storage listing.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub filename: String,
    pub relative_path: String,
    pub size_bytes: u64,
    /// Birth time when the filesystem records one, otherwise modification time.
    pub created_at: Option<DateTime<Utc>>,
    pub url: String,
}
