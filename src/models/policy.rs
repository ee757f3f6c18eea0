//! Per-endpoint upload policy: accepted content types, field names and limits.

use crate::config::AppConfig;

pub const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

pub const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

pub const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/ogg"];

pub const AUDIO_TYPES: &[&str] = &["audio/mpeg", "audio/wav", "audio/ogg"];

/// Content type assumed for parts that declare none.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Room left in the request body limit for multipart boundaries and headers.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Decides whether a declared content type is accepted.
///
/// Only the declared type is inspected; the bytes are never sniffed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypePolicy {
    /// Exact match against a list of MIME essences.
    AllowList(Vec<&'static str>),
    /// Any MIME essence starting with the prefix.
    Prefix(&'static str),
}

impl TypePolicy {
    /// Images, documents, video and audio.
    pub fn general() -> Self {
        Self::AllowList([IMAGE_TYPES, DOCUMENT_TYPES, VIDEO_TYPES, AUDIO_TYPES].concat())
    }

    pub fn images_only() -> Self {
        Self::Prefix("image/")
    }

    pub fn accepts(&self, declared: &str) -> bool {
        let essence = mime_essence(declared);
        match self {
            Self::AllowList(types) => types.iter().any(|t| *t == essence),
            Self::Prefix(prefix) => essence.starts_with(*prefix),
        }
    }
}

/// Lowercased type/subtype with any parameters removed.
pub fn mime_essence(declared: &str) -> String {
    declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A multipart field an endpoint accepts files under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLimit {
    pub name: &'static str,
    pub max_count: usize,
}

impl FieldLimit {
    pub const fn new(name: &'static str, max_count: usize) -> Self {
        Self { name, max_count }
    }
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Endpoint label used in logs.
    pub name: &'static str,
    pub types: TypePolicy,
    pub max_file_size: u64,
    /// Total file parts accepted per request, across all fields.
    pub max_files: usize,
    pub fields: Vec<FieldLimit>,
}

impl UploadPolicy {
    pub fn field(&self, name: &str) -> Option<&FieldLimit> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Upper bound for the whole request body.
    pub fn request_body_limit(&self) -> usize {
        let size = usize::try_from(self.max_file_size).unwrap_or(usize::MAX);
        size
            .saturating_mul(self.max_files)
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}

/// The policies behind each upload route.
#[derive(Debug, Clone)]
pub struct EndpointPolicies {
    pub single: UploadPolicy,
    pub multiple: UploadPolicy,
    pub image: UploadPolicy,
    pub fields: UploadPolicy,
}

impl EndpointPolicies {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let fields = vec![
            FieldLimit::new("avatar", 1),
            FieldLimit::new("gallery", 3),
            FieldLimit::new("documents", 2),
        ];
        let fields_total: usize = fields.iter().map(|f| f.max_count).sum();

        Self {
            single: UploadPolicy {
                name: "single",
                types: TypePolicy::general(),
                max_file_size: cfg.max_file_size,
                max_files: 1,
                fields: vec![FieldLimit::new("file", 1)],
            },
            multiple: UploadPolicy {
                name: "multiple",
                types: TypePolicy::general(),
                max_file_size: cfg.max_file_size,
                max_files: cfg.max_files,
                fields: vec![FieldLimit::new("files", cfg.max_files)],
            },
            image: UploadPolicy {
                name: "image",
                types: TypePolicy::images_only(),
                max_file_size: cfg.image_max_file_size,
                max_files: 1,
                fields: vec![FieldLimit::new("image", 1)],
            },
            fields: UploadPolicy {
                name: "fields",
                types: TypePolicy::general(),
                max_file_size: cfg.max_file_size,
                max_files: fields_total,
                fields,
            },
        }
    }
}
