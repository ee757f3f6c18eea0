//! Data models for stored uploads and the policies that admit them.
//!
//! Nothing here is persisted separately: the directory tree under the storage
//! root is the only record of what has been stored.

pub mod policy;
pub mod stored_file;
