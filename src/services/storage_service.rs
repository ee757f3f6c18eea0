//! src/services/storage_service.rs
//!
//! StorageService: date-bucketed file storage on local disk. The directory
//! tree is the only metadata store: files live at
//! `base_path/{YYYY-MM-DD}/{stem}-{millis}-{nonce}{ext}` and every listing or
//! lookup re-reads the filesystem.

use crate::{
    models::stored_file::{FileEntry, StoredFile},
    services::naming::{NameParts, bare_filename},
};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{Stream, StreamExt, pin_mut};
use std::{
    ffi::OsStr,
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Directory name format of a bucket.
pub const BUCKET_FORMAT: &str = "%Y-%m-%d";

/// Prefix of in-flight files. Hidden entries are skipped by the index.
const STAGING_PREFIX: &str = ".tmp-";

/// Storage names tried before a commit gives up.
const MAX_NAME_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file type `{0}` is not allowed")]
    UnsupportedType(String),
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("too many files (at most {limit})")]
    TooMany { limit: usize },
    #[error("unexpected field `{0}`")]
    UnexpectedField(String),
    #[error("no file provided")]
    NoFileProvided,
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("upload interrupted: {0}")]
    Interrupted(#[source] io::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Declared metadata of one incoming file part.
#[derive(Clone, Debug)]
pub struct IncomingFile {
    pub field_name: String,
    pub original_name: String,
    pub mime_type: String,
}

/// StorageService owns the storage root and provides:
/// - bucket resolution (one directory per UTC day, created lazily)
/// - streamed writes with a size cap and cleanup of partial files
/// - recursive listing and bare-filename lookup for deletion
/// - public URL construction for stored paths
#[derive(Clone, Debug)]
pub struct StorageService {
    /// Root directory holding every bucket.
    pub base_path: PathBuf,

    /// URL path prefix stored files are served under, e.g. `/uploads`.
    pub public_base: String,
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base: public_base.into(),
        }
    }

    /// Bucket date for an upload arriving now.
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn bucket_name(date: NaiveDate) -> String {
        date.format(BUCKET_FORMAT).to_string()
    }

    /// Resolve the bucket directory for `date`, creating it if needed.
    ///
    /// Creation is idempotent, so concurrent first writers of a day both
    /// succeed and observe the same directory.
    pub async fn ensure_bucket(&self, date: NaiveDate) -> StorageResult<PathBuf> {
        let dir = self.base_path.join(Self::bucket_name(date));
        fs::create_dir_all(&dir).await.map_err(|err| {
            error!("failed to create bucket {}: {}", dir.display(), err);
            StorageError::Unavailable(err)
        })?;
        Ok(dir)
    }

    /// Stream one file into the bucket for `date`.
    ///
    /// - Writes into a hidden staging file, counting bytes as they arrive.
    /// - Fails with `TooLarge` as soon as the count passes `max_size`.
    /// - Flushes and fsyncs, then links the staging file to a freshly
    ///   allocated storage name without overwriting anything.
    ///
    /// The staging file is removed on every failure path, including the
    /// future being dropped mid-stream. A bucket left empty by a failed
    /// write is removed as well.
    pub async fn store_stream<S>(
        &self,
        date: NaiveDate,
        incoming: IncomingFile,
        max_size: u64,
        stream: S,
    ) -> StorageResult<StoredFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.store_stream_named(date, incoming, max_size, stream, NameParts::allocate)
            .await
    }

    async fn store_stream_named<S, F>(
        &self,
        date: NaiveDate,
        incoming: IncomingFile,
        max_size: u64,
        stream: S,
        next_name: F,
    ) -> StorageResult<StoredFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
        F: FnMut(&NameParts) -> String,
    {
        let bucket_dir = self.ensure_bucket(date).await?;
        let written = self
            .write_staged(&bucket_dir, &incoming.original_name, max_size, stream, next_name)
            .await;
        let (storage_name, size_bytes) = match written {
            Ok(written) => written,
            Err(err) => {
                self.prune_bucket(&bucket_dir).await;
                return Err(err);
            }
        };

        let created_at = fs::metadata(bucket_dir.join(&storage_name))
            .await
            .ok()
            .and_then(|meta| created_time(&meta));
        let relative = Path::new(&Self::bucket_name(date)).join(&storage_name);
        let stored = StoredFile {
            field_name: incoming.field_name,
            original_name: incoming.original_name,
            storage_name,
            bucket: date,
            relative_path: to_key(&relative),
            mime_type: incoming.mime_type,
            size_bytes,
            created_at,
            url: self.public_url(&relative),
        };
        info!(
            "stored {} ({} bytes) as {}",
            stored.original_name, stored.size_bytes, stored.relative_path
        );
        Ok(stored)
    }

    /// Write the body into a staging file and commit it, returning the
    /// storage name and byte count.
    async fn write_staged<S, F>(
        &self,
        bucket_dir: &Path,
        original_name: &str,
        max_size: u64,
        stream: S,
        mut next_name: F,
    ) -> StorageResult<(String, u64)>
    where
        S: Stream<Item = io::Result<Bytes>>,
        F: FnMut(&NameParts) -> String,
    {
        let (staged, mut file) = self.create_staging(bucket_dir).await?;
        debug!("staging upload at {}", staged.path().display());

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.map_err(StorageError::Interrupted)?;
            size_bytes += chunk.len() as u64;
            if size_bytes > max_size {
                return Err(StorageError::TooLarge { limit: max_size });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let parts = NameParts::from_original(original_name);
        let storage_name = self
            .commit(&staged, bucket_dir, || next_name(&parts))
            .await?;
        staged.discard().await;

        Ok((storage_name, size_bytes))
    }

    async fn create_staging(&self, bucket_dir: &Path) -> StorageResult<(StagedFile, File)> {
        let staged = StagedFile::new(bucket_dir.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4())));
        let file = match File::create(staged.path()).await {
            Ok(file) => file,
            // Another request pruned the bucket after it was ensured.
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(bucket_dir).await?;
                File::create(staged.path()).await?
            }
            Err(err) => return Err(StorageError::Unavailable(err)),
        };
        Ok((staged, file))
    }

    /// Link the staged file under a new storage name.
    ///
    /// `hard_link` fails with `AlreadyExists` instead of replacing an existing
    /// file, so a name collision is detected atomically and retried with the
    /// next name from `next_name`.
    async fn commit(
        &self,
        staged: &StagedFile,
        bucket_dir: &Path,
        mut next_name: impl FnMut() -> String,
    ) -> StorageResult<String> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = next_name();
            match fs::hard_link(staged.path(), bucket_dir.join(&name)).await {
                Ok(()) => return Ok(name),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    warn!("storage name {} taken (attempt {}), reallocating", name, attempt);
                }
                Err(err) => return Err(StorageError::Unavailable(err)),
            }
        }
        error!(
            "no free storage name in {} after {} attempts",
            bucket_dir.display(),
            MAX_NAME_ATTEMPTS
        );
        Err(StorageError::Unavailable(io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique storage name",
        )))
    }

    /// Remove `bucket_dir` if it holds nothing. Non-empty buckets stay.
    async fn prune_bucket(&self, bucket_dir: &Path) {
        if fs::remove_dir(bucket_dir).await.is_ok() {
            debug!("removed empty bucket {}", bucket_dir.display());
        }
    }

    /// Remove a file this service stored earlier, e.g. when its request is
    /// rejected after it was written.
    pub async fn remove_stored(&self, stored: &StoredFile) -> StorageResult<()> {
        let bucket_dir = self.base_path.join(Self::bucket_name(stored.bucket));
        let path = bucket_dir.join(&stored.storage_name);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("rolled back {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Unavailable(err)),
        }
        self.prune_bucket(&bucket_dir).await;
        Ok(())
    }

    /// Every regular, non-hidden file under the root, sorted by path.
    ///
    /// Symlinks are neither followed nor reported. A missing root is empty.
    async fn walk(&self) -> io::Result<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut found = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                if is_hidden(&entry.file_name()) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    match entry.metadata().await {
                        Ok(meta) => found.push((entry.path(), meta)),
                        // Deleted between readdir and stat.
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// List every stored file, oldest bucket first.
    pub async fn list_files(&self) -> StorageResult<Vec<FileEntry>> {
        let files = self.walk().await.map_err(|err| {
            error!("failed to walk {}: {}", self.base_path.display(), err);
            StorageError::Unavailable(err)
        })?;

        Ok(files
            .iter()
            .filter_map(|(path, meta)| self.entry_for(path, meta))
            .collect())
    }

    fn entry_for(&self, path: &Path, meta: &std::fs::Metadata) -> Option<FileEntry> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let filename = relative.file_name()?.to_string_lossy().into_owned();

        Some(FileEntry {
            filename,
            relative_path: to_key(relative),
            size_bytes: meta.len(),
            created_at: created_time(meta),
            url: self.public_url(relative),
        })
    }

    /// Find the stored file whose name equals the bare form of `filename`.
    ///
    /// Directory components are stripped first, so `../../etc/passwd` is
    /// looked up as `passwd` and only ever matches inside the root. When
    /// several buckets hold the same name the oldest bucket wins.
    pub async fn resolve(&self, filename: &str) -> StorageResult<PathBuf> {
        let bare = bare_filename(filename);
        if bare.is_empty() || bare.starts_with('.') {
            return Err(StorageError::NotFound(filename.to_string()));
        }

        self.walk()
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .find(|path| path.file_name().is_some_and(|name| name == bare))
            .ok_or_else(|| StorageError::NotFound(bare.to_string()))
    }

    /// Delete a stored file by bare filename, returning its relative path.
    pub async fn delete_by_name(&self, filename: &str) -> StorageResult<String> {
        let path = self.resolve(filename).await?;
        let key = path
            .strip_prefix(&self.base_path)
            .map(to_key)
            .unwrap_or_else(|_| bare_filename(filename).to_string());

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("deleted {}", key);
                Ok(key)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key)),
            Err(err) => {
                error!("failed to delete {}: {}", path.display(), err);
                Err(StorageError::Unavailable(err))
            }
        }
    }

    /// Open a stored file for reading by its bucket and storage name.
    ///
    /// Only a well-formed bucket date and a bare, non-hidden name are
    /// accepted; anything else is reported as not found.
    pub async fn open_file(&self, bucket: &str, name: &str) -> StorageResult<(File, u64)> {
        let not_found = || StorageError::NotFound(format!("{bucket}/{name}"));

        let bucket_ok = NaiveDate::parse_from_str(bucket, BUCKET_FORMAT)
            .is_ok_and(|date| Self::bucket_name(date) == bucket);
        let name_ok = !name.is_empty() && !name.starts_with('.') && bare_filename(name) == name;
        if !bucket_ok || !name_ok {
            return Err(not_found());
        }

        let path = self.base_path.join(bucket).join(name);
        let meta = match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(not_found()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(StorageError::Unavailable(err)),
        };
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                not_found()
            } else {
                StorageError::Unavailable(err)
            }
        })?;

        Ok((file, meta.len()))
    }

    /// Public URL for a path relative to the root.
    pub fn public_url(&self, relative: &Path) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), to_key(relative))
    }
}

/// Join the normal components of a relative path with `/`.
///
/// Shared by the writer and the index so listed URLs and write-time paths
/// always agree, whatever the host separator.
pub fn to_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Birth time when the filesystem records one, otherwise modification time.
fn created_time(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.created()
        .or_else(|_| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// A staging file that is deleted when dropped unless discarded first.
struct StagedFile {
    path: PathBuf,
    live: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, live: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staging file once its content is linked elsewhere.
    async fn discard(mut self) {
        self.live = false;
        if let Err(err) = fs::remove_file(&self.path).await {
            warn!("failed to remove staging file {}: {}", self.path.display(), err);
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        // Synchronous so the file is gone before the failed write returns.
        // A single unlink does not stall the worker.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed partial upload {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove partial upload {}: {}", self.path.display(), err),
        }
    }
}
