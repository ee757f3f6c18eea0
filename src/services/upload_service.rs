//! Per-request upload driver.
//!
//! An `UploadSession` receives the file parts of one request in arrival order,
//! applies the endpoint's field, count and type policy to each part before a
//! byte is written, and hands accepted parts to `StorageService`.
//!
//! Failure policy:
//! - A policy rejection or an interrupted body aborts the request. Files the
//!   request already wrote are removed (`abort`).
//! - A storage failure on one file is recorded against that file only. Files
//!   written before it are kept and later parts are still attempted.

use crate::{
    models::{policy::UploadPolicy, stored_file::StoredFile},
    services::storage_service::{IncomingFile, StorageError, StorageResult, StorageService},
};
use bytes::Bytes;
use chrono::NaiveDate;
use futures::Stream;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    io,
};
use tracing::{error, warn};

/// A part that could not be stored because storage failed.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailedUpload {
    pub field_name: String,
    pub original_name: String,
    pub error: String,
}

/// What a finished request stored, plus any per-file storage failures.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub stored: Vec<StoredFile>,
    pub failed: Vec<FailedUpload>,
}

impl UploadOutcome {
    /// Stored files grouped by the field they arrived under.
    pub fn by_field(&self) -> BTreeMap<String, Vec<StoredFile>> {
        let mut grouped: BTreeMap<String, Vec<StoredFile>> = BTreeMap::new();
        for file in &self.stored {
            grouped
                .entry(file.field_name.clone())
                .or_default()
                .push(file.clone());
        }
        grouped
    }
}

pub struct UploadSession<'a> {
    storage: &'a StorageService,
    policy: &'a UploadPolicy,
    date: NaiveDate,
    per_field: HashMap<String, usize>,
    total: usize,
    outcome: UploadOutcome,
}

impl<'a> UploadSession<'a> {
    /// Start a session whose files all land in today's bucket.
    pub fn new(storage: &'a StorageService, policy: &'a UploadPolicy) -> Self {
        Self::on_date(storage, policy, StorageService::today())
    }

    pub fn on_date(storage: &'a StorageService, policy: &'a UploadPolicy, date: NaiveDate) -> Self {
        Self {
            storage,
            policy,
            date,
            per_field: HashMap::new(),
            total: 0,
            outcome: UploadOutcome::default(),
        }
    }

    /// Check a part against the endpoint policy without touching storage.
    fn admit(&mut self, incoming: &IncomingFile) -> StorageResult<()> {
        let field = self
            .policy
            .field(&incoming.field_name)
            .ok_or_else(|| StorageError::UnexpectedField(incoming.field_name.clone()))?;

        let seen = self.per_field.entry(incoming.field_name.clone()).or_default();
        if *seen >= field.max_count {
            return Err(StorageError::TooMany {
                limit: field.max_count,
            });
        }
        if self.total >= self.policy.max_files {
            return Err(StorageError::TooMany {
                limit: self.policy.max_files,
            });
        }
        if !self.policy.types.accepts(&incoming.mime_type) {
            return Err(StorageError::UnsupportedType(incoming.mime_type.clone()));
        }

        *seen += 1;
        self.total += 1;
        Ok(())
    }

    /// Admit and store one file part.
    ///
    /// Returns `Err` only for errors that must abort the whole request; the
    /// caller is expected to pass them to [`UploadSession::abort`].
    pub async fn accept<S>(&mut self, incoming: IncomingFile, stream: S) -> StorageResult<()>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        if let Err(err) = self.admit(&incoming) {
            warn!(
                "{} upload rejected {} ({}): {}",
                self.policy.name, incoming.original_name, incoming.field_name, err
            );
            return Err(err);
        }

        let field_name = incoming.field_name.clone();
        let original_name = incoming.original_name.clone();
        match self
            .storage
            .store_stream(self.date, incoming, self.policy.max_file_size, stream)
            .await
        {
            Ok(stored) => {
                self.outcome.stored.push(stored);
                Ok(())
            }
            Err(StorageError::Unavailable(err)) => {
                error!("failed to store {} ({}): {}", original_name, field_name, err);
                self.outcome.failed.push(FailedUpload {
                    field_name,
                    original_name,
                    error: "storage unavailable".into(),
                });
                Ok(())
            }
            Err(err) => {
                warn!(
                    "{} upload rejected {} ({}): {}",
                    self.policy.name, original_name, field_name, err
                );
                Err(err)
            }
        }
    }

    /// Roll back everything this request stored and hand back `err`.
    pub async fn abort(self, err: StorageError) -> StorageError {
        for stored in &self.outcome.stored {
            if let Err(remove_err) = self.storage.remove_stored(stored).await {
                error!("failed to roll back {}: {}", stored.relative_path, remove_err);
            }
        }
        err
    }

    /// Close the session.
    ///
    /// Fails with `NoFileProvided` when the request carried no file part, and
    /// with `Unavailable` when every file part failed to store.
    pub fn finish(self) -> StorageResult<UploadOutcome> {
        if self.outcome.stored.is_empty() {
            if self.outcome.failed.is_empty() {
                return Err(StorageError::NoFileProvided);
            }
            return Err(StorageError::Unavailable(io::Error::other("no file could be stored")));
        }
        Ok(self.outcome)
    }
}
