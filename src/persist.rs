//! Report persistence: structured record first, JSON file as fallback.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::fallback;
use crate::record::{self, RecordKind, StructuredRecord};
use crate::report::{DiveResult, TruffleHogResult};
use crate::store::{RecordStore, StoreError};

/// Who and where a report belongs to.
///
/// `image_name` and `job_id` end up in record names and labels and are
/// sanitized on the way; `image_tag` and `output_path` are stored as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceIdentity {
    pub image_tag: String,
    pub image_name: String,
    pub job_id: String,
    pub namespace: String,
    /// Where the scanner may already have written the complete report, and
    /// where the fallback copy goes.
    pub output_path: PathBuf,
}

/// Why a report ended up in a file instead of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    BackendUnavailable,
    CreateFailed(StoreError),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendUnavailable => f.write_str("no record store configured"),
            Self::CreateFailed(err) => write!(f, "record store refused the report: {err}"),
        }
    }
}

/// Where a report was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Structured {
        kind: RecordKind,
        name: String,
    },
    File {
        kind: RecordKind,
        path: PathBuf,
        reason: FallbackReason,
    },
}

impl Persisted {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Structured { kind, .. } | Self::File { kind, .. } => *kind,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// Saves dive and trufflehog reports.
///
/// Holds the optional store handle and nothing else that changes; cloning is
/// cheap and concurrent saves do not interact beyond the store's own
/// name-uniqueness rule.
#[derive(Clone)]
pub struct ReportPersister {
    store: Option<Arc<dyn RecordStore>>,
    cluster_name: String,
}

impl fmt::Debug for ReportPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportPersister")
            .field("store", &self.store.as_ref().map(|_| "<dyn RecordStore>"))
            .field("cluster_name", &self.cluster_name)
            .finish()
    }
}

impl ReportPersister {
    pub fn new(store: Option<Arc<dyn RecordStore>>, cluster_name: impl Into<String>) -> Self {
        Self {
            store,
            cluster_name: cluster_name.into(),
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&dyn RecordStore, PersistError> {
        self.store.as_deref().ok_or(PersistError::BackendUnavailable)
    }

    /// Save a dive report as a `DiveScanning` record, or to
    /// `identity.output_path` if the store refuses it.
    ///
    /// Fails with [`PersistError::BackendUnavailable`] without touching the
    /// filesystem when no store is configured; use
    /// [`save_dive_report_to_file`](Self::save_dive_report_to_file) then.
    pub async fn save_dive_report(
        &self,
        identity: &PersistenceIdentity,
        dive: Option<&DiveResult>,
    ) -> Result<Persisted, PersistError> {
        let store = self.store()?;
        let document = fallback::read_document(&identity.output_path);
        let record = record::build_dive_record(identity, &self.cluster_name, dive, document.as_deref(), Utc::now())?;

        self.persist(store, record, identity, || {
            write_dive_file(&identity.output_path, dive, document.is_some())
        })
        .await
    }

    /// Save trufflehog findings as a `SecretScanning` record, or to
    /// `identity.output_path` if the store refuses it.
    pub async fn save_secret_report(
        &self,
        identity: &PersistenceIdentity,
        findings: Option<&[TruffleHogResult]>,
    ) -> Result<Persisted, PersistError> {
        let store = self.store()?;
        let document = fallback::read_document(&identity.output_path);
        let record =
            record::build_secret_record(identity, &self.cluster_name, findings, document.as_deref(), Utc::now())?;

        self.persist(store, record, identity, || {
            write_secret_file(&identity.output_path, findings, document.is_some())
        })
        .await
    }

    /// File-only save for callers without a store.
    pub fn save_dive_report_to_file(
        &self,
        identity: &PersistenceIdentity,
        dive: Option<&DiveResult>,
    ) -> Result<Persisted, PersistError> {
        let on_disk = fallback::read_document(&identity.output_path).is_some();
        write_dive_file(&identity.output_path, dive, on_disk)?;
        Ok(file_outcome(RecordKind::DiveScanning, identity, FallbackReason::BackendUnavailable))
    }

    /// File-only save for callers without a store.
    pub fn save_secret_report_to_file(
        &self,
        identity: &PersistenceIdentity,
        findings: Option<&[TruffleHogResult]>,
    ) -> Result<Persisted, PersistError> {
        let on_disk = fallback::read_document(&identity.output_path).is_some();
        write_secret_file(&identity.output_path, findings, on_disk)?;
        Ok(file_outcome(RecordKind::SecretScanning, identity, FallbackReason::BackendUnavailable))
    }

    /// One create, no retries, then exactly one file write attempt.
    async fn persist<W>(
        &self,
        store: &dyn RecordStore,
        record: StructuredRecord,
        identity: &PersistenceIdentity,
        write_file: W,
    ) -> Result<Persisted, PersistError>
    where
        W: FnOnce() -> Result<(), PersistError>,
    {
        let kind = record.kind;
        match store.create(&record).await {
            Ok(()) => {
                info!(
                    %kind,
                    name = record.name(),
                    image = %identity.image_tag,
                    namespace = %identity.namespace,
                    "report saved as structured record"
                );
                // local copy only; the record is already the durable one
                if let Err(err) = write_file() {
                    warn!(%kind, error = %err, "structured record created but local report copy failed");
                }
                Ok(Persisted::Structured {
                    kind,
                    name: record.metadata.name,
                })
            }
            Err(err) => {
                warn!(
                    %kind,
                    name = record.name(),
                    error = %err,
                    "failed to create structured record, falling back to file storage"
                );
                write_file()?;
                Ok(file_outcome(kind, identity, FallbackReason::CreateFailed(err)))
            }
        }
    }
}

fn file_outcome(kind: RecordKind, identity: &PersistenceIdentity, reason: FallbackReason) -> Persisted {
    Persisted::File {
        kind,
        path: identity.output_path.clone(),
        reason,
    }
}

/// A supplied payload is always written. Without one, a report the scanner
/// already wrote to `path` is the durable copy and is left alone.
fn write_dive_file(path: &Path, dive: Option<&DiveResult>, on_disk: bool) -> Result<(), PersistError> {
    match dive {
        Some(dive) => fallback::write_report(dive, path, "dive result"),
        None if on_disk => {
            debug!(path = %path.display(), "dive report already on disk");
            Ok(())
        }
        None => Err(PersistError::NoDataAvailable),
    }
}

fn write_secret_file(path: &Path, findings: Option<&[TruffleHogResult]>, on_disk: bool) -> Result<(), PersistError> {
    match findings {
        Some(findings) => fallback::write_report(findings, path, "trufflehog results"),
        None if on_disk => {
            debug!(path = %path.display(), "trufflehog report already on disk");
            Ok(())
        }
        None => fallback::write_report(&[] as &[TruffleHogResult], path, "trufflehog results"),
    }
}
