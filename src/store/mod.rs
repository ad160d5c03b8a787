//! The structured-store boundary: a create-only sink for [`StructuredRecord`]s.

pub mod kubectl;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::StructuredRecord;

pub use kubectl::KubectlStore;

/// Why a create was refused. None of these are retried by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record with the same name already exists.
    #[error("record {name} already exists")]
    Conflict { name: String },

    /// The store could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered but refused the record (validation, RBAC, ...).
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Create-only record store.
///
/// Name uniqueness is the store's job: creating a record whose name is already
/// taken must fail with [`StoreError::Conflict`] rather than overwrite.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: &StructuredRecord) -> Result<(), StoreError>;
}
