//! Durable storage for auxiliary container-image scan reports.
//!
//! Two kinds of report come out of an image scan: a layer-efficiency analysis
//! produced by `dive` and a secret-leak analysis produced by `trufflehog`.
//! [`persist::ReportPersister`] records each one as a structured record in a
//! Kubernetes-style store and falls back to a plain JSON file when the store
//! is missing or refuses the write, so at least one copy always survives.
//!
//! [`poller`] is the client-side half of the same contract: it waits for the
//! dive JSON file a background scan is expected to leave on disk.

pub mod error;
pub mod fallback;
pub mod persist;
pub mod poller;
pub mod record;
pub mod report;
pub mod sanitize;
pub mod store;

pub use error::PersistError;
pub use persist::{FallbackReason, PersistenceIdentity, Persisted, ReportPersister};
pub use record::{RecordKind, StructuredRecord};
pub use report::{DiveResult, TruffleHogResult};
pub use sanitize::sanitize_label;
pub use store::{RecordStore, StoreError};
