//! Structured records for the `kubevuln.io/v1` scan-report resources.
//!
//! Builders here are pure: they take the capture time as an argument and never
//! touch the filesystem or the store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::persist::PersistenceIdentity;
use crate::report::{DiveResult, TruffleHogResult};
use crate::sanitize::sanitize_label;

pub const API_VERSION: &str = "kubevuln.io/v1";
pub const STATUS_COMPLETED: &str = "completed";
const SCAN_TOOL_ANNOTATION: &str = "kubevuln.io/scan-tool";
const EMPTY_FINDINGS: &str = "[]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    DiveScanning,
    SecretScanning,
}

impl RecordKind {
    /// Plural resource name under the `kubevuln.io` group.
    pub fn resource(self) -> &'static str {
        match self {
            Self::DiveScanning => "divescannings",
            Self::SecretScanning => "secretscannings",
        }
    }

    /// Value of the `scanType` label and suffix of the record name.
    pub fn scan_type(self) -> &'static str {
        match self {
            Self::DiveScanning => "dive",
            Self::SecretScanning => "secret",
        }
    }

    pub fn tool(self) -> &'static str {
        match self {
            Self::DiveScanning => "dive",
            Self::SecretScanning => "trufflehog",
        }
    }

    fn report_annotation(self) -> (&'static str, &'static str) {
        match self {
            Self::DiveScanning => (
                "kubevuln.io/dive-report",
                "Complete dive analysis JSON report",
            ),
            Self::SecretScanning => (
                "kubevuln.io/trufflehog-report",
                "Complete trufflehog secrets scan JSON report",
            ),
        }
    }

    /// `{image}-{job}-{dive|secret}`, built from already-sanitized parts.
    pub fn record_name(self, sanitized_image: &str, sanitized_job: &str) -> String {
        format!("{sanitized_image}-{sanitized_job}-{}", self.scan_type())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiveScanning => f.write_str("DiveScanning"),
            Self::SecretScanning => f.write_str("SecretScanning"),
        }
    }
}

/// A single create-only record as submitted to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    pub api_version: String,
    pub kind: RecordKind,
    pub metadata: ObjectMeta,
    pub spec: RecordSpec,
    pub status: RecordStatus,
}

impl StructuredRecord {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordSpec {
    Dive(DiveScanningSpec),
    Secret(SecretScanningSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiveScanningSpec {
    pub image: String,
    pub namespace: String,
    pub timestamp: String,
    pub cluster_name: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
    /// Complete dive JSON report, verbatim.
    pub dive_report: String,
    pub image_size: u64,
    pub layers: usize,
    pub efficiency_score: f64,
    pub report_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretScanningSpec {
    pub image: String,
    pub namespace: String,
    pub timestamp: String,
    pub cluster_name: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
    /// Complete trufflehog JSON report, verbatim.
    pub trufflehog_report: String,
    pub secrets_found: usize,
    pub report_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatus {
    pub status: String,
    pub last_updated: String,
}

/// Shared pieces of a record that do not depend on the report kind.
struct Envelope {
    metadata: ObjectMeta,
    job_id: String,
    timestamp: String,
}

fn envelope(kind: RecordKind, identity: &PersistenceIdentity, captured_at: DateTime<Utc>) -> Envelope {
    let image = sanitize_label(&identity.image_name);
    let job_id = sanitize_label(&identity.job_id);
    let (report_key, report_desc) = kind.report_annotation();

    let labels = BTreeMap::from([
        ("image".to_string(), image.clone()),
        ("jobId".to_string(), job_id.clone()),
        ("scanType".to_string(), kind.scan_type().to_string()),
        ("tool".to_string(), kind.tool().to_string()),
    ]);
    let annotations = BTreeMap::from([
        (report_key.to_string(), report_desc.to_string()),
        (SCAN_TOOL_ANNOTATION.to_string(), kind.tool().to_string()),
    ]);

    Envelope {
        metadata: ObjectMeta {
            name: kind.record_name(&image, &job_id),
            namespace: identity.namespace.clone(),
            labels,
            annotations,
        },
        job_id,
        timestamp: captured_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    }
}

/// Build a `DiveScanning` record.
///
/// `document` is the complete dive report as read from disk. When it is absent
/// the payload is serialized in its place; when both are absent the scan
/// produced nothing usable and this fails with [`PersistError::NoDataAvailable`].
pub fn build_dive_record(
    identity: &PersistenceIdentity,
    cluster_name: &str,
    dive: Option<&DiveResult>,
    document: Option<&str>,
    captured_at: DateTime<Utc>,
) -> Result<StructuredRecord, PersistError> {
    let dive_report = match (document, dive) {
        (Some(doc), _) => doc.to_string(),
        (None, Some(dive)) => serde_json::to_string(dive).map_err(|source| {
            PersistError::Serialization {
                what: "dive result",
                source,
            }
        })?,
        (None, None) => return Err(PersistError::NoDataAvailable),
    };

    let (image_size, layers, efficiency_score) = dive
        .map(|d| (d.image.size_bytes, d.layer_count(), d.image.efficiency_score))
        .unwrap_or_default();

    let kind = RecordKind::DiveScanning;
    let env = envelope(kind, identity, captured_at);
    Ok(StructuredRecord {
        api_version: API_VERSION.to_string(),
        kind,
        spec: RecordSpec::Dive(DiveScanningSpec {
            image: identity.image_tag.clone(),
            namespace: identity.namespace.clone(),
            timestamp: env.timestamp.clone(),
            cluster_name: cluster_name.to_string(),
            job_id: env.job_id,
            dive_report,
            image_size,
            layers,
            efficiency_score,
            report_path: identity.output_path.to_string_lossy().into_owned(),
        }),
        status: RecordStatus {
            status: STATUS_COMPLETED.to_string(),
            last_updated: env.timestamp,
        },
        metadata: env.metadata,
    })
}

/// Build a `SecretScanning` record.
///
/// Unlike dive, "nothing found" is a normal outcome: with no document and no
/// findings the report is the empty array `[]`.
pub fn build_secret_record(
    identity: &PersistenceIdentity,
    cluster_name: &str,
    findings: Option<&[TruffleHogResult]>,
    document: Option<&str>,
    captured_at: DateTime<Utc>,
) -> Result<StructuredRecord, PersistError> {
    let trufflehog_report = match (document, findings) {
        (Some(doc), _) => doc.to_string(),
        (None, Some(findings)) => serde_json::to_string(findings).map_err(|source| {
            PersistError::Serialization {
                what: "trufflehog results",
                source,
            }
        })?,
        (None, None) => EMPTY_FINDINGS.to_string(),
    };

    let kind = RecordKind::SecretScanning;
    let env = envelope(kind, identity, captured_at);
    Ok(StructuredRecord {
        api_version: API_VERSION.to_string(),
        kind,
        spec: RecordSpec::Secret(SecretScanningSpec {
            image: identity.image_tag.clone(),
            namespace: identity.namespace.clone(),
            timestamp: env.timestamp.clone(),
            cluster_name: cluster_name.to_string(),
            job_id: env.job_id,
            trufflehog_report,
            secrets_found: findings.map_or(0, <[_]>::len),
            report_path: identity.output_path.to_string_lossy().into_owned(),
        }),
        status: RecordStatus {
            status: STATUS_COMPLETED.to_string(),
            last_updated: env.timestamp,
        },
        metadata: env.metadata,
    })
}
