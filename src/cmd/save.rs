use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use crossterm::style::{self, Stylize};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::{self, AppConfig};
use crate::progress::Spinner;
use stowage::poller::normalize_image_name;
use stowage::store::KubectlStore;
use stowage::{
    DiveResult, PersistError, PersistenceIdentity, Persisted, RecordStore, ReportPersister, TruffleHogResult,
};

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Image reference that was scanned (e.g. nginx:latest)
    #[arg(long)]
    image: String,

    /// Name used for the record and its labels (default: normalized image reference)
    #[arg(long)]
    image_name: Option<String>,

    /// Scan job identifier
    #[arg(long)]
    job_id: String,

    /// Report file: read if the scanner already wrote it, written as the fallback copy
    #[arg(long)]
    output: PathBuf,
}

impl TargetArgs {
    fn identity(self, namespace: &str) -> PersistenceIdentity {
        let image_name = self
            .image_name
            .unwrap_or_else(|| normalize_image_name(&self.image));
        PersistenceIdentity {
            image_tag: self.image,
            image_name,
            job_id: self.job_id,
            namespace: namespace.to_string(),
            output_path: self.output,
        }
    }
}

pub async fn dive(target: TargetArgs, payload: Option<&Path>) -> Result<()> {
    let cfg = config::get();
    let dive: Option<DiveResult> = payload.map(load_json).transpose()?;
    let persister = build_persister(cfg)?;
    let identity = target.identity(&cfg.namespace);

    let spinner = Spinner::new(format!("Saving dive report for {} ...", identity.image_tag));
    let persisted = match persister.save_dive_report(&identity, dive.as_ref()).await {
        Err(PersistError::BackendUnavailable) => persister.save_dive_report_to_file(&identity, dive.as_ref()),
        other => other,
    }
    .with_context(|| format!("Failed to save dive report for {}", identity.image_tag))?;

    report(spinner, &persisted, cfg.json)
}

pub async fn secret(target: TargetArgs, findings: Option<&Path>) -> Result<()> {
    let cfg = config::get();
    let findings = findings.map(load_findings).transpose()?;
    let persister = build_persister(cfg)?;
    let identity = target.identity(&cfg.namespace);

    let spinner = Spinner::new(format!("Saving secret scan report for {} ...", identity.image_tag));
    let persisted = match persister.save_secret_report(&identity, findings.as_deref()).await {
        Err(PersistError::BackendUnavailable) => {
            persister.save_secret_report_to_file(&identity, findings.as_deref())
        }
        other => other,
    }
    .with_context(|| format!("Failed to save secret scan report for {}", identity.image_tag))?;

    report(spinner, &persisted, cfg.json)
}

/// A store that cannot be discovered degrades to file-only saves.
fn build_persister(cfg: &AppConfig) -> Result<ReportPersister> {
    let cluster_name = cfg.require_cluster_name()?;

    let store = if cfg.use_store {
        match KubectlStore::discover(&cfg.kubectl) {
            Ok(store) => {
                tracing::info!(access = ?store.access(), "saving reports through kubectl");
                Some(Arc::new(store) as Arc<dyn RecordStore>)
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "record store unavailable, saving reports to files");
                None
            }
        }
    } else {
        None
    };

    Ok(ReportPersister::new(store, cluster_name))
}

fn report(spinner: Spinner, persisted: &Persisted, json: bool) -> Result<()> {
    let summary = match persisted {
        Persisted::Structured { kind, name } => {
            spinner.finish(format!("{kind} record {} created", style::style(name).cyan()));
            json!({ "kind": kind.to_string(), "persisted": "record", "name": name })
        }
        Persisted::File { kind, path, reason } => {
            spinner.warn(format!(
                "{kind} report saved to {} ({})",
                style::style(path.display()).cyan(),
                reason.to_string().dim()
            ));
            json!({
                "kind": kind.to_string(),
                "persisted": "file",
                "path": path.display().to_string(),
                "reason": reason.to_string(),
            })
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// trufflehog writes one JSON object per line; a plain JSON array works too.
fn load_findings(path: &Path) -> Result<Vec<TruffleHogResult>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()));
    }

    let mut findings = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let finding: TruffleHogResult =
            serde_json::from_str(line).with_context(|| format!("Failed to parse finding: {line}"))?;
        findings.push(finding);
    }
    Ok(findings)
}
