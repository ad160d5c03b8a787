use std::sync::OnceLock;

use anyhow::{Context, Result, bail};

/// Process-wide settings resolved from CLI flags and the environment.
#[derive(Debug)]
pub struct AppConfig {
    /// Namespace the records are created in.
    pub namespace: String,
    /// Cluster identifier stored with every record. Required for saves.
    pub cluster_name: Option<String>,
    /// `kubectl` binary name or path.
    pub kubectl: String,
    /// False with `--no-store`: reports only go to files.
    pub use_store: bool,
    pub json: bool,
}

impl AppConfig {
    pub fn require_cluster_name(&self) -> Result<&str> {
        self.cluster_name.as_deref().context(
            "A cluster name is required to save reports. \
             Pass --cluster-name or set STOWAGE_CLUSTER_NAME.",
        )
    }
}

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

pub fn init_from_cli(
    namespace: String,
    cluster_name: Option<String>,
    kubectl: String,
    no_store: bool,
    json: bool,
) -> Result<()> {
    let namespace = namespace.trim().to_string();
    if namespace.is_empty() {
        bail!("Namespace must not be empty");
    }

    let cfg = AppConfig {
        namespace,
        cluster_name: cluster_name
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        kubectl,
        use_store: !no_store,
        json,
    };

    if CONFIG.set(cfg).is_err() {
        bail!("Configuration was already initialized");
    }
    Ok(())
}

pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("config::init_from_cli must run before config::get")
}
