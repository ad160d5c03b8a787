use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{RecordStore, StoreError};
use crate::record::StructuredRecord;

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

// stderr fragments kubectl prints when it never got an answer from the API server
const TRANSPORT_MARKERS: &[&str] = &[
    "Unable to connect to the server",
    "connection refused",
    "i/o timeout",
    "no such host",
    "TLS handshake timeout",
    "context deadline exceeded",
];

/// How `kubectl` reaches the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterAccess {
    /// Running in a pod; kubectl picks up the service account on its own.
    InCluster,
    Kubeconfig(PathBuf),
}

/// Creates records through the `kubectl` CLI.
/// Needs nothing but the binary and a working cluster config.
#[derive(Debug, Clone)]
pub struct KubectlStore {
    binary: PathBuf,
    access: ClusterAccess,
}

impl KubectlStore {
    pub fn new(binary: PathBuf, access: ClusterAccess) -> Self {
        Self { binary, access }
    }

    /// Locate `kubectl` and a cluster config: the in-cluster service account
    /// first, then `$KUBECONFIG`, then `~/.kube/config`.
    pub fn discover(kubectl: &str) -> Result<Self> {
        let binary = find_binary(kubectl, env::var_os("PATH"))
            .with_context(|| format!("Could not find `{kubectl}` on PATH"))?;

        let in_cluster =
            env::var_os("KUBERNETES_SERVICE_HOST").is_some() && Path::new(SERVICE_ACCOUNT_TOKEN).is_file();
        let access = resolve_access(in_cluster, env::var_os("KUBECONFIG"), env::var_os("HOME"))?;

        debug!(binary = %binary.display(), ?access, "kubectl store discovered");
        Ok(Self::new(binary, access))
    }

    pub fn access(&self) -> &ClusterAccess {
        &self.access
    }

    fn create_args(&self, namespace: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["create", "--filename", "-", "--output", "name", "--namespace"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(namespace.into());
        if let ClusterAccess::Kubeconfig(path) = &self.access {
            args.push("--kubeconfig".into());
            args.push(path.into());
        }
        args
    }
}

#[async_trait]
impl RecordStore for KubectlStore {
    async fn create(&self, record: &StructuredRecord) -> Result<(), StoreError> {
        let body = serde_json::to_vec(record)
            .map_err(|e| StoreError::Rejected(format!("record {} is not encodable: {e}", record.name())))?;

        // kill_on_drop: a caller-side timeout dropping this future also stops kubectl
        let mut child = Command::new(&self.binary)
            .args(self.create_args(record.namespace()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StoreError::Transport(format!("failed to run {}: {e}", self.binary.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| StoreError::Transport("failed to open kubectl stdin".into()))?;
        // kubectl that exits early closes its stdin; its stderr says why
        match stdin.write_all(&body).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(StoreError::Transport(format!("failed to send record to kubectl: {e}"))),
        }
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StoreError::Transport(format!("kubectl did not finish: {e}")))?;

        if output.status.success() {
            debug!(
                resource = record.kind.resource(),
                created = %String::from_utf8_lossy(&output.stdout).trim(),
                "kubectl create succeeded"
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(stderr.trim(), record.name(), output.status.code()))
    }
}

/// Map a failed `kubectl create` to a [`StoreError`] from what it printed.
fn classify_failure(stderr: &str, name: &str, code: Option<i32>) -> StoreError {
    if stderr.contains("AlreadyExists") || stderr.contains("already exists") {
        return StoreError::Conflict { name: name.to_string() };
    }
    if TRANSPORT_MARKERS.iter().any(|m| stderr.contains(m)) {
        return StoreError::Transport(stderr.to_string());
    }
    if stderr.is_empty() {
        return StoreError::Rejected(format!(
            "kubectl exited with code {} and no output",
            code.map_or_else(|| "?".to_string(), |c| c.to_string())
        ));
    }
    StoreError::Rejected(stderr.to_string())
}

fn find_binary(name: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    env::split_paths(&path_var?)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

fn resolve_access(
    in_cluster: bool,
    kubeconfig: Option<OsString>,
    home: Option<OsString>,
) -> Result<ClusterAccess> {
    if in_cluster {
        return Ok(ClusterAccess::InCluster);
    }

    let path = match kubeconfig.filter(|k| !k.is_empty()) {
        // KUBECONFIG may list several files; kubectl merges them, we only need one to exist
        Some(list) => env::split_paths(&list).find(|p| p.is_file()),
        None => home.map(|h| PathBuf::from(h).join(".kube").join("config")).filter(|p| p.is_file()),
    };

    match path {
        Some(path) => Ok(ClusterAccess::Kubeconfig(path)),
        None => bail!("No in-cluster service account and no kubeconfig found"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn classifies_conflicts() {
        let stderr = r#"Error from server (AlreadyExists): error when creating "STDIN": divescannings.kubevuln.io "nginx-latest-job-1-dive" already exists"#;
        assert_eq!(
            classify_failure(stderr, "nginx-latest-job-1-dive", Some(1)),
            StoreError::Conflict {
                name: "nginx-latest-job-1-dive".into()
            }
        );
    }

    #[test]
    fn classifies_transport_failures() {
        let stderr = "Unable to connect to the server: dial tcp 10.0.0.1:6443: connect: connection refused";
        assert!(matches!(classify_failure(stderr, "x", Some(1)), StoreError::Transport(_)));
    }

    #[test]
    fn everything_else_is_rejected() {
        let stderr = r#"error: resource mapping not found for name: "x" namespace: "" from "STDIN": no matches for kind "DiveScanning""#;
        assert!(matches!(classify_failure(stderr, "x", Some(1)), StoreError::Rejected(m) if m.contains("no matches")));
        assert_eq!(
            classify_failure("", "x", Some(2)),
            StoreError::Rejected("kubectl exited with code 2 and no output".into())
        );
    }

    #[test]
    fn args_include_namespace_and_kubeconfig() {
        let store = KubectlStore::new("kubectl".into(), ClusterAccess::Kubeconfig("/home/u/.kube/config".into()));
        let args = store.create_args("kubescape");
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "create", "--filename", "-", "--output", "name", "--namespace", "kubescape",
                "--kubeconfig", "/home/u/.kube/config"
            ]
        );

        let in_cluster = KubectlStore::new("kubectl".into(), ClusterAccess::InCluster);
        assert!(!in_cluster.create_args("ns").iter().any(|a| a == "--kubeconfig"));
    }

    #[test]
    fn access_prefers_in_cluster() {
        let access = resolve_access(true, Some("/nonexistent".into()), None).unwrap();
        assert_eq!(access, ClusterAccess::InCluster);
    }

    #[test]
    fn access_falls_back_to_home_config() {
        let home = tempfile::tempdir().unwrap();
        fs::create_dir(home.path().join(".kube")).unwrap();
        fs::write(home.path().join(".kube/config"), "apiVersion: v1\n").unwrap();

        let access = resolve_access(false, None, Some(home.path().into())).unwrap();
        assert_eq!(access, ClusterAccess::Kubeconfig(home.path().join(".kube/config")));
    }

    #[test]
    fn access_uses_kubeconfig_env() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("kind.yaml");
        fs::write(&cfg, "apiVersion: v1\n").unwrap();

        let access = resolve_access(false, Some(cfg.clone().into()), None).unwrap();
        assert_eq!(access, ClusterAccess::Kubeconfig(cfg));
    }

    #[test]
    fn access_fails_without_any_config() {
        let home = tempfile::tempdir().unwrap();
        assert!(resolve_access(false, None, Some(home.path().into())).is_err());
        assert!(resolve_access(false, None, None).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn create_runs_kubectl_with_record_on_stdin() {
        use std::os::unix::fs::PermissionsExt;

        use crate::persist::PersistenceIdentity;
        use crate::record::build_secret_record;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("kubectl");
        fs::write(
            &script,
            "#!/bin/sh\n\
             d=$(dirname \"$0\")\n\
             echo \"$@\" > \"$d/args.txt\"\n\
             if [ -f \"$d/stdin.json\" ]; then\n\
               cat > /dev/null\n\
               echo 'Error from server (AlreadyExists): secretscannings.kubevuln.io \"x\" already exists' >&2\n\
               exit 1\n\
             fi\n\
             cat > \"$d/stdin.json\"\n\
             echo secretscanning.kubevuln.io/x\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let identity = PersistenceIdentity {
            image_tag: "alpine:3.20".into(),
            image_name: "alpine:3.20".into(),
            job_id: "j1".into(),
            namespace: "scans".into(),
            output_path: dir.path().join("out.json"),
        };
        let record = build_secret_record(&identity, "c", None, None, chrono::Utc::now()).unwrap();
        let store = KubectlStore::new(script, ClusterAccess::InCluster);

        store.create(&record).await.unwrap();
        let sent: StructuredRecord =
            serde_json::from_str(&fs::read_to_string(dir.path().join("stdin.json")).unwrap()).unwrap();
        assert_eq!(sent, record);
        let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(args.trim(), "create --filename - --output name --namespace scans");

        // second create of the same record hits the name conflict
        let err = store.create(&record).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                name: "alpine-3.20-j1-secret".into()
            }
        );
    }

    #[test]
    fn finds_binary_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("kubectl");
        fs::write(&bin, "").unwrap();

        assert_eq!(find_binary("kubectl", Some(dir.path().into())), Some(bin.clone()));
        assert_eq!(find_binary("kubectl", None), None);
        assert_eq!(find_binary(bin.to_str().unwrap(), None), Some(bin));
    }
}
