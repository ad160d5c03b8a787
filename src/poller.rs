//! Waiting for a background dive scan to leave its JSON report on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

/// Where the scanner drops dive reports, relative to the working directory.
pub const DIVE_RESULTS_DIR: &str = "./dive-results";
pub const DIVE_FILE_SUFFIX: &str = "-dive.json";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
/// 18 x 10 s: about three minutes.
pub const DEFAULT_ATTEMPTS: u32 = 18;

const NOHASH_MARKER: &str = "-nohash";

/// The prefix the scanner uses for an image's dive files:
/// `:` and `/` become `-` and `-nohash` is appended unless already present.
pub fn normalize_image_name(image_tag: &str) -> String {
    let mut name = image_tag.replace([':', '/'], "-");
    if !name.contains(NOHASH_MARKER) {
        name.push_str(NOHASH_MARKER);
    }
    name
}

/// A dive report found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiveFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Newest `{image_name}*-dive.json` file in `dir`.
///
/// A missing directory simply has no candidates. Equal modification times go
/// to whichever entry the directory listing returns last.
pub fn find_most_recent_dive_file(dir: &Path, image_name: &str) -> io::Result<Option<DiveFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut newest: Option<DiveFile> = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(image_name) || !name.ends_with(DIVE_FILE_SUFFIX) {
            continue;
        }

        // the file may vanish or be unreadable between listing and stat
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            continue;
        }
        let Ok(modified) = meta.modified() else { continue };

        if newest.as_ref().is_none_or(|best| modified >= best.modified) {
            newest = Some(DiveFile {
                path: entry.path(),
                size: meta.len(),
                modified,
            });
        }
    }
    Ok(newest)
}

/// Every dive report name in `dir`, sorted. Used to tell the user what is
/// there when nothing matches.
pub fn list_dive_files(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().filter(|n| n.ends_with(DIVE_FILE_SUFFIX)) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Polling parameters: which directory, how often, how many times.
#[derive(Debug, Clone)]
pub struct DivePoller {
    pub dir: PathBuf,
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for DivePoller {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DIVE_RESULTS_DIR),
            interval: DEFAULT_INTERVAL,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl DivePoller {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Upper bound on how long a wait can take.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }

    /// Start waiting for `image_name`'s dive file. `image_name` must already be
    /// normalized (see [`normalize_image_name`]).
    pub fn wait_for(&self, image_name: impl Into<String>) -> DiveWait {
        let state = if self.attempts == 0 {
            PollState::TimedOut { attempts: 0 }
        } else {
            PollState::Waiting { attempt: 0 }
        };
        DiveWait {
            poller: self.clone(),
            image_name: image_name.into(),
            attempts_made: 0,
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// `attempt` checks done so far, none matched.
    Waiting { attempt: u32 },
    Found(DiveFile),
    TimedOut { attempts: u32 },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Found(DiveFile),
    TimedOut { attempts: u32 },
}

/// One wait for one image's dive file.
///
/// Each [`tick`](Self::tick) sleeps one interval and then checks once. The
/// only way to stop early is to stop calling it.
#[derive(Debug)]
pub struct DiveWait {
    poller: DivePoller,
    image_name: String,
    attempts_made: u32,
    state: PollState,
}

impl DiveWait {
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.poller.attempts
    }

    /// Sleep, then check once. A no-op once the wait is over.
    pub async fn tick(&mut self) -> PollState {
        if self.state.is_terminal() {
            return self.state.clone();
        }

        tokio::time::sleep(self.poller.interval).await;
        self.attempts_made += 1;

        self.state = match self.check() {
            Some(file) => PollState::Found(file),
            None if self.attempts_made >= self.poller.attempts => PollState::TimedOut {
                attempts: self.attempts_made,
            },
            None => PollState::Waiting {
                attempt: self.attempts_made,
            },
        };
        self.state.clone()
    }

    /// Tick until the file shows up or the attempt budget runs out.
    pub async fn run(mut self) -> PollOutcome {
        loop {
            match self.tick().await {
                PollState::Waiting { .. } => continue,
                PollState::Found(file) => return PollOutcome::Found(file),
                PollState::TimedOut { attempts } => return PollOutcome::TimedOut { attempts },
            }
        }
    }

    fn check(&self) -> Option<DiveFile> {
        match find_most_recent_dive_file(&self.poller.dir, &self.image_name) {
            Ok(Some(file)) => {
                debug!(path = %file.path.display(), size = file.size, "dive file found");
                Some(file)
            }
            Ok(None) => {
                debug!(
                    image = %self.image_name,
                    attempt = self.attempts_made,
                    "no dive file yet"
                );
                None
            }
            Err(err) => {
                warn!(dir = %self.poller.dir.display(), error = %err, "could not read dive results directory");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn touch(dir: &Path, name: &str, body: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        path
    }

    fn ago(secs: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(secs)
    }

    #[test]
    fn normalizes_image_names() {
        assert_eq!(normalize_image_name("nginx:latest"), "nginx-latest-nohash");
        assert_eq!(
            normalize_image_name("ghcr.io/org/app:1.0"),
            "ghcr.io-org-app-1.0-nohash"
        );
        assert_eq!(normalize_image_name("nginx-latest-nohash"), "nginx-latest-nohash");
    }

    #[test]
    fn picks_newest_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "nginx-latest-nohash-dive.json", "{}", ago(120));
        let newer = touch(dir.path(), "nginx-latest-nohash-dive-v2-dive.json", "{\"v\":2}", ago(5));

        let found = find_most_recent_dive_file(dir.path(), "nginx-latest-nohash")
            .unwrap()
            .unwrap();
        assert_eq!(found.path, newer);
        assert_eq!(found.size, 7);
    }

    #[test]
    fn ignores_other_images_and_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "alpine-3.20-nohash-dive.json", "{}", ago(1));
        touch(dir.path(), "nginx-latest-nohash-trufflehog.json", "[]", ago(1));
        fs::create_dir(dir.path().join("nginx-latest-nohash-old-dive.json")).unwrap();

        assert_eq!(find_most_recent_dive_file(dir.path(), "nginx-latest-nohash").unwrap(), None);
        assert_eq!(
            list_dive_files(dir.path()).unwrap(),
            vec!["alpine-3.20-nohash-dive.json".to_string()]
        );
    }

    #[test]
    fn missing_directory_has_no_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("dive-results");
        assert_eq!(find_most_recent_dive_file(&missing, "nginx-latest-nohash").unwrap(), None);
        assert!(list_dive_files(&missing).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_attempt_budget() {
        let dir = tempfile::tempdir().unwrap();
        let poller = DivePoller::new(dir.path().join("dive-results"));
        assert_eq!(poller.budget(), Duration::from_secs(180));

        let start = tokio::time::Instant::now();
        let outcome = poller.wait_for("nginx-latest-nohash").run().await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 18 });
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(180), "waited {waited:?}");
        assert!(waited < Duration::from_secs(190), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn finds_file_that_appears_mid_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut wait = DivePoller::new(dir.path()).wait_for("redis-7-nohash");

        assert_eq!(wait.tick().await, PollState::Waiting { attempt: 1 });
        assert_eq!(wait.tick().await, PollState::Waiting { attempt: 2 });

        let path = touch(dir.path(), "redis-7-nohash-dive.json", "{\"layer\":[]}", ago(0));
        let PollState::Found(file) = wait.tick().await else {
            panic!("expected the file to be found");
        };
        assert_eq!(file.path, path);

        // terminal states stick
        assert!(wait.tick().await.is_terminal());
        assert!(matches!(wait.state(), PollState::Found(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_times_out_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = DivePoller::new(dir.path())
            .with_attempts(0)
            .wait_for("x-nohash")
            .run()
            .await;
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 0 });
    }
}
