//! Plain JSON files as the last-resort copy of a report.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::PersistError;

/// Owner read/write, everyone else read.
#[cfg(unix)]
const REPORT_MODE: u32 = 0o644;

/// Write `payload` to `path` as indented JSON, creating or truncating the file.
pub fn write_report<T: Serialize + ?Sized>(payload: &T, path: &Path, what: &'static str) -> Result<(), PersistError> {
    let data = serde_json::to_vec_pretty(payload).map_err(|source| PersistError::Serialization { what, source })?;
    write_bytes(&data, path)?;
    info!(path = %path.display(), report = what, "report saved to file");
    Ok(())
}

/// Read a report a scanner already wrote, if there is one.
pub fn read_document(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(doc) => {
            debug!(path = %path.display(), size = doc.len(), "read complete report JSON file");
            Some(doc)
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no readable report file, using payload");
            None
        }
    }
}

fn write_bytes(data: &[u8], path: &Path) -> Result<(), PersistError> {
    let wrap = |source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(REPORT_MODE);
    }

    let mut file = opts.open(path).map_err(wrap)?;
    file.write_all(data).map_err(wrap)?;
    file.flush().map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::DiveResult;

    #[test]
    fn writes_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        write_report(&DiveResult::default(), &path, "dive result").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"layer\""), "not indented: {text}");
        let back: DiveResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, DiveResult::default());
    }

    #[test]
    fn truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        fs::write(&path, "x".repeat(4096)).unwrap();

        write_report(&Vec::<u8>::new(), &path, "trufflehog results").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[cfg(unix)]
    #[test]
    fn new_files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&DiveResult::default(), &path, "dive result").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        // umask may only take bits away
        assert_eq!(mode & !0o644, 0);
        assert_ne!(mode & 0o600, 0);
    }

    #[test]
    fn missing_parent_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");

        let err = write_report(&Vec::<u8>::new(), &path, "trufflehog results").unwrap_err();
        assert!(matches!(err, PersistError::Write { path: p, .. } if p == path));
    }

    #[test]
    fn unreadable_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_document(&dir.path().join("absent.json")), None);
        // a directory is not a readable document either
        assert_eq!(read_document(dir.path()), None);
    }
}
