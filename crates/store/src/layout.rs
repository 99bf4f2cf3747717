//! On-disk layout of a store namespace.
//!
//! ```text
//! <root>/<namespace>/jobs/<id>.json
//! <root>/<namespace>/payloads/<id>
//! ```
//!
//! Every write goes to a dot-prefixed temp file in the same directory and is
//! renamed into place, so a crash never leaves a half-written record or blob.
//! Job ids cannot start with `.`, so temp files never collide with real ones.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::Context;

use upqueue_core::JobId;

use crate::error::JobStoreError;
use crate::types::Job;

const JOBS_DIR: &str = "jobs";
const PAYLOADS_DIR: &str = "payloads";
const RECORD_EXT: &str = "json";

/// Paths for one namespace.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    base: PathBuf,
    jobs: PathBuf,
    payloads: PathBuf,
}

impl StoreLayout {
    /// Resolve the layout for `namespace` under `root`.
    ///
    /// The namespace must be a single plain path component.
    pub fn new(root: &Path, namespace: &str) -> Result<Self, JobStoreError> {
        let mut components = Path::new(namespace).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !namespace.starts_with('.');
        if !valid {
            return Err(JobStoreError::InvalidNamespace(namespace.to_string()));
        }

        let base = root.join(namespace);
        Ok(Self {
            jobs: base.join(JOBS_DIR),
            payloads: base.join(PAYLOADS_DIR),
            base,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs
    }

    pub fn payloads_dir(&self) -> &Path {
        &self.payloads
    }

    /// Create both areas. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.jobs)?;
        fs::create_dir_all(&self.payloads)
    }

    pub fn record_path(&self, id: &JobId) -> PathBuf {
        self.jobs.join(format!("{id}.{RECORD_EXT}"))
    }

    pub fn payload_path(&self, id: &JobId) -> PathBuf {
        self.payloads.join(id.as_str())
    }

    pub fn write_record(&self, job: &Job) -> Result<(), JobStoreError> {
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| JobStoreError::serialization(&job.id, e))?;
        write_atomic(&self.jobs, &format!("{}.{RECORD_EXT}", job.id), &bytes)
            .map_err(|e| JobStoreError::io("write record", &job.id, e))
    }

    /// Remove a record file. A missing file is not an error.
    pub fn remove_record(&self, id: &JobId) -> Result<(), JobStoreError> {
        remove_if_exists(&self.record_path(id)).map_err(|e| JobStoreError::io("remove record", id, e))
    }

    pub fn write_payload(&self, id: &JobId, payload: &[u8]) -> Result<(), JobStoreError> {
        write_atomic(&self.payloads, id.as_str(), payload)
            .map_err(|e| JobStoreError::io("write payload", id, e))
    }

    /// Read a payload blob; `Ok(None)` if it does not exist.
    pub fn read_payload(&self, id: &JobId) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.payload_path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove a payload blob. A missing file is not an error.
    pub fn remove_payload(&self, id: &JobId) -> Result<(), JobStoreError> {
        remove_if_exists(&self.payload_path(id))
            .map_err(|e| JobStoreError::io("remove payload", id, e))
    }

    /// Paths of all record files. A missing jobs area yields an empty list.
    pub fn record_files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.jobs) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| n.starts_with('.'));
            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT);
            if is_record && !is_temp && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Load one record file, checking that it belongs to the file it sits in.
    pub fn read_record(&self, path: &Path) -> anyhow::Result<Job> {
        let bytes = fs::read(path).with_context(|| format!("failed to read job record {path:?}"))?;
        let job: Job = serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid job record {path:?}"))?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        anyhow::ensure!(
            stem == job.id.as_str(),
            "job record {path:?} holds id {:?}",
            job.id.as_str()
        );
        Ok(job)
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".{name}.tmp"));
    let target = dir.join(name);

    let written = write_then_rename(&tmp, &target, bytes);
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_then_rename(tmp: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, target)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn id(s: &str) -> JobId {
        JobId::new(s).unwrap()
    }

    #[test]
    fn rejects_bad_namespaces() {
        let root = Path::new("/tmp");
        for bad in ["", ".", "..", "a/b", ".hidden", "/abs"] {
            assert!(
                matches!(
                    StoreLayout::new(root, bad),
                    Err(JobStoreError::InvalidNamespace(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(StoreLayout::new(root, "uploads").is_ok());
    }

    #[test]
    fn missing_areas_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path(), "ns").unwrap();

        assert!(layout.record_files().unwrap().is_empty());
        assert_eq!(layout.read_payload(&id("a")).unwrap(), None);
        layout.remove_payload(&id("a")).unwrap();
        layout.remove_record(&id("a")).unwrap();
    }

    #[test]
    fn writes_leave_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path(), "ns").unwrap();
        let job = Job::new(id("a"), Utc::now());

        layout.write_payload(&job.id, b"bytes").unwrap();
        layout.write_record(&job).unwrap();

        let names: Vec<_> = fs::read_dir(layout.jobs_dir())
            .unwrap()
            .chain(fs::read_dir(layout.payloads_dir()).unwrap())
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with('.')), "{names:?}");
        assert_eq!(layout.read_payload(&job.id).unwrap().as_deref(), Some(&b"bytes"[..]));
    }

    #[test]
    fn record_must_match_file_name() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path(), "ns").unwrap();
        layout.ensure_dirs().unwrap();

        let job = Job::new(id("a"), Utc::now());
        let wrong = layout.jobs_dir().join("b.json");
        fs::write(&wrong, serde_json::to_vec(&job).unwrap()).unwrap();

        assert!(layout.read_record(&wrong).is_err());
    }

    #[test]
    fn temp_files_are_not_listed() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path(), "ns").unwrap();
        layout.ensure_dirs().unwrap();
        fs::write(layout.jobs_dir().join(".a.json.tmp"), b"{").unwrap();
        fs::write(layout.jobs_dir().join("notes.txt"), b"x").unwrap();

        assert!(layout.record_files().unwrap().is_empty());
    }
}
