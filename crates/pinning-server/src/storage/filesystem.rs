//! Filesystem storage backend
//!
//! Pins are persisted as complete signed manifests, one file per manifest
//! name, under an owner-only dump directory. Writes go through a temp file
//! plus fsync plus rename, so a reader never observes a partial manifest.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pinning_core::{signed_keys, FileStructure, PinRecord, Signer};
use tempfile::NamedTempFile;
use tracing::{debug, error};

use super::{FileQuery, PinStore, ProbeReport, StorageError, FRESHNESS_WINDOW};

/// Filesystem pin store: signed manifest per file under `dump_dir`.
pub struct FilesystemStore {
    app_id: String,
    dump_dir: PathBuf,
    signer: Arc<Signer>,
}

impl std::fmt::Debug for FilesystemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemStore")
            .field("app_id", &self.app_id)
            .field("dump_dir", &self.dump_dir)
            .finish()
    }
}

impl FilesystemStore {
    /// Create the store, ensuring `dump_dir` exists with owner-only
    /// permissions.
    pub fn new(
        dump_dir: PathBuf,
        app_id: String,
        signer: Arc<Signer>,
    ) -> Result<Self, StorageError> {
        create_private_dir(&dump_dir).map_err(|err| {
            StorageError::Connection(format!(
                "failed to create dump directory {}: {err}",
                dump_dir.display()
            ))
        })?;

        Ok(Self {
            app_id,
            dump_dir,
            signer,
        })
    }

    /// Write manifest bytes atomically: temp file in the same directory,
    /// fsync, then rename over the destination.
    fn save_file(&self, file: &str, data: &[u8]) -> Result<(), StorageError> {
        let dest = self.dump_dir.join(file);

        let mut tmp = NamedTempFile::with_prefix_in(format!(".{file}.tmp-"), &self.dump_dir)
            .map_err(|err| StorageError::Database(format!("create temp file: {err}")))?;

        tmp.write_all(data)
            .map_err(|err| StorageError::Database(format!("write temp file: {err}")))?;

        tmp.as_file()
            .sync_all()
            .map_err(|err| StorageError::Database(format!("fsync temp file: {err}")))?;

        tmp.persist(&dest)
            .map_err(|err| StorageError::Database(format!("rename to {}: {err}", dest.display())))?;

        Ok(())
    }
}

#[async_trait]
impl PinStore for FilesystemStore {
    /// Groups records by manifest file, signs each group and writes it
    /// atomically. Per-file failures are aggregated; one broken file does
    /// not stop the others.
    async fn save_keys(&self, keys: &HashMap<String, PinRecord>) -> Result<(), StorageError> {
        let mut errs = Vec::new();

        let mut files: HashMap<String, Vec<PinRecord>> = HashMap::new();
        for record in keys.values() {
            if record.key.is_empty() {
                errs.push(format!(
                    "empty key for fqdn={:?} domain={:?} file={:?}",
                    record.fqdn, record.domain_name, record.file
                ));
                continue;
            }

            let mut copy = record.clone();
            let file = std::mem::take(&mut copy.file);
            files.entry(file).or_default().push(copy);
        }

        for (file, records) in files {
            let data = match signed_keys(&file, records, &self.signer) {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(err) => {
                    error!(file = %file, error = %err, "failed signing keys");
                    errs.push(format!("failed signing keys for file {file}: {err}"));
                    continue;
                }
            };

            if let Err(err) = self.save_file(&file, &data) {
                error!(file = %file, error = %err, "failed to save file");
                errs.push(format!("failed to save file {file}: {err}"));
            }
        }

        if !errs.is_empty() {
            return Err(StorageError::Partial(errs.join("; ")));
        }

        Ok(())
    }

    /// Returns the stored manifest bytes verbatim.
    async fn get_by_file(&self, file: &str) -> Result<FileQuery, StorageError> {
        match std::fs::read(self.dump_dir.join(file)) {
            Ok(data) => Ok(FileQuery::Raw(data)),
            Err(err) => {
                debug!(file = %file, error = %err, "manifest file not readable");
                Err(StorageError::NotFound(file.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Ready when the dump directory holds at least one manifest written
    /// within the freshness window.
    async fn probe_readiness(&self) -> ProbeReport {
        let now = std::time::SystemTime::now();
        let mut report = ProbeReport::ok();

        let entries = match std::fs::read_dir(&self.dump_dir) {
            Ok(entries) => entries.flatten().collect::<Vec<_>>(),
            Err(err) => {
                report.push(format!(
                    "failed to read dump dir {:?}: {err}",
                    self.dump_dir
                ));
                return report;
            }
        };

        if entries.is_empty() {
            report.push("no dump files found");
            return report;
        }

        for entry in entries {
            let fresh = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age < FRESHNESS_WINDOW);

            match fresh {
                Some(true) => {}
                _ => report.push(format!(
                    "no dump files newer than {:?}",
                    FRESHNESS_WINDOW
                )),
            }
        }

        report
    }

    /// Alive when every manifest parses, no persisted key carries an error,
    /// and at least one key is fresh.
    async fn probe_liveness(&self) -> ProbeReport {
        let now = Utc::now();
        let mut report = ProbeReport::ok();
        let mut fresh = 0usize;

        let entries = match std::fs::read_dir(&self.dump_dir) {
            Ok(entries) => entries.flatten().collect::<Vec<_>>(),
            Err(err) => {
                report.push(format!(
                    "failed to read dump dir {:?}: {err}",
                    self.dump_dir
                ));
                return report;
            }
        };

        if entries.is_empty() {
            report.push("no dump files found");
            return report;
        }

        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let raw = match std::fs::read(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    report.push(format!("failed to read file {:?}: {err}", path));
                    continue;
                }
            };

            let data: FileStructure = match serde_json::from_slice(&raw) {
                Ok(data) => data,
                Err(err) => {
                    report.push(format!("failed to unmarshal file {:?}: {err}", path));
                    continue;
                }
            };

            if data.payload.keys.is_empty() {
                report.push(format!(
                    "no keys in file ({})",
                    entry.file_name().to_string_lossy()
                ));
                continue;
            }

            for k in &data.payload.keys {
                if !k.last_error.is_empty() {
                    report.push(format!(
                        "key for {} ({}) has last_error: {}",
                        k.fqdn, k.domain_name, k.last_error
                    ));
                    continue;
                }

                let Some(age) = super::age_of(k.date.as_ref(), now) else {
                    report.push(format!(
                        "missing date for key {} ({})",
                        k.fqdn, k.domain_name
                    ));
                    continue;
                };

                if age >= FRESHNESS_WINDOW {
                    report.push(format!(
                        "key for {} ({}) appears stale (age={:?} >= {:?})",
                        k.fqdn, k.domain_name, age, FRESHNESS_WINDOW
                    ));
                    continue;
                }

                fresh += 1;
            }
        }

        if fresh == 0 {
            report.push("no fresh keys found");
        }

        report
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
