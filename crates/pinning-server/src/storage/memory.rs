//! In-memory storage backend
//!
//! Default storage implementation using an in-memory map. Suitable for
//! development and single-instance deployments; data is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use pinning_core::PinRecord;
use tracing::debug;

use super::{FileQuery, PinStore, ProbeReport, StorageError, FRESHNESS_WINDOW};

/// In-memory pin store: one record per FQDN, replaced wholesale on save.
#[derive(Debug)]
pub struct MemoryStore {
    app_id: String,
    keys: RwLock<HashMap<String, PinRecord>>,
}

impl MemoryStore {
    pub fn new(app_id: String) -> Self {
        Self {
            app_id,
            keys: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PinStore for MemoryStore {
    /// Stores pins indexed by FQDN, replacing all existing entries in one
    /// atomic swap. Records with an empty `key` are reported but do not
    /// block the rest of the batch.
    async fn save_keys(&self, keys: &HashMap<String, PinRecord>) -> Result<(), StorageError> {
        let mut errs = Vec::new();

        let mut list = HashMap::with_capacity(keys.len());
        for record in keys.values() {
            if record.key.is_empty() {
                errs.push(format!(
                    "empty key for fqdn={:?} domain={:?} file={:?}",
                    record.fqdn, record.domain_name, record.file
                ));
                continue;
            }

            list.insert(record.fqdn.clone(), record.clone());
        }

        *self.keys.write().unwrap() = list;

        if !errs.is_empty() {
            return Err(StorageError::Partial(errs.join("; ")));
        }

        Ok(())
    }

    /// Returns every stored record for the file, clearing the redundant
    /// `file` field on the copies.
    async fn get_by_file(&self, file: &str) -> Result<FileQuery, StorageError> {
        let keys = self.keys.read().unwrap();

        let records: Vec<PinRecord> = keys
            .values()
            .filter(|k| !k.key.is_empty() && k.file == file)
            .map(|k| {
                let mut copy = k.clone();
                copy.file.clear();
                copy
            })
            .collect();

        Ok(FileQuery::Records(records))
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn probe_readiness(&self) -> ProbeReport {
        let mut report = ProbeReport::ok();
        let mut valid = 0usize;

        let keys = self.keys.read().unwrap();

        if keys.is_empty() {
            report.push("no keys in memory");
            return report;
        }

        for k in keys.values() {
            if k.key.is_empty() {
                report.push(format!(
                    "empty key for fqdn={:?} domain={:?} file={:?}",
                    k.fqdn, k.domain_name, k.file
                ));
                continue;
            }

            if k.date.is_none() {
                report.push(format!("missing date for key {} ({})", k.fqdn, k.domain_name));
                continue;
            }

            valid += 1;
        }

        if valid == 0 {
            report.push("no valid keys in memory");
        }

        if report.healthy() {
            debug!(app_id = %self.app_id, valid, "readiness: OK (memory)");
        }

        report
    }

    async fn probe_liveness(&self) -> ProbeReport {
        let now = Utc::now();
        let mut report = ProbeReport::ok();
        let mut fresh = 0usize;

        let keys = self.keys.read().unwrap();

        if keys.is_empty() {
            report.push("no keys in memory");
            return report;
        }

        for k in keys.values() {
            if k.key.is_empty() {
                report.push(format!(
                    "empty key for fqdn={:?} domain={:?} file={:?}",
                    k.fqdn, k.domain_name, k.file
                ));
                continue;
            }

            let Some(age) = super::age_of(k.date.as_ref(), now) else {
                report.push(format!("missing date for key {} ({})", k.fqdn, k.domain_name));
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

        if fresh == 0 {
            report.push("no fresh keys found in memory");
        }

        if report.healthy() {
            debug!(app_id = %self.app_id, fresh, "liveness: OK (memory)");
        }

        report
    }
}
