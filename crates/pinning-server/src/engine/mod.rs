//! Pinning engine
//!
//! Owns the live pin registry and one probe worker per configured FQDN.
//! Each worker probes its host once per second and is the sole writer for
//! its registry entry; readers take read-lock snapshots. A separate flush
//! ticker periodically hands a snapshot to the persistence callback.
//!
//! Cancelling the engine's root token stops every worker and the flush
//! task after their current tick.

pub mod probe;

pub use probe::{Observation, ProbeError, Prober};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use pinning_core::{PinRecord, PinTarget};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::Collector;

/// Engine tuning knobs, from the `tls.*` configuration surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each TLS dial + handshake
    pub probe_timeout: Duration,
    /// Cadence of registry snapshots pushed to storage
    pub flush_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Per-FQDN probe workers plus the shared pin registry.
#[derive(Debug)]
pub struct PinningEngine {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    flush_interval: Duration,
}

#[derive(Debug)]
struct Inner {
    registry: RwLock<HashMap<String, PinRecord>>,
    workers: Mutex<HashMap<String, CancellationToken>>,
    collector: Collector,
    prober: Prober,
}

impl PinningEngine {
    /// Build the engine and spawn one worker per target.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(targets: Vec<PinTarget>, collector: Collector, config: EngineConfig) -> Self {
        let engine = Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                collector,
                prober: Prober::new(config.probe_timeout),
            }),
            cancel: CancellationToken::new(),
            flush_interval: config.flush_interval,
        };

        for target in targets {
            engine.add_target(target.into_record());
        }

        engine
    }

    /// Store the initial record and spawn this FQDN's worker. Adding the
    /// same FQDN again only updates the record; there is never more than
    /// one worker per FQDN.
    pub fn add_target(&self, record: PinRecord) {
        let fqdn = record.fqdn.clone();
        self.inner.set(&fqdn, record);

        let mut workers = self.inner.workers.lock().unwrap();
        if workers.contains_key(&fqdn) {
            return;
        }

        let child = self.cancel.child_token();
        workers.insert(fqdn.clone(), child.clone());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.worker(fqdn, child).await;
        });
    }

    /// Current registry entry for an FQDN.
    pub fn get(&self, fqdn: &str) -> Option<PinRecord> {
        self.inner.get(fqdn)
    }

    /// Point-in-time copy of all registry entries.
    pub fn snapshot(&self) -> HashMap<String, PinRecord> {
        self.inner.registry.read().unwrap().clone()
    }

    /// Spawn the flush ticker. Each tick snapshots the registry and hands
    /// it to the callback; callback errors are logged, never propagated,
    /// since the next tick retries with fresh data.
    pub fn start_periodic_flush<F, Fut, E>(&self, flush: F) -> JoinHandle<()>
    where
        F: Fn(HashMap<String, PinRecord>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
        E: std::fmt::Display,
    {
        info!(interval = ?self.flush_interval, "starting periodic flush");

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let interval = self.flush_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the immediate first tick would flush an empty registry
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("stopping periodic flush");
                        return;
                    }
                    _ = ticker.tick() => {
                        let list = inner.registry.read().unwrap().clone();
                        debug!(keys_count = list.len(), "flushing keys to storage");

                        if let Err(err) = flush(list).await {
                            error!(error = %err, "failed to flush keys");
                        }
                    }
                }
            }
        })
    }

    /// Stop every worker and the flush task after their current tick.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Inner {
    fn set(&self, fqdn: &str, record: PinRecord) {
        debug!(fqdn = %fqdn, "set key");
        self.registry
            .write()
            .unwrap()
            .insert(fqdn.to_string(), record);
    }

    fn get(&self, fqdn: &str) -> Option<PinRecord> {
        self.registry.read().unwrap().get(fqdn).cloned()
    }

    /// One worker per FQDN, probing at 1 Hz until cancelled.
    async fn worker(self: Arc<Self>, fqdn: String, cancel: CancellationToken) {
        info!(fqdn = %fqdn, "starting key worker");

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(fqdn = %fqdn, "key worker stopping");
                    return;
                }
                _ = ticker.tick() => self.tick(&fqdn).await,
            }
        }
    }

    /// One probe: read-copy the entry, stamp the attempt time, probe, fold
    /// the result back in under the write lock.
    async fn tick(&self, fqdn: &str) {
        let Some(mut record) = self.get(fqdn) else {
            return;
        };

        record.date = Some(Utc::now());

        match self.prober.probe(fqdn).await {
            Ok(observation) => {
                record.expire = observation.expire;
                record.key = observation.key;
                record.last_error.clear();

                self.collector
                    .set_expire(&record.key, fqdn, record.expire as f64);
                self.collector.clear_error(&record.file);
            }
            Err(err) => {
                error!(fqdn = %fqdn, error = %err, "failed to fetch domain key");

                record.last_error = err.to_string();
                self.collector.inc_error(&record.file);
            }
        }

        self.set(fqdn, record);

        debug!(fqdn = %fqdn, "updated domain key");
    }
}
