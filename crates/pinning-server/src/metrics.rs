//! Pinning metrics
//!
//! A custom Prometheus collector with two gauge families:
//! - `ssl_pinning_errors{file}`: probe errors accumulated since the last
//!   scrape; zeroed after being emitted during collection
//! - `ssl_pinning_expire{key,fqdn}`: the most recently observed seconds
//!   until certificate expiry for a pin
//!
//! The collector is registered on an injected `prometheus::Registry` so
//! tests can instantiate fresh ones.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};

const ERRORS_NAME: &str = "ssl_pinning_errors";
const ERRORS_HELP: &str = "Number of pinning validation errors per file";
const EXPIRE_NAME: &str = "ssl_pinning_expire";
const EXPIRE_HELP: &str = "Certificate expiration timestamp or seconds until expiry";

/// Composite key for certificate expiration metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpireItem {
    pub key: String,
    pub fqdn: String,
}

/// Tracks SSL pinning metrics; cheap to clone, all clones share state.
#[derive(Debug, Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    descs: Vec<Desc>,
    errors: RwLock<HashMap<String, f64>>,
    expires: RwLock<HashMap<ExpireItem, f64>>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        let descs = vec![
            Desc::new(
                ERRORS_NAME.into(),
                ERRORS_HELP.into(),
                vec!["file".into()],
                HashMap::new(),
            )
            .expect("static metric description"),
            Desc::new(
                EXPIRE_NAME.into(),
                EXPIRE_HELP.into(),
                vec!["key".into(), "fqdn".into()],
                HashMap::new(),
            )
            .expect("static metric description"),
        ];

        Self {
            inner: Arc::new(Inner {
                descs,
                errors: RwLock::new(HashMap::new()),
                expires: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Count one failed probe for the file.
    pub fn inc_error(&self, file: &str) {
        let mut errors = self.inner.errors.write().unwrap();
        *errors.entry(file.to_string()).or_insert(0.0) += 1.0;
    }

    /// Zero the error counter for the file.
    pub fn clear_error(&self, file: &str) {
        let mut errors = self.inner.errors.write().unwrap();
        errors.insert(file.to_string(), 0.0);
    }

    /// Record the latest observed expiry for a (pin, FQDN).
    pub fn set_expire(&self, key: &str, fqdn: &str, expire: f64) {
        let mut expires = self.inner.expires.write().unwrap();
        expires.insert(
            ExpireItem {
                key: key.to_string(),
                fqdn: fqdn.to_string(),
            },
            expire,
        );
    }

    /// Drop the expiry gauge for a (pin, FQDN).
    pub fn clear_expire(&self, key: &str, fqdn: &str) {
        let mut expires = self.inner.expires.write().unwrap();
        expires.remove(&ExpireItem {
            key: key.to_string(),
            fqdn: fqdn.to_string(),
        });
    }
}

impl PromCollector for Collector {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();

        {
            // Error counts reset to zero once they have been emitted.
            let mut errors = self.inner.errors.write().unwrap();

            let vec = GaugeVec::new(Opts::new(ERRORS_NAME, ERRORS_HELP), &["file"])
                .expect("static metric description");
            for (file, count) in errors.iter() {
                vec.with_label_values(&[file]).set(*count);
            }
            families.extend(vec.collect());

            for count in errors.values_mut() {
                *count = 0.0;
            }
        }

        {
            let expires = self.inner.expires.read().unwrap();

            let vec = GaugeVec::new(Opts::new(EXPIRE_NAME, EXPIRE_HELP), &["key", "fqdn"])
                .expect("static metric description");
            for (item, expire) in expires.iter() {
                vec.with_label_values(&[&item.key, &item.fqdn]).set(*expire);
            }
            families.extend(vec.collect());
        }

        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge_value(families: &[MetricFamily], name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        families
            .iter()
            .find(|f| f.get_name() == name)?
            .get_metric()
            .iter()
            .find(|m| {
                labels.iter().all(|(k, v)| {
                    m.get_label()
                        .iter()
                        .any(|l| l.get_name() == *k && l.get_value() == *v)
                })
            })
            .map(|m| m.get_gauge().get_value())
    }

    #[test]
    fn test_inc_and_collect_errors() {
        let collector = Collector::new();

        collector.inc_error("f.json");
        collector.inc_error("f.json");

        let families = collector.collect();
        assert_eq!(
            gauge_value(&families, "ssl_pinning_errors", &[("file", "f.json")]),
            Some(2.0)
        );
    }

    #[test]
    fn test_errors_reset_after_scrape() {
        let collector = Collector::new();

        collector.inc_error("f.json");
        let _ = collector.collect();

        let families = collector.collect();
        assert_eq!(
            gauge_value(&families, "ssl_pinning_errors", &[("file", "f.json")]),
            Some(0.0)
        );
    }

    #[test]
    fn test_clear_error_zeroes_counter() {
        let collector = Collector::new();

        collector.inc_error("f.json");
        collector.clear_error("f.json");

        let families = collector.collect();
        assert_eq!(
            gauge_value(&families, "ssl_pinning_errors", &[("file", "f.json")]),
            Some(0.0)
        );
    }

    #[test]
    fn test_set_and_clear_expire() {
        let collector = Collector::new();

        collector.set_expire("pin=", "a.test", 3600.0);

        let families = collector.collect();
        assert_eq!(
            gauge_value(
                &families,
                "ssl_pinning_expire",
                &[("key", "pin="), ("fqdn", "a.test")]
            ),
            Some(3600.0)
        );

        collector.clear_expire("pin=", "a.test");

        let families = collector.collect();
        assert_eq!(
            gauge_value(
                &families,
                "ssl_pinning_expire",
                &[("key", "pin="), ("fqdn", "a.test")]
            ),
            None
        );
    }

    #[test]
    fn test_expire_survives_scrape() {
        let collector = Collector::new();

        collector.set_expire("pin=", "a.test", 100.0);
        let _ = collector.collect();

        let families = collector.collect();
        assert_eq!(
            gauge_value(
                &families,
                "ssl_pinning_expire",
                &[("key", "pin="), ("fqdn", "a.test")]
            ),
            Some(100.0)
        );
    }

    #[test]
    fn test_registers_on_fresh_registry() {
        let registry = prometheus::Registry::new();
        let collector = Collector::new();

        registry.register(Box::new(collector.clone())).unwrap();
        collector.set_expire("pin=", "a.test", 1.0);

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "ssl_pinning_expire"));
    }
}
