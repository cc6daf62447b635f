//! Pin targets, observed pin records and the signed manifest wire format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration-time description of a host to probe.
///
/// `file` groups pins into one manifest; many targets may share a file.
/// Empty `file` / `domain_name` are filled in from the FQDN during config
/// normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinTarget {
    /// DNS name to probe; also the TLS SNI and the registry key
    pub fqdn: String,

    /// Manifest filename this pin belongs to (default `"{fqdn}.json"`)
    #[serde(default)]
    pub file: String,

    /// Display label for the covered namespace (default `"*.{fqdn}"`)
    #[serde(default)]
    pub domain_name: String,
}

impl PinTarget {
    /// Fill in the defaults derived from the FQDN.
    pub fn normalize(&mut self) {
        if self.file.is_empty() {
            self.file = format!("{}.json", self.fqdn);
        }
        if self.domain_name.is_empty() {
            self.domain_name = format!("*.{}", self.fqdn);
        }
    }

    /// Seed the initial registry record for this target.
    ///
    /// `key` and `date` stay empty until the first successful probe.
    pub fn into_record(self) -> PinRecord {
        PinRecord {
            fqdn: self.fqdn,
            file: self.file,
            domain_name: self.domain_name,
            ..PinRecord::default()
        }
    }
}

/// One observed pin for an FQDN.
///
/// Wire names are fixed: `domainName` is camelCase, everything else is
/// snake_case, and empty/zero fields are omitted entirely.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PinRecord {
    /// Process UUID, used by multi-tenant backends to scope rows
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,

    /// Timestamp of the last probe attempt; `None` until the worker has
    /// produced an observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,

    /// Display label for the covered namespace
    #[serde(
        rename = "domainName",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub domain_name: String,

    /// Seconds until the probed certificate's notAfter at observation time;
    /// negative for already-expired certificates
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expire: i64,

    /// Manifest filename this pin belongs to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,

    /// DNS name this pin was observed for
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fqdn: String,

    /// Base64 of SHA-256 over the DER encoding of the server's SPKI;
    /// empty iff never successfully probed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    /// Most recent probe failure message; empty on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Collection of pin records for one manifest file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileKeys {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<PinRecord>,
}

/// The signed manifest served to clients: a payload of pin records plus a
/// detached signature over the payload's canonical JSON form
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileStructure {
    #[serde(default)]
    pub payload: FileKeys,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_target_normalize_defaults() {
        let mut target = PinTarget {
            fqdn: "example.com".into(),
            file: String::new(),
            domain_name: String::new(),
        };
        target.normalize();

        assert_eq!(target.file, "example.com.json");
        assert_eq!(target.domain_name, "*.example.com");
    }

    #[test]
    fn test_target_normalize_keeps_explicit_values() {
        let mut target = PinTarget {
            fqdn: "example.com".into(),
            file: "shared.json".into(),
            domain_name: "example.com and friends".into(),
        };
        target.normalize();

        assert_eq!(target.file, "shared.json");
        assert_eq!(target.domain_name, "example.com and friends");
    }

    #[test]
    fn test_record_wire_names() {
        let record = PinRecord {
            app_id: "app-1".into(),
            date: Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
            domain_name: "*.example.com".into(),
            expire: 3600,
            file: "example.com.json".into(),
            fqdn: "example.com".into(),
            key: "abc=".into(),
            last_error: String::new(),
        };

        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();

        assert!(obj.contains_key("app_id"));
        assert!(obj.contains_key("domainName"));
        assert!(!obj.contains_key("last_error")); // empty, omitted
        assert_eq!(obj["expire"], 3600);
        assert_eq!(obj["fqdn"], "example.com");
    }

    #[test]
    fn test_record_empty_fields_omitted() {
        let record = PinRecord::default();
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn test_record_negative_expire_survives() {
        let record = PinRecord {
            fqdn: "expired.example".into(),
            expire: -120,
            ..PinRecord::default()
        };

        let json = serde_json::to_string(&record).unwrap();
        let restored: PinRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.expire, -120);
    }

    #[test]
    fn test_file_structure_roundtrip() {
        let fs = FileStructure {
            payload: FileKeys {
                keys: vec![PinRecord {
                    fqdn: "a.test".into(),
                    key: "k=".into(),
                    expire: 10,
                    ..PinRecord::default()
                }],
            },
            signature: "c2ln".into(),
        };

        let json = serde_json::to_string(&fs).unwrap();
        let restored: FileStructure = serde_json::from_str(&json).unwrap();

        assert_eq!(fs, restored);
    }
}
