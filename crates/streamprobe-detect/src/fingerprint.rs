//! Deterministic anomaly fingerprints.
//!
//! A fingerprint is the SHA-256 of `type|endpoint|bucket|category`. Latency
//! only contributes through a coarse bucket, and only for latency-sensitive
//! types, so every failure of one class against one endpoint lands on the
//! same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use streamprobe_core::ErrorCategory;

use crate::classify::AnomalyType;

/// Bucket used by types whose latency does not distinguish signatures.
pub const FIXED_BUCKET: &str = "any";

const BUCKETS: [(f64, &str); 6] = [
    (100.0, "lt100ms"),
    (250.0, "100-250ms"),
    (500.0, "250-500ms"),
    (1_000.0, "500ms-1s"),
    (2_500.0, "1-2.5s"),
    (5_000.0, "2.5-5s"),
];

/// Returns the coarse latency bucket for an anomaly.
#[must_use]
pub fn latency_bucket(anomaly_type: AnomalyType, latency_ms: f64) -> &'static str {
    if !anomaly_type.is_latency_sensitive() {
        return FIXED_BUCKET;
    }
    BUCKETS
        .iter()
        .find(|(upper, _)| latency_ms < *upper)
        .map_or("gte5s", |(_, name)| *name)
}

/// Hex-encoded SHA-256 fingerprint of an anomaly class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of an anomaly.
    #[must_use]
    pub fn compute(
        anomaly_type: AnomalyType,
        endpoint: &str,
        latency_ms: f64,
        category: Option<ErrorCategory>,
    ) -> Self {
        let bucket = latency_bucket(anomaly_type, latency_ms);
        let category = category.map_or("none", |c| c.as_str());
        let input = format!("{anomaly_type}|{endpoint}|{bucket}|{category}");

        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
