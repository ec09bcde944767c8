//! Ambient, in-process configuration for an [`crate::aggregator::Aggregator`]. Parsing
//! an external configuration file or key/value tree is out of scope for this crate;
//! an embedding application constructs this value itself and may still use `serde` to
//! deserialize it from whatever format it likes.

use crate::stability::StabilityProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// The `2^n - 2` ceiling above which [`crate::bandwidth::BandwidthFunction::tabulate`]
    /// refuses to materialise a dense table and returns its input unchanged.
    pub tabulation_threshold: usize,
    /// How long a child service may go without replying to `release` before it's
    /// considered lost.
    #[serde(with = "duration_millis")]
    pub child_grace_period: Duration,
    /// `(threshold, duration)` pairs fed to the planner's stability detector.
    pub stability_profiles: Vec<StabilityProfile>,
    /// Per-sample decay factor, in `(0, 1)`, for the stability detector's envelope.
    pub stability_decay: f64,
    /// Worker thread count for child-service composition; `None` defers to
    /// `num_cpus::get()`.
    pub worker_threads: Option<usize>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            tabulation_threshold: 4096,
            child_grace_period: Duration::from_secs(30),
            stability_profiles: vec![
                StabilityProfile::new(1.0, 10),
                StabilityProfile::new(0.1, 50),
            ],
            stability_decay: 0.5,
            worker_threads: None,
        }
    }
}

impl AggregatorConfig {
    /// The configured worker thread count, falling back to the machine's core count.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let cfg = AggregatorConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: AggregatorConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.tabulation_threshold, cfg.tabulation_threshold);
        assert_eq!(back.child_grace_period, cfg.child_grace_period);
    }
}
