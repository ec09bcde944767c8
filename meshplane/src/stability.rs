//! Signal stability detection, used by the planner to terminate iterative pruning and
//! by services to smooth bandwidth reports.

use serde::{Deserialize, Serialize};

/// One `(threshold, duration)` pair: the detector reports stability once the tracked
/// envelope gap has stayed below `threshold` for at least `duration` consecutive
/// samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityProfile {
    /// The envelope-gap ceiling this profile watches for.
    pub threshold: f64,
    /// Consecutive samples the gap must stay below `threshold` for.
    pub duration: usize,
}

impl StabilityProfile {
    /// Build a profile.
    pub fn new(threshold: f64, duration: usize) -> Self {
        StabilityProfile { threshold, duration }
    }
}

#[derive(Debug, Clone, Copy)]
struct Envelope {
    upper: f64,
    lower: f64,
    decay: f64,
}

impl Envelope {
    fn new(decay: f64, first: f64) -> Self {
        Envelope { upper: first, lower: first, decay }
    }

    /// Decay the envelope toward `sample`, resetting on a strict outlier (a sample
    /// further from both bounds than their current span).
    fn update(&mut self, sample: f64) {
        let span = (self.upper - self.lower).max(f64::EPSILON);
        if sample > self.upper + span || sample < self.lower - span {
            self.upper = sample;
            self.lower = sample;
            return;
        }
        self.upper = self.upper + (sample - self.upper) * (1.0 - self.decay);
        self.lower = self.lower + (sample - self.lower) * (1.0 - self.decay);
        if sample > self.upper {
            self.upper = sample;
        }
        if sample < self.lower {
            self.lower = sample;
        }
    }

    fn gap(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Tracks a scalar signal and reports stability once any of its configured
/// `(threshold, duration)` profiles has been satisfied for long enough.
#[derive(Debug, Clone)]
pub struct StabilityDetector {
    profiles: Vec<StabilityProfile>,
    decay: f64,
    envelope: Option<Envelope>,
    /// Per-profile count of consecutive samples under threshold.
    counters: Vec<usize>,
}

impl StabilityDetector {
    /// Build a detector. `decay` is the per-sample decay factor in `(0, 1)` applied to
    /// both envelope bounds.
    pub fn new(profiles: Vec<StabilityProfile>, decay: f64) -> Self {
        let counters = vec![0; profiles.len()];
        StabilityDetector { profiles, decay, envelope: None, counters }
    }

    /// Feed one new sample.
    pub fn sample(&mut self, value: f64) {
        match &mut self.envelope {
            Some(env) => env.update(value),
            None => self.envelope = Some(Envelope::new(self.decay, value)),
        }
        let gap = self.envelope.as_ref().map(|e| e.gap()).unwrap_or(0.0);
        for (profile, counter) in self.profiles.iter().zip(self.counters.iter_mut()) {
            if gap < profile.threshold {
                *counter += 1;
            } else {
                *counter = 0;
            }
        }
    }

    /// Whether any profile has seen its threshold held for its required duration.
    pub fn is_stable(&self) -> bool {
        self.profiles.iter().zip(&self.counters).any(|(p, c)| *c >= p.duration)
    }

    /// Reset all counters and the tracked envelope, e.g. between independent planning
    /// runs.
    pub fn reset(&mut self) {
        self.envelope = None;
        for c in self.counters.iter_mut() {
            *c = 0;
        }
    }
}
