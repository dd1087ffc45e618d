// ⏱️ Phase timing
//
// PhaseClock     - monotonic stopwatch, checkpoint() returns the time since the
//                  previous checkpoint (cumulative elapsed is kept alongside)
// PhaseTiming    - load / match / extract for one trial, total is derived
// AggregateTiming - arithmetic means over the trials of one config

use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};

// ============================================================================
// PHASE CLOCK
// ============================================================================

#[derive(Debug, Clone)]
pub struct PhaseClock {
    started: Instant,
    last_checkpoint: Duration,
}

impl PhaseClock {
    pub fn start() -> Self {
        PhaseClock {
            started: Instant::now(),
            last_checkpoint: Duration::ZERO,
        }
    }

    /// Cumulative time since `start()`
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Duration of the phase that just ended
    pub fn checkpoint(&mut self) -> Duration {
        let now = self.elapsed();
        let phase = now.saturating_sub(self.last_checkpoint);
        self.last_checkpoint = now;
        phase
    }
}

// ============================================================================
// PHASE TIMING
// ============================================================================

pub fn duration_ms(value: Duration) -> f64 {
    value.as_nanos() as f64 / 1_000_000.0
}

/// Mean in milliseconds; None for an empty slice
pub fn mean_ms(samples: &[Duration]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: u128 = samples.iter().map(Duration::as_nanos).sum();
    Some((sum as f64 / samples.len() as f64) / 1_000_000.0)
}

/// Per-phase durations of one successful trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseTiming {
    pub load: Duration,
    pub matching: Duration,
    pub extract: Duration,
}

impl PhaseTiming {
    pub fn new(load: Duration, matching: Duration, extract: Duration) -> Self {
        PhaseTiming {
            load,
            matching,
            extract,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Duration {
        self.load + self.matching + self.extract
    }
}

// Serialized in milliseconds, with the derived total included
#[derive(Serialize)]
struct PhaseTimingRecord {
    load_ms: f64,
    match_ms: f64,
    extract_ms: f64,
    total_ms: f64,
}

impl Serialize for PhaseTiming {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PhaseTimingRecord {
            load_ms: duration_ms(self.load),
            match_ms: duration_ms(self.matching),
            extract_ms: duration_ms(self.extract),
            total_ms: duration_ms(self.total()),
        }
        .serialize(serializer)
    }
}

// ============================================================================
// AGGREGATE TIMING
// ============================================================================

/// Mean of each phase (milliseconds) over the trials of one config
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AggregateTiming {
    pub trials: usize,
    pub load_ms: f64,
    pub match_ms: f64,
    pub extract_ms: f64,
    pub total_ms: f64,
}

impl AggregateTiming {
    /// Zero trials give an all-zero aggregate, never NaN
    pub fn from_trials(trials: &[PhaseTiming]) -> Self {
        if trials.is_empty() {
            return AggregateTiming::default();
        }

        let count = trials.len() as u128;
        let mean = |phase: fn(&PhaseTiming) -> Duration| -> f64 {
            let sum: u128 = trials.iter().map(|t| phase(t).as_nanos()).sum();
            (sum as f64 / count as f64) / 1_000_000.0
        };

        AggregateTiming {
            trials: trials.len(),
            load_ms: mean(|t| t.load),
            match_ms: mean(|t| t.matching),
            extract_ms: mean(|t| t.extract),
            total_ms: mean(|t| t.total()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
