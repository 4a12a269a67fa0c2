#![deny(unsafe_op_in_unsafe_fn)]

//! Prime+Probe measurement protocol over an eviction ring.
//!
//! The flow is strictly sequential: build the ring, shuffle it once,
//! then for every round reset the stored latencies, prime, probe, and
//! append the probe's per-set values to the sample matrix. At the end
//! the matrix is handed to [`stats::aggregate`], which trims the
//! high-latency outliers and reduces each set's column to a robust
//! mean and variance. Interference from any concurrent workload on
//! the same cache sets is the signal being measured; it surfaces as
//! variance, never as an error.

pub mod probe;
pub mod stats;

use cache_timing::Clock;
use eviction_ring::{CacheGeometry, EvictionRing};
use serde::Serialize;
use thiserror::Error;

/// Runtime parameters of one measurement run.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MeasurementConfig {
    /// Cache sets covered by the ring (S).
    pub sets: usize,
    /// Associativity (W).
    pub ways: usize,
    /// Bytes per cache line.
    pub line_size: usize,
    /// Measurement rounds (N).
    pub rounds: usize,
    /// High-latency samples discarded per set (K).
    pub trim: usize,
}

impl Default for MeasurementConfig {
    /// Geometry of an 8-way 40KB L1d with 64-byte lines, measured
    /// over 1000 rounds with the top 200 samples trimmed.
    fn default() -> MeasurementConfig {
        MeasurementConfig {
            sets: 80,
            ways: 8,
            line_size: 64,
            rounds: 1000,
            trim: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("probe chunks are ways - 1 accesses long, need at least 2 ways (got {0})")]
    NotEnoughWays(usize),
    #[error("at least one measurement round is required")]
    NoRounds,
    #[error("cannot trim {trim} outliers out of {rounds} rounds")]
    TrimTooLarge { trim: usize, rounds: usize },
}

impl MeasurementConfig {
    pub fn geometry(&self) -> CacheGeometry {
        CacheGeometry {
            sets: self.sets,
            ways: self.ways,
            line_size: self.line_size,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ways < 2 {
            return Err(ConfigError::NotEnoughWays(self.ways));
        }
        if self.rounds == 0 {
            return Err(ConfigError::NoRounds);
        }
        if self.trim >= self.rounds {
            return Err(ConfigError::TrimTooLarge {
                trim: self.trim,
                rounds: self.rounds,
            });
        }
        Ok(())
    }
}

/// Rounds x sets grid of latency samples, append-only while the
/// measurement runs, read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct SampleMatrix {
    sets: usize,
    samples: Vec<u64>,
}

impl SampleMatrix {
    pub fn new(sets: usize) -> SampleMatrix {
        SampleMatrix {
            sets,
            samples: Vec::new(),
        }
    }

    pub fn sets(&self) -> usize {
        self.sets
    }

    pub fn rounds(&self) -> usize {
        self.samples.len() / self.sets
    }

    pub fn push_row(&mut self, row: &[u64]) {
        assert_eq!(row.len(), self.sets);
        self.samples.extend_from_slice(row);
    }

    pub fn row(&self, round: usize) -> &[u64] {
        &self.samples[round * self.sets..(round + 1) * self.sets]
    }

    /// All samples of one set across the rounds.
    pub fn column(&self, set: usize) -> Vec<u64> {
        self.samples[set..]
            .iter()
            .step_by(self.sets)
            .copied()
            .collect()
    }
}

/// Repeats the prime/probe protocol for `rounds` rounds over an
/// already shuffled ring.
///
/// Each round starts from a clean slate via the soft init (latency
/// reset only, the ring is never rebuilt or reshuffled). A run is
/// atomic in intent: if it is cut short, discard the partial matrix
/// rather than resuming, since the outlier trimming assumes complete
/// independent rounds.
pub fn run_rounds<C: Clock>(ring: &mut EvictionRing, clock: &mut C, rounds: usize) -> SampleMatrix {
    let mut matrix = SampleMatrix::new(ring.sets());
    for round in 0..rounds {
        ring.reset_latencies();
        probe::prime(ring);
        let row = probe::probe(ring, clock);
        matrix.push_row(&row);
        if (round + 1) % 100 == 0 {
            log::debug!("round {}/{}", round + 1, rounds);
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, MeasurementConfig, SampleMatrix};

    #[test]
    fn default_config_is_valid() {
        assert!(MeasurementConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_degenerate_parameters() {
        let mut config = MeasurementConfig {
            ways: 1,
            ..MeasurementConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotEnoughWays(1))
        ));

        config = MeasurementConfig {
            trim: 1000,
            ..MeasurementConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TrimTooLarge {
                trim: 1000,
                rounds: 1000
            })
        ));

        config = MeasurementConfig {
            rounds: 0,
            trim: 0,
            ..MeasurementConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoRounds)));
    }

    #[test]
    fn matrix_rows_and_columns() {
        let mut matrix = SampleMatrix::new(3);
        matrix.push_row(&[1, 2, 3]);
        matrix.push_row(&[4, 5, 6]);
        assert_eq!(matrix.rounds(), 2);
        assert_eq!(matrix.row(1), &[4, 5, 6]);
        assert_eq!(matrix.column(0), vec![1, 4]);
        assert_eq!(matrix.column(2), vec![3, 6]);
    }
}
