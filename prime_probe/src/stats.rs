//! Robust per-set statistics over the sample matrix.

use std::io::{self, Write};

use serde::Serialize;

use crate::SampleMatrix;

/// Summary of one cache set's retained samples.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SetStats {
    pub set: usize,
    /// Trimmed arithmetic mean, in cycles per access.
    pub mean: f64,
    /// Population variance of the retained samples.
    pub variance: f64,
}

impl SetStats {
    pub fn stddev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Reduces each set's column to a trimmed mean and population
/// variance.
///
/// Per column: sort ascending, drop the `trim` largest samples, then
/// average the rest and divide the squared deviations by the retained
/// count (population variance, not the n-1 estimator). Trimming is
/// asymmetric on purpose: interrupts, preemption and counter
/// anomalies produce spuriously long samples, never short ones, and
/// this is the only place such noise is absorbed.
pub fn aggregate(matrix: &SampleMatrix, trim: usize) -> Vec<SetStats> {
    let kept = matrix.rounds() - trim;
    (0..matrix.sets())
        .map(|set| {
            let mut column = matrix.column(set);
            column.sort_unstable();
            column.truncate(kept);

            let mean = column.iter().map(|&s| s as f64).sum::<f64>() / kept as f64;
            let variance = column
                .iter()
                .map(|&s| {
                    let d = s as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / kept as f64;
            SetStats {
                set,
                mean,
                variance,
            }
        })
        .collect()
}

/// Full result of a run, one [`SetStats`] per cache set.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub sets: usize,
    pub ways: usize,
    pub rounds: usize,
    pub trimmed: usize,
    pub stats: Vec<SetStats>,
}

impl RunReport {
    /// One line per set: `<set> <mean> <stddev>`, whitespace
    /// separated so the report stays trivially parsable.
    pub fn write_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for s in &self.stats {
            writeln!(out, "{:3} {:8.2} {:8.2}", s.set, s.mean, s.stddev())?;
        }
        Ok(())
    }
}
