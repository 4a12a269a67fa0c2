//! Deterministic clock for tests.

use crate::Clock;

/// Strictly monotonic fake counter.
///
/// Every read advances the counter by a fixed step, so a timed window
/// containing one `read` / `read_ordered` pair always measures
/// exactly `step` cycles, whatever happens in between.
#[derive(Clone, Debug)]
pub struct FakeClock {
    now: u64,
    step: u64,
    reads: usize,
}

impl FakeClock {
    pub fn new(step: u64) -> FakeClock {
        FakeClock {
            now: 0,
            step,
            reads: 0,
        }
    }

    /// Number of counter reads performed so far.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Clock for FakeClock {
    fn barrier(&mut self) {}

    fn read(&mut self) -> u64 {
        self.reads += 1;
        self.now += self.step;
        self.now
    }

    fn read_ordered(&mut self) -> u64 {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::FakeClock;
    use crate::Clock;

    #[test]
    fn advances_by_step() {
        let mut clock = FakeClock::new(7);
        let t0 = clock.read();
        let t1 = clock.read_ordered();
        assert_eq!(t1 - t0, 7);
        assert_eq!(clock.reads(), 2);
    }
}
