#![deny(unsafe_op_in_unsafe_fn)]

//! Cycle-accurate timing primitives.
//!
//! Everything platform specific lives behind the [`Clock`] trait, so
//! the measurement protocol can be exercised against a deterministic
//! clock in tests. On x86_64 the real implementation is
//! [`RdtscClock`], which pairs the timestamp counter with `cpuid`
//! serialization so that out-of-order execution cannot move the
//! timed memory accesses outside the measured window.

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64 as arch_x86;

pub mod fake;

/// A monotonic hardware cycle counter with instruction-stream
/// serialization.
pub trait Clock {
    /// Serializing barrier: every instruction issued before the
    /// barrier retires before anything after it starts.
    fn barrier(&mut self);

    /// Plain counter read. Cheap, but may execute before earlier
    /// loads complete.
    fn read(&mut self) -> u64;

    /// Counter read that waits for all preceding loads to complete
    /// before sampling (`rdtscp` semantics).
    fn read_ordered(&mut self) -> u64;
}

/// x86_64 timestamp counter clock.
#[cfg(target_arch = "x86_64")]
#[derive(Clone, Copy, Debug, Default)]
pub struct RdtscClock;

#[cfg(target_arch = "x86_64")]
impl Clock for RdtscClock {
    fn barrier(&mut self) {
        // cpuid is the classic serializing instruction; the leaf does
        // not matter, only the serialization side effect.
        unsafe {
            arch_x86::__cpuid(0);
        }
    }

    fn read(&mut self) -> u64 {
        unsafe { arch_x86::_rdtsc() }
    }

    fn read_ordered(&mut self) -> u64 {
        let mut aux = 0u32;
        unsafe { arch_x86::__rdtscp(&mut aux) }
    }
}

// rdtsc (has mfence before and after)
#[cfg(target_arch = "x86_64")]
pub fn rdtsc_fence() -> u64 {
    unsafe {
        arch_x86::_mm_mfence();
        let tsc: u64 = arch_x86::_rdtsc();
        arch_x86::_mm_mfence();
        tsc
    }
}

/// Busy-waits until `cycles` timestamp-counter cycles have elapsed.
///
/// Run once before measuring so that frequency scaling has settled;
/// latencies sampled while the core is still ramping up are not
/// comparable with the steady-state ones.
#[cfg(target_arch = "x86_64")]
pub fn warm_up(cycles: u64) {
    log::debug!("warming up for {} cycles", cycles);
    let start = rdtsc_fence();
    while rdtsc_fence().wrapping_sub(start) < cycles {
        core::hint::spin_loop();
    }
}
