#![deny(unsafe_op_in_unsafe_fn)]

//! Arena-backed cyclic eviction buffer.
//!
//! The ring is a single page-aligned block of cache-line-sized nodes,
//! linked into one cycle by `u32` next/prev indices stored inside the
//! nodes themselves. Following a link therefore reads the node's own
//! cache line, which is exactly the memory access the probe phase
//! times. Nodes never move: the W nodes sharing a physical address
//! range always alias to the same hardware cache set (their *group*),
//! and shuffling only rewires the traversal order.

pub mod shuffle;

mod mmap;

pub use mmap::MappedRegion;

use core::mem::size_of;
use core::ptr;
use std::num::NonZeroUsize;

use static_assertions::const_assert_eq;
use thiserror::Error;

/// Bytes per node, matching the hardware cache line.
pub const CACHE_LINE_BYTES: usize = 64;

/// One cache-line-sized block of the ring.
///
/// Links and latency fit in 16 bytes; the padding stretches the node
/// to exactly one line so consecutive nodes occupy consecutive lines
/// without overlap.
#[repr(C, align(64))]
pub struct CacheLineNode {
    next: u32,
    prev: u32,
    latency: u64,
    _padding: [u8; 48],
}

const_assert_eq!(size_of::<CacheLineNode>(), CACHE_LINE_BYTES);

/// Set-associative geometry the ring is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Number of cache sets.
    pub sets: usize,
    /// Associativity (lines per set).
    pub ways: usize,
    /// Bytes per cache line.
    pub line_size: usize,
}

impl CacheGeometry {
    /// Total number of lines, and hence ring nodes.
    pub fn lines(&self) -> usize {
        self.sets * self.ways
    }
}

#[derive(Debug, Error)]
pub enum RingBuildError {
    #[error("geometry {0} sets x {1} ways has no lines")]
    EmptyGeometry(usize, usize),
    #[error("line size {0} unsupported, nodes are 64 bytes")]
    UnsupportedLineSize(usize),
    #[error("page-aligned ring allocation failed: {0}")]
    AllocationFailed(#[source] nix::Error),
}

/// `S*W` nodes linked into exactly one cycle.
///
/// Invariant: traversing `next` exactly `S*W` times from any node
/// returns to that node, and fewer steps never do. Every relinking
/// operation in [`shuffle`] preserves this.
pub struct EvictionRing {
    region: MappedRegion,
    sets: usize,
    ways: usize,
}

impl EvictionRing {
    /// Allocates the arena page-aligned and links the nodes in
    /// allocation order: `next = i+1 mod N`, `prev = i-1 mod N`.
    ///
    /// Allocation failure is fatal for the caller: no other layout
    /// gives a predictable address-to-set mapping, so there is no
    /// fallback.
    pub fn build(geometry: CacheGeometry) -> Result<EvictionRing, RingBuildError> {
        if geometry.line_size != CACHE_LINE_BYTES {
            return Err(RingBuildError::UnsupportedLineSize(geometry.line_size));
        }
        let lines = geometry.lines();
        let length = NonZeroUsize::new(lines * CACHE_LINE_BYTES)
            .ok_or(RingBuildError::EmptyGeometry(geometry.sets, geometry.ways))?;
        let region = MappedRegion::new(length).map_err(RingBuildError::AllocationFailed)?;

        let ring = EvictionRing {
            region,
            sets: geometry.sets,
            ways: geometry.ways,
        };
        for i in 0..lines {
            let next = if i + 1 == lines { 0 } else { (i + 1) as u32 };
            let prev = if i == 0 { (lines - 1) as u32 } else { (i - 1) as u32 };
            unsafe {
                ptr::write(
                    ring.node(i as u32),
                    CacheLineNode {
                        next,
                        prev,
                        latency: 0,
                        _padding: [0; 48],
                    },
                );
            }
        }
        log::info!(
            "eviction ring: {} sets x {} ways, {} lines at {:p}",
            ring.sets,
            ring.ways,
            lines,
            ring.region.as_ptr()
        );
        Ok(ring)
    }

    pub fn sets(&self) -> usize {
        self.sets
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    /// Number of nodes in the ring.
    pub fn len(&self) -> usize {
        self.sets * self.ways
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node(&self, index: u32) -> *mut CacheLineNode {
        debug_assert!((index as usize) < self.len());
        let base = self.region.as_ptr() as *mut CacheLineNode;
        unsafe { base.add(index as usize) }
    }

    /// Follows the forward link. The volatile load of the link field
    /// touches the node's cache line; this *is* the access the probe
    /// times, so it must never be elided or hoisted.
    #[inline(always)]
    pub fn next(&self, index: u32) -> u32 {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.node(index)).next)) }
    }

    /// Follows the backward link (volatile, see [`EvictionRing::next`]).
    #[inline(always)]
    pub fn prev(&self, index: u32) -> u32 {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.node(index)).prev)) }
    }

    pub fn latency(&self, index: u32) -> u64 {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.node(index)).latency)) }
    }

    pub fn set_latency(&mut self, index: u32, cycles: u64) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.node(index)).latency), cycles) }
    }

    pub(crate) fn set_next(&mut self, index: u32, next: u32) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.node(index)).next), next) }
    }

    pub(crate) fn set_prev(&mut self, index: u32, prev: u32) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.node(index)).prev), prev) }
    }

    /// Soft init: clears every stored latency without rebuilding or
    /// relinking anything. Run once per measurement round.
    pub fn reset_latencies(&mut self) {
        for i in 0..self.len() as u32 {
            self.set_latency(i, 0);
        }
    }

    /// Physical group of a node, fixed at allocation time by address.
    /// Shuffling never changes it.
    pub fn group_of(&self, index: u32) -> usize {
        index as usize / self.ways
    }

    /// Steps of `next` needed to come back to `start`, capped at
    /// `cap`. On a well-formed ring this is exactly `len()` from any
    /// node; tests use it to check the single-cycle invariant.
    pub fn cycle_len(&self, start: u32, cap: usize) -> usize {
        let mut cur = self.next(start);
        let mut steps = 1;
        while cur != start && steps < cap {
            cur = self.next(cur);
            steps += 1;
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheGeometry, EvictionRing, RingBuildError, CACHE_LINE_BYTES};

    pub(crate) fn test_ring(sets: usize, ways: usize) -> EvictionRing {
        EvictionRing::build(CacheGeometry {
            sets,
            ways,
            line_size: CACHE_LINE_BYTES,
        })
        .unwrap()
    }

    pub(crate) fn assert_single_cycle(ring: &EvictionRing) {
        let n = ring.len();
        let mut seen = vec![false; n];
        let mut cur = 0u32;
        for _ in 0..n {
            assert!(!seen[cur as usize], "node {} visited twice", cur);
            seen[cur as usize] = true;
            cur = ring.next(cur);
        }
        assert_eq!(cur, 0, "not back at start after {} steps", n);
        for i in 0..n as u32 {
            assert_eq!(ring.prev(ring.next(i)), i);
            assert_eq!(ring.next(ring.prev(i)), i);
        }
    }

    #[test]
    fn build_links_one_cycle() {
        for (sets, ways) in [(1, 1), (1, 8), (4, 1), (80, 8)] {
            let ring = test_ring(sets, ways);
            assert_eq!(ring.len(), sets * ways);
            assert_single_cycle(&ring);
            assert_eq!(ring.cycle_len(0, 2 * ring.len()), ring.len());
        }
    }

    #[test]
    fn build_links_allocation_order() {
        let ring = test_ring(3, 2);
        for i in 0..6u32 {
            assert_eq!(ring.next(i), (i + 1) % 6);
            assert_eq!(ring.prev(i), (i + 6 - 1) % 6);
        }
    }

    #[test]
    fn groups_follow_addresses() {
        let ring = test_ring(4, 2);
        assert_eq!(ring.group_of(0), 0);
        assert_eq!(ring.group_of(1), 0);
        assert_eq!(ring.group_of(2), 1);
        assert_eq!(ring.group_of(7), 3);
    }

    #[test]
    fn latency_reset_clears_all_nodes() {
        let mut ring = test_ring(2, 2);
        for i in 0..4 {
            ring.set_latency(i, 17);
        }
        ring.reset_latencies();
        for i in 0..4 {
            assert_eq!(ring.latency(i), 0);
        }
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(
            EvictionRing::build(CacheGeometry {
                sets: 0,
                ways: 8,
                line_size: CACHE_LINE_BYTES
            }),
            Err(RingBuildError::EmptyGeometry(0, 8))
        ));
        assert!(matches!(
            EvictionRing::build(CacheGeometry {
                sets: 80,
                ways: 8,
                line_size: 128
            }),
            Err(RingBuildError::UnsupportedLineSize(128))
        ));
    }
}
