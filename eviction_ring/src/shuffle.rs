//! In-place randomization of ring traversal order.
//!
//! Two Fisher-Yates passes: first over whole W-node blocks, then over
//! the lines inside each physical group. Node identities and group
//! membership never change, only the next/prev wiring does. Every
//! individual swap must leave the ring a single cycle of `S*W` nodes;
//! a relinking mistake here shows up as an unbounded or truncated
//! traversal downstream, not as a crash.

use rand::Rng;

use crate::EvictionRing;

/// Randomizes the ring order at both granularities.
///
/// Block positions for the first pass are counted by walking `next`
/// from node 0's current location, so a block swapped away earlier
/// can be picked up again at its new position. The second pass swaps
/// individual nodes addressed by their physical index, one group at a
/// time.
pub fn shuffle<R: Rng>(ring: &mut EvictionRing, rng: &mut R) {
    let sets = ring.sets();
    let ways = ring.ways();

    for i in 0..sets.saturating_sub(1) {
        let j = rng.gen_range(i + 1..sets);
        swap_blocks(ring, i, j);
    }

    for group in 0..sets {
        for j in 0..ways.saturating_sub(1) {
            let r = rng.gen_range(j + 1..ways);
            swap_nodes(ring, (group * ways + j) as u32, (group * ways + r) as u32);
        }
    }
    log::debug!("shuffled {} blocks of {} lines", sets, ways);
}

/// Exchanges the ring positions of two nodes by relinking only their
/// neighbor pointers.
///
/// Three adjacency cases need distinct bookkeeping: `a` directly
/// before `b`, `b` directly before `a`, and disjoint. When the ring
/// has only the two nodes the exchange is a cyclic no-op.
pub fn swap_nodes(ring: &mut EvictionRing, a: u32, b: u32) {
    if a == b {
        return;
    }

    let prev_a = ring.prev(a);
    let next_a = ring.next(a);
    let prev_b = ring.prev(b);
    let next_b = ring.next(b);

    if next_a == b && next_b == a {
        return;
    }

    if next_a == b {
        // [..] <-> a <-> b <-> [..]
        ring.set_next(a, next_b);
        ring.set_prev(next_b, a);

        ring.set_prev(b, prev_a);
        ring.set_next(prev_a, b);

        ring.set_prev(a, b);
        ring.set_next(b, a);
    } else if next_b == a {
        // [..] <-> b <-> a <-> [..]
        ring.set_next(b, next_a);
        ring.set_prev(next_a, b);

        ring.set_prev(a, prev_b);
        ring.set_next(prev_b, a);

        ring.set_prev(b, a);
        ring.set_next(a, b);
    } else {
        ring.set_prev(a, prev_b);
        ring.set_next(a, next_b);
        ring.set_next(prev_b, a);
        ring.set_prev(next_b, a);

        ring.set_prev(b, prev_a);
        ring.set_next(b, next_a);
        ring.set_next(prev_a, b);
        ring.set_prev(next_a, b);
    }
}

/// Exchanges the two whole W-node blocks currently occupying ring
/// positions `block_a` and `block_b` (counted from node 0), touching
/// only the four boundary links.
///
/// Same three adjacency cases as [`swap_nodes`], at block
/// granularity. Interior links of either block are never rewritten.
pub fn swap_blocks(ring: &mut EvictionRing, block_a: usize, block_b: usize) {
    if block_a == block_b {
        return;
    }

    let (start_a, end_a) = block_bounds(ring, block_a);
    let (start_b, end_b) = block_bounds(ring, block_b);

    let prev_a = ring.prev(start_a);
    let next_a = ring.next(end_a);
    let prev_b = ring.prev(start_b);
    let next_b = ring.next(end_b);

    if next_a == start_b && next_b == start_a {
        // Only two blocks in the ring: exchanging them leaves the
        // cyclic order unchanged.
        return;
    }

    if next_a == start_b {
        // block a directly precedes block b
        ring.set_prev(start_b, prev_a);
        ring.set_next(prev_a, start_b);

        ring.set_next(end_a, next_b);
        ring.set_prev(next_b, end_a);

        ring.set_next(end_b, start_a);
        ring.set_prev(start_a, end_b);
    } else if next_b == start_a {
        // block b directly precedes block a
        ring.set_prev(start_a, prev_b);
        ring.set_next(prev_b, start_a);

        ring.set_next(end_b, next_a);
        ring.set_prev(next_a, end_b);

        ring.set_next(end_a, start_b);
        ring.set_prev(start_b, end_a);
    } else {
        ring.set_prev(start_a, prev_b);
        ring.set_next(prev_b, start_a);

        ring.set_next(end_a, next_b);
        ring.set_prev(next_b, end_a);

        ring.set_prev(start_b, prev_a);
        ring.set_next(prev_a, start_b);

        ring.set_next(end_b, next_a);
        ring.set_prev(next_a, end_b);
    }
}

/// First and last node of the block at ring position `block`, found
/// by walking `next` from node 0.
fn block_bounds(ring: &EvictionRing, block: usize) -> (u32, u32) {
    let ways = ring.ways();
    let mut start = 0u32;
    for _ in 0..block * ways {
        start = ring.next(start);
    }
    let mut end = start;
    for _ in 0..ways - 1 {
        end = ring.next(end);
    }
    (start, end)
}
