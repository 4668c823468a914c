//! Capacity admission and load computation. Pure functions over an
//! assignment snapshot — no I/O, no mutation. The caller supplies a
//! consistent snapshot (the mutation path holds the engineer's write lock
//! across read-check-write).

use chrono::NaiveDate;

use crate::model::{Assignment, DateRange};

/// Outcome of the interval-overlap admission test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityDecision {
    pub admissible: bool,
    /// Summed allocation of existing assignments overlapping the candidate
    /// window, compounding additively with no per-project deduplication.
    pub total_allocated: u32,
    /// `max_capacity - total_allocated`. Signed: lowering an engineer's
    /// capacity under existing load makes this negative.
    pub available_capacity: i64,
}

/// Point-in-time load, used by the capacity endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub total_allocated: u32,
    pub available_capacity: i64,
    /// Assignments active at the query instant, in window order.
    pub active: Vec<Assignment>,
}

/// Sum of allocations over assignments whose range overlaps `window`.
/// Overlap is inclusive on both bounds: an assignment touching the
/// candidate at exactly one boundary day counts.
fn overlapping_allocation(window: &DateRange, existing: &[Assignment]) -> u32 {
    existing
        .iter()
        .filter(|a| a.window.overlaps(window))
        .map(|a| a.allocation)
        .sum()
}

/// Decide whether committing a candidate assignment
/// `(window, allocation)` would violate the engineer's capacity
/// invariant: at every instant the summed allocation of assignments whose
/// range contains it must stay within `max_capacity`.
///
/// `existing` is the engineer's current assignment set with the candidate
/// itself excluded (relevant on the update path). Exactly filling the
/// remaining capacity is admissible; one unit over is rejected.
pub fn check_capacity(
    max_capacity: u32,
    window: &DateRange,
    allocation: u32,
    existing: &[Assignment],
) -> CapacityDecision {
    let total_allocated = overlapping_allocation(window, existing);
    CapacityDecision {
        admissible: u64::from(total_allocated) + u64::from(allocation) <= u64::from(max_capacity),
        total_allocated,
        available_capacity: i64::from(max_capacity) - i64::from(total_allocated),
    }
}

/// Load at a single instant: an assignment contributes iff
/// `start <= as_of <= end`. Distinct from the interval test above by
/// design — point-in-time for status display, interval overlap for
/// admission control.
pub fn current_load(max_capacity: u32, as_of: NaiveDate, assignments: &[Assignment]) -> LoadReport {
    let active: Vec<Assignment> = assignments
        .iter()
        .filter(|a| a.window.contains_day(as_of))
        .cloned()
        .collect();
    let total_allocated: u32 = active.iter().map(|a| a.allocation).sum();
    LoadReport {
        total_allocated,
        available_capacity: i64::from(max_capacity) - i64::from(total_allocated),
        active,
    }
}
