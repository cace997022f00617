//! Tiered lot allocation across ranked destinations.
//!
//! Splits an order's total quantity across broker accounts ordered by
//! priority. The tier policy balances execution-price impact against
//! operational complexity: small orders stay on one account, mid-size
//! orders split across two, large orders across up to three.
//!
//! Capacity semantics are deliberately uneven: the two- and three-way tiers
//! cap the leading destinations at a fraction of their capacity, but the
//! last destination considered in the large tier absorbs every remaining
//! lot regardless of its capacity field. Capacity hints are advisory there,
//! so the function never under-allocates a large order; a
//! capacity-constrained low-priority destination can therefore be
//! overfilled.

use crate::model::{Allocation, AllocationPlan, Destination};
use tracing::debug;

/// Largest order that stays entirely on the top-priority destination.
const SINGLE_DESTINATION_MAX: u32 = 2;
/// Largest order split across the top two destinations.
const DUAL_DESTINATION_MAX: u32 = 5;
/// Destinations considered for orders above `DUAL_DESTINATION_MAX`.
const MAX_DESTINATIONS: usize = 3;

/// Deterministically partition `total_lots` across `destinations`.
///
/// Destinations are ranked by ascending priority, ties broken by input
/// order. Identical inputs always produce identical output, which retries
/// rely on. Zero-lot allocations are reported, not dropped; callers needing
/// an active-destination count must filter them.
///
/// Invariant: `plan.allocated() + plan.remainder == total_lots`. A non-zero
/// remainder means total capacity was insufficient and must be surfaced as
/// a partial fill.
pub fn allocate(total_lots: u32, destinations: &[Destination]) -> AllocationPlan {
    let mut ranked: Vec<&Destination> = destinations.iter().collect();
    ranked.sort_by_key(|d| d.priority);

    let Some(primary) = ranked.first() else {
        return AllocationPlan {
            allocations: Vec::new(),
            remainder: total_lots,
        };
    };

    // Documented edge case, not an error: a zero-lot order still reports
    // the top destination so downstream records have a destination to name.
    if total_lots == 0 {
        return AllocationPlan {
            allocations: vec![Allocation {
                destination_id: primary.destination_id.clone(),
                lots: 0,
            }],
            remainder: 0,
        };
    }

    let plan = if total_lots <= SINGLE_DESTINATION_MAX {
        allocate_single(total_lots, primary)
    } else if total_lots <= DUAL_DESTINATION_MAX {
        allocate_dual(total_lots, &ranked)
    } else {
        allocate_spread(total_lots, &ranked)
    };

    debug!(
        total_lots,
        allocated = plan.allocated(),
        remainder = plan.remainder,
        destinations = plan.allocations.len(),
        "Computed lot allocation"
    );
    plan
}

/// Small order: everything on the preferred account.
fn allocate_single(total_lots: u32, primary: &Destination) -> AllocationPlan {
    AllocationPlan {
        allocations: vec![Allocation {
            destination_id: primary.destination_id.clone(),
            lots: total_lots,
        }],
        remainder: 0,
    }
}

/// Mid-size order: the primary takes up to half its capacity (rounded
/// toward the primary), the secondary takes the rest up to its capacity.
fn allocate_dual(total_lots: u32, ranked: &[&Destination]) -> AllocationPlan {
    let primary = ranked[0];
    let mut remaining = total_lots;
    let mut allocations = Vec::with_capacity(2);

    let primary_lots = remaining.min(primary.capacity.div_ceil(2));
    allocations.push(Allocation {
        destination_id: primary.destination_id.clone(),
        lots: primary_lots,
    });
    remaining -= primary_lots;

    if let Some(secondary) = ranked.get(1) {
        // Reported even at zero lots.
        let secondary_lots = remaining.min(secondary.capacity);
        allocations.push(Allocation {
            destination_id: secondary.destination_id.clone(),
            lots: secondary_lots,
        });
        remaining -= secondary_lots;
    }

    AllocationPlan {
        allocations,
        remainder: remaining,
    }
}

/// Large order: up to three destinations. The leading destinations each
/// take up to a third of their capacity; the last destination considered
/// absorbs all remaining lots, capacity treated as advisory.
fn allocate_spread(total_lots: u32, ranked: &[&Destination]) -> AllocationPlan {
    let used = ranked.len().min(MAX_DESTINATIONS);
    let mut remaining = total_lots;
    let mut allocations = Vec::with_capacity(used);

    for (idx, destination) in ranked[..used].iter().enumerate() {
        let lots = if idx == used - 1 {
            remaining
        } else {
            remaining.min(destination.capacity / 3)
        };
        allocations.push(Allocation {
            destination_id: destination.destination_id.clone(),
            lots,
        });
        remaining -= lots;
    }

    AllocationPlan {
        allocations,
        remainder: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn dest(id: &str, priority: u8, capacity: u32) -> Destination {
        Destination {
            destination_id: id.to_string(),
            priority,
            capacity,
        }
    }

    fn lots_of(plan: &AllocationPlan, id: &str) -> u32 {
        plan.allocations
            .iter()
            .find(|a| a.destination_id == id)
            .map(|a| a.lots)
            .unwrap_or_else(|| panic!("no allocation for {id}"))
    }

    fn assert_conserved(plan: &AllocationPlan, total: u32) {
        assert_eq!(plan.allocated() + plan.remainder, total);
    }

    // =========================================================================
    // Single-destination tier (<= 2 lots)
    // =========================================================================

    #[test]
    fn test_one_lot_goes_to_top_destination() {
        let plan = allocate(1, &[dest("dest1", 1, 100)]);
        assert_eq!(plan.allocations, vec![Allocation {
            destination_id: "dest1".into(),
            lots: 1,
        }]);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_two_lots_single_destination_ignores_lower_priorities() {
        let plan = allocate(2, &[dest("B", 2, 75), dest("A", 1, 100)]);
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(lots_of(&plan, "A"), 2);
        assert_conserved(&plan, 2);
    }

    // =========================================================================
    // Dual-destination tier (3..=5 lots)
    // =========================================================================

    #[test]
    fn test_five_lots_all_fit_on_primary() {
        // Primary cap 100 -> half is 50, min(5, 50) = 5; secondary reported
        // with zero lots.
        let plan = allocate(5, &[dest("A", 1, 100), dest("B", 2, 75)]);
        assert_eq!(lots_of(&plan, "A"), 5);
        assert_eq!(lots_of(&plan, "B"), 0);
        assert_eq!(plan.remainder, 0);
        assert_conserved(&plan, 5);
    }

    #[test]
    fn test_dual_tier_splits_when_primary_half_is_small() {
        // Primary cap 4 -> half rounds toward the primary: 2. Secondary
        // takes the remaining 3.
        let plan = allocate(5, &[dest("A", 1, 4), dest("B", 2, 75)]);
        assert_eq!(lots_of(&plan, "A"), 2);
        assert_eq!(lots_of(&plan, "B"), 3);
        assert_conserved(&plan, 5);
    }

    #[test]
    fn test_dual_tier_odd_capacity_rounds_toward_primary() {
        let plan = allocate(5, &[dest("A", 1, 5), dest("B", 2, 75)]);
        assert_eq!(lots_of(&plan, "A"), 3);
        assert_eq!(lots_of(&plan, "B"), 2);
    }

    #[test]
    fn test_dual_tier_with_single_destination_reports_shortfall() {
        let plan = allocate(5, &[dest("A", 1, 4)]);
        assert_eq!(lots_of(&plan, "A"), 2);
        assert_eq!(plan.remainder, 3);
        assert_conserved(&plan, 5);
    }

    #[test]
    fn test_dual_tier_capacity_shortfall_surfaces_remainder() {
        let plan = allocate(5, &[dest("A", 1, 2), dest("B", 2, 1)]);
        assert_eq!(lots_of(&plan, "A"), 1);
        assert_eq!(lots_of(&plan, "B"), 1);
        assert_eq!(plan.remainder, 3);
        assert_conserved(&plan, 5);
    }

    // =========================================================================
    // Spread tier (>= 6 lots)
    // =========================================================================

    #[test]
    fn test_fifteen_lots_exhausted_by_primary_third() {
        // Top-heavy boundary: min(15, 100/3 = 33) = 15 exhausts the order,
        // so B and C both receive zero.
        let plan = allocate(
            15,
            &[dest("A", 1, 100), dest("B", 2, 75), dest("C", 3, 50)],
        );
        assert_eq!(lots_of(&plan, "A"), 15);
        assert_eq!(lots_of(&plan, "B"), 0);
        assert_eq!(lots_of(&plan, "C"), 0);
        assert_eq!(plan.remainder, 0);
        assert_conserved(&plan, 15);
    }

    #[test]
    fn test_spread_across_three_destinations() {
        let plan = allocate(
            30,
            &[dest("A", 1, 30), dest("B", 2, 30), dest("C", 3, 5)],
        );
        // A: min(30, 10) = 10, B: min(20, 10) = 10, C absorbs 10 even
        // though its capacity field says 5.
        assert_eq!(lots_of(&plan, "A"), 10);
        assert_eq!(lots_of(&plan, "B"), 10);
        assert_eq!(lots_of(&plan, "C"), 10);
        assert_eq!(plan.remainder, 0);
        assert_conserved(&plan, 30);
    }

    #[test]
    fn test_spread_last_considered_absorbs_with_two_destinations() {
        let plan = allocate(12, &[dest("A", 1, 9), dest("B", 2, 1)]);
        // A: min(12, 3) = 3; B is the last considered, absorbs 9.
        assert_eq!(lots_of(&plan, "A"), 3);
        assert_eq!(lots_of(&plan, "B"), 9);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_spread_single_destination_takes_everything() {
        let plan = allocate(20, &[dest("A", 1, 1)]);
        assert_eq!(lots_of(&plan, "A"), 20);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_spread_uses_at_most_three_destinations() {
        let plan = allocate(
            100,
            &[
                dest("A", 1, 30),
                dest("B", 2, 30),
                dest("C", 3, 30),
                dest("D", 4, 30),
            ],
        );
        assert_eq!(plan.allocations.len(), 3);
        assert!(plan.allocations.iter().all(|a| a.destination_id != "D"));
        assert_conserved(&plan, 100);
    }

    // =========================================================================
    // Edge cases and determinism
    // =========================================================================

    #[test]
    fn test_zero_lots_reports_top_destination() {
        let plan = allocate(0, &[dest("B", 2, 75), dest("A", 1, 100)]);
        assert_eq!(plan.allocations, vec![Allocation {
            destination_id: "A".into(),
            lots: 0,
        }]);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_no_destinations_returns_full_remainder() {
        let plan = allocate(7, &[]);
        assert!(plan.allocations.is_empty());
        assert_eq!(plan.remainder, 7);
    }

    #[test]
    fn test_priority_ties_broken_by_input_order() {
        let plan = allocate(2, &[dest("first", 1, 10), dest("second", 1, 10)]);
        assert_eq!(plan.allocations[0].destination_id, "first");
    }

    #[test]
    fn test_identical_inputs_yield_identical_output() {
        let destinations = [dest("A", 1, 100), dest("B", 2, 75), dest("C", 3, 50)];
        for total in [0, 1, 2, 3, 5, 6, 15, 40, 500] {
            let first = allocate(total, &destinations);
            let second = allocate(total, &destinations);
            assert_eq!(first, second);
            assert_conserved(&first, total);
        }
    }
}
