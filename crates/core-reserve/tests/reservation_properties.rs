//! Property tests for reservation-table semantics.

use core_reserve::ReservationTable;
use core_world::{AgvId, Cell};
use proptest::prelude::*;

proptest! {
    // lock_spot covers exactly [from, from + duration], inclusive.
    #[test]
    fn lock_spot_exact_cover(from in 0i64..5_000, duration in 0i64..120, r in 0u16..32, c in 0u16..61) {
        let mut rt = ReservationTable::new(60);
        let cell = Cell::new(r, c);
        rt.lock_spot(cell, from, duration, AgvId(9));
        prop_assert!(!rt.is_cell_reserved(from - 1, cell));
        for t in from..=from + duration {
            prop_assert!(rt.is_cell_reserved(t, cell));
        }
        prop_assert!(!rt.is_cell_reserved(from + duration + 1, cell));
    }

    // A second claimant never displaces the holder, regardless of order.
    #[test]
    fn first_claim_wins(t in 0i64..1_000, r in 0u16..32, c in 0u16..61) {
        let mut rt = ReservationTable::new(60);
        let cell = Cell::new(r, c);
        prop_assert!(rt.reserve_cell(t, cell, AgvId(1)));
        prop_assert!(!rt.reserve_cell(t, cell, AgvId(2)));
        prop_assert_eq!(rt.cell_owner(t, cell), Some(AgvId(1)));
    }

    // Cleanup keeps every slot at or after fleet_min - retention and drops
    // everything strictly older.
    #[test]
    fn cleanup_is_a_clean_cut(fleet_min in 100i64..10_000, retention in 1i64..300) {
        let mut rt = ReservationTable::new(retention);
        let cell = Cell::new(1, 1);
        let cutoff = fleet_min - retention;
        for t in [cutoff - 2, cutoff - 1, cutoff, cutoff + 1, fleet_min] {
            rt.reserve_cell(t, cell, AgvId(1));
        }
        rt.cleanup(fleet_min);
        prop_assert!(!rt.is_cell_reserved(cutoff - 1, cell));
        prop_assert!(!rt.is_cell_reserved(cutoff - 2, cell));
        prop_assert!(rt.is_cell_reserved(cutoff, cell));
        prop_assert!(rt.is_cell_reserved(cutoff + 1, cell));
        prop_assert!(rt.is_cell_reserved(fleet_min, cell));
    }

    // The swap guard is directional: claiming p→q blocks q→p and nothing else.
    #[test]
    fn swap_guard_directional(t in 0i64..1_000, r in 0u16..31, c in 0u16..60) {
        let mut rt = ReservationTable::new(60);
        let p = Cell::new(r, c);
        let q = Cell::new(r, c + 1);
        let s = Cell::new(r + 1, c);
        rt.reserve_edge(t, p, q, AgvId(1));
        prop_assert!(rt.is_swap_blocked(t, q, p));
        prop_assert!(!rt.is_swap_blocked(t, p, q));
        prop_assert!(!rt.is_swap_blocked(t, s, p));
    }
}
