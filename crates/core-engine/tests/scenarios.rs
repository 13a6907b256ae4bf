//! End-to-end dispatcher scenarios on synthetic floors.

mod common;

use common::*;
use core_config::SimConfig;
use core_events::{EventKind, ObjectId, TaskKind};
use core_world::{AgvId, Cell};

/// Open floor, one task: the shelf is fetched, processed, and returned to a
/// different storage cell, with no forced teleports anywhere.
#[test]
fn single_task_round_trip() {
    let grid = vec![
        vec![0, 0, 1, 0, 0],
        vec![0, 0, 0, 0, 0],
        vec![0, 0, 1, 0, 1],
        vec![0, 0, 0, 0, 0],
        vec![2, 0, 0, 0, 1],
    ];
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 4, 0)],
        vec![shelf("SH1", 2, 2)],
        vec![spawn(0, 0), spawn(0, 4)],
        vec![task("T1", "SH1", "W1", 0, "2F_1", 15)],
    )]);
    let out = run(&input, SimConfig::default());

    let loads = of_kind(&out.events, EventKind::ShelfLoad);
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].from, Cell::new(2, 2));

    let unloads = of_kind(&out.events, EventKind::ShelfUnload);
    assert_eq!(unloads.len(), 1);
    assert_ne!(unloads[0].to, Cell::new(2, 2), "shelf must land elsewhere");

    assert!(of_kind(&out.events, EventKind::ForceTele).is_empty());
    assert_eq!(out.summary.completed_tasks, 1);
    assert_eq!(out.kpis.len(), 1);
    assert_eq!(out.kpis[0].kind, TaskKind::Outbound);
    assert!(!out.kpis[0].delayed);

    assert_no_move_conflicts(&out.events);
    assert_shelf_conservation(&out.events, 1, &out);
}

/// Head-on in a one-wide corridor: the idle vehicle yields into the side
/// pocket and the task still completes cleanly.
#[test]
fn idle_blocker_yields_to_side_cell() {
    let grid = vec![
        vec![-1, -1, -1, -1, -1, 0, -1],
        vec![2, 0, 0, 0, 0, 0, 1],
        vec![-1, -1, -1, -1, -1, -1, -1],
    ];
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 1, 0)],
        vec![shelf("SH1", 1, 6)],
        vec![spawn(1, 1), spawn(1, 5)],
        vec![task("T1", "SH1", "W1", 0, "2F_1", 15)],
    )]);
    let out = run(&input, SimConfig::default());

    let yields = of_kind(&out.events, EventKind::Yield);
    assert!(!yields.is_empty(), "no YIELD produced");
    let nudged = yields
        .iter()
        .find(|y| y.obj == ObjectId::Agv(AgvId(2)))
        .expect("the idle vehicle is the one that yields");
    assert_eq!(nudged.to, Cell::new(0, 5), "must settle in the side pocket");

    assert_eq!(out.summary.completed_tasks, 1);
    assert_eq!(of_kind(&out.events, EventKind::ShelfLoad).len(), 1);
    assert!(of_kind(&out.events, EventKind::ForceTele).is_empty());
    assert_no_move_conflicts(&out.events);
}

/// Target shelf walled in by four neighbors: exactly one rescue clears a
/// blocker onto a storage cell, then the original task completes.
#[test]
fn walled_in_shelf_triggers_one_rescue() {
    let mut grid = vec![vec![0i8; 10]; 10];
    for (r, c) in [(5, 5), (4, 5), (6, 5), (5, 4), (5, 6)] {
        grid[r][c] = 1;
    }
    // Spare storage for buffers, drops, and parking.
    for (r, c) in [(2, 2), (2, 7), (7, 2), (7, 7), (1, 4), (8, 5)] {
        grid[r][c] = 1;
    }
    grid[9][0] = 2;
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 9, 0)],
        vec![
            shelf("TARGET", 5, 5),
            shelf("B_N", 4, 5),
            shelf("B_S", 6, 5),
            shelf("B_W", 5, 4),
            shelf("B_E", 5, 6),
        ],
        vec![spawn(0, 0), spawn(0, 9)],
        vec![task("T1", "TARGET", "W1", 0, "2F_1", 15)],
    )]);
    let out = run(&input, SimConfig::default());

    // Exactly one rescue eviction (one load/unload pair beyond none).
    let shuffle_loads = of_kind(&out.events, EventKind::ShuffleLoad);
    assert_eq!(shuffle_loads.len(), 1, "expected exactly one rescue eviction");
    let shuffle_unloads = of_kind(&out.events, EventKind::ShuffleUnload);
    assert_eq!(shuffle_unloads.len(), 1);
    assert_shuffles_paired(&out.events);

    // The original task finished.
    assert_eq!(out.summary.completed_tasks, 1);
    assert_eq!(out.kpis.len(), 1);
    let target_unload = of_kind(&out.events, EventKind::ShelfUnload)
        .into_iter()
        .find(|e| e.text == "TARGET")
        .expect("target shelf set down");
    assert_ne!(target_unload.to, Cell::new(5, 5));

    // All five shelves still exist and rest on storage cells.
    assert_shelf_conservation(&out.events, 5, &out);
    for (cell, on_storage) in &out.final_shelves {
        assert!(on_storage, "shelf finished on non-storage cell {cell:?}");
    }
    assert!(of_kind(&out.events, EventKind::ForceTele).is_empty());
    assert_no_move_conflicts(&out.events);
}

/// Three tasks through one station, one vehicle: strictly serial
/// processing, each stop gated on the station becoming free.
#[test]
fn station_processing_is_serial() {
    let grid = vec![
        vec![0, 0, 1, 0, 1, 0],
        vec![0, 0, 0, 0, 0, 0],
        vec![0, 0, 1, 0, 1, 0],
        vec![0, 0, 0, 0, 0, 0],
        vec![2, 0, 0, 0, 0, 1],
    ];
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 4, 0)],
        vec![shelf("SH1", 0, 2), shelf("SH2", 2, 2), shelf("SH3", 2, 4)],
        vec![spawn(1, 0)],
        vec![
            task("T1", "SH1", "W1", 0, "2F_1", 15),
            task("T2", "SH2", "W1", 0, "2F_1", 15),
            task("T3", "SH3", "W1", 0, "2F_1", 15),
        ],
    )]);
    let out = run(&input, SimConfig::default());

    let picks = of_kind(&out.events, EventKind::Picking);
    assert_eq!(picks.len(), 3);
    for p in &picks {
        assert_eq!(end_sec(p) - start_sec(p), 15);
    }
    for w in picks.windows(2) {
        assert!(
            start_sec(w[1]) >= end_sec(w[0]),
            "processing intervals overlap: {:?} then {:?}",
            w[0],
            w[1]
        );
    }
    assert_eq!(out.kpis.len(), 3);
    assert_no_move_conflicts(&out.events);
    assert_shelf_conservation(&out.events, 3, &out);
}

/// Two vehicles race to one station: both are admitted, the deeper slot
/// holder processes first, and the busy statuses never overlap.
#[test]
fn two_agvs_one_station_fifo() {
    let mut grid = vec![vec![0i8; 8]; 6];
    grid[2][2] = 1;
    grid[2][5] = 1;
    grid[0][2] = 1;
    grid[0][5] = 1;
    grid[4][6] = 1;
    grid[5][0] = 2;
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 5, 0)],
        vec![shelf("SH1", 2, 2), shelf("SH2", 2, 5)],
        vec![spawn(0, 0), spawn(0, 7)],
        vec![
            task("T1", "SH1", "W1", 0, "2F_1", 15),
            task("T2", "SH2", "W1", 0, "2F_1", 15),
        ],
    )]);
    let out = run(&input, SimConfig::default());

    assert_eq!(out.kpis.len(), 2);

    let busy: Vec<_> = of_kind(&out.events, EventKind::StationStatus)
        .into_iter()
        .filter(|e| e.text.starts_with("BLUE"))
        .collect();
    assert_eq!(busy.len(), 2);
    let mut spans: Vec<(i64, i64)> = busy.iter().map(|e| (start_sec(e), end_sec(e))).collect();
    spans.sort();
    assert!(
        spans[1].0 >= spans[0].1,
        "two busy windows overlap: {spans:?}"
    );

    let picks = of_kind(&out.events, EventKind::Picking);
    assert_eq!(picks.len(), 2);
    assert!(start_sec(picks[1]) >= end_sec(picks[0]));
    assert_no_move_conflicts(&out.events);
}

/// A task released 100 s after the epoch leaves the vehicle parked until
/// then: every committed movement starts at or after the release.
#[test]
fn release_time_gates_dispatch() {
    let grid = vec![
        vec![0, 0, 1, 0],
        vec![0, 0, 0, 1],
        vec![2, 0, 0, 0],
    ];
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 2, 0)],
        vec![shelf("SH1", 0, 2)],
        vec![spawn(0, 0)],
        vec![task("T1", "SH1", "W1", 100, "2F_1", 15)],
    )]);
    let out = run(&input, SimConfig::default());

    assert_eq!(out.summary.completed_tasks, 1);
    for m in of_kind(&out.events, EventKind::AgvMove) {
        assert!(
            start_sec(m) >= 100,
            "movement committed before release: {m:?}"
        );
    }
    let load = of_kind(&out.events, EventKind::ShelfLoad)[0].clone();
    assert!(start_sec(&load) >= 100);
}

/// Multi-floor bundles run floor-by-floor with fully isolated state.
#[test]
fn floors_are_isolated() {
    let mk_grid = || {
        vec![
            vec![0, 0, 1, 0],
            vec![0, 0, 0, 1],
            vec![2, 0, 0, 0],
        ]
    };
    let input = input(vec![
        floor(
            "2F",
            mk_grid(),
            vec![station("2F_1", 2, 0)],
            vec![shelf("A2", 0, 2)],
            vec![spawn(0, 0)],
            vec![task("T2", "A2", "W1", 0, "2F_1", 10)],
        ),
        floor(
            "3F",
            mk_grid(),
            vec![station("3F_1", 2, 0)],
            vec![shelf("A3", 0, 2)],
            vec![spawn(0, 0)],
            vec![task("T3", "A3", "RECEIVING_20240301", 0, "3F_1", 10)],
        ),
    ]);
    let out = run(&input, SimConfig::default());

    assert_eq!(out.summary.completed_tasks, 2);
    assert_eq!(out.kpis.len(), 2);
    let floors: Vec<_> = out.kpis.iter().map(|k| k.workstation.to_string()).collect();
    assert!(floors.contains(&"2F_1".to_string()));
    assert!(floors.contains(&"3F_1".to_string()));
    // Wave typing: RECEIVING waves are inbound, everything else outbound.
    for k in &out.kpis {
        let expect = if k.wave_id.contains("RECEIVING") {
            TaskKind::Inbound
        } else {
            TaskKind::Outbound
        };
        assert_eq!(k.kind, expect);
    }
    // Events of one floor never reference the other floor's label.
    assert!(out.events.iter().all(|e| e.floor == "2F" || e.floor == "3F"));
}

/// A task naming a shelf that does not exist is skipped without wedging the
/// queue or the zone accounting.
#[test]
fn unknown_shelf_task_is_skipped() {
    let grid = vec![
        vec![0, 0, 1, 0],
        vec![0, 0, 0, 1],
        vec![2, 0, 0, 0],
    ];
    let input = input(vec![floor(
        "2F",
        grid,
        vec![station("2F_1", 2, 0)],
        vec![shelf("SH1", 0, 2)],
        vec![spawn(0, 0)],
        vec![
            task("T1", "GHOST", "W1", 0, "2F_1", 15),
            task("T2", "SH1", "W1", 0, "2F_1", 15),
        ],
    )]);
    let out = run(&input, SimConfig::default());

    // Only the real task produces output.
    assert_eq!(out.kpis.len(), 1);
    assert_eq!(of_kind(&out.events, EventKind::ShelfLoad).len(), 1);
}
