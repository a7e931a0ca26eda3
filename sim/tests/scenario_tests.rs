use holdfast_sim::{Scenario, interactive_config, run_scenario};

fn scenario(operations: usize, fail_rate: f64, rate_limit_rate: f64) -> Scenario {
    Scenario {
        operations,
        fail_rate,
        rate_limit_rate,
        rounds: 6,
        ..Scenario::default()
    }
}

// ── Clean backend ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reliable_backend_drains_in_one_round() {
    let outcome = run_scenario(interactive_config(), scenario(15, 0.0, 0.0))
        .await
        .unwrap();

    assert!(outcome.drained);
    assert_eq!(outcome.rounds_run, 1);
    assert_eq!(outcome.faults.dropped, 0);
    assert!(outcome.reports[0].errors.is_empty());

    // 15 creates, 3 of them cancelled by removes before the first sync.
    let remote_total: usize = outcome.remote_rows.values().sum();
    assert_eq!(remote_total, 12);
    assert_eq!(outcome.visible_rows, outcome.remote_rows);
    assert_eq!(outcome.status.sync.pending_count, 0);
    assert_eq!(outcome.status.optimistic_pending, 0);
}

#[tokio::test(start_paused = true)]
async fn edits_are_folded_into_inserts() {
    let outcome = run_scenario(interactive_config(), scenario(3, 0.0, 0.0))
        .await
        .unwrap();
    // Three creates and one edit of the second row collapse to three inserts.
    assert_eq!(outcome.reports[0].synced, 3);
    assert_eq!(outcome.status.sync.errors.len(), 0);
}

// ── Faults ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn flaky_backend_still_settles_every_operation() {
    let outcome = run_scenario(interactive_config(), scenario(30, 0.2, 0.05))
        .await
        .unwrap();

    assert!(outcome.drained);
    let synced: usize = outcome.reports.iter().map(|r| r.synced).sum();
    let failed: usize = outcome.reports.iter().map(|r| r.failed).sum();
    assert_eq!(synced + failed, 24);
    assert_eq!(outcome.status.optimistic_pending, 0);
}

#[tokio::test(start_paused = true)]
async fn runs_are_reproducible_by_seed() {
    let a = run_scenario(interactive_config(), scenario(12, 0.3, 0.0))
        .await
        .unwrap();
    let b = run_scenario(interactive_config(), scenario(12, 0.3, 0.0))
        .await
        .unwrap();
    assert_eq!(a.remote_rows, b.remote_rows);
    assert_eq!(a.faults, b.faults);
}
