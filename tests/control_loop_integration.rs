mod common;

use std::collections::HashSet;

use grid_command_center::GridError;
use grid_command_center::config::ScenarioConfig;
use grid_command_center::grid::monitor::{self, FeederPhase};
use grid_command_center::grid::{FeederSnapshot, LoadStatus};

use common::{activation, service, two_feeder_config};

fn assert_feeder_invariants(f: &FeederSnapshot) {
    assert!(f.current_load >= 0.0, "{}: negative load {}", f.id, f.current_load);

    let expected = if f.load_percent > 90.0 {
        LoadStatus::Critical
    } else if f.load_percent > 75.0 {
        LoadStatus::Warning
    } else {
        LoadStatus::Normal
    };
    assert_eq!(f.status, expected, "{}: status at {:.2}%", f.id, f.load_percent);

    let sum: f32 = f.active_ders.iter().map(|d| d.output_kw).sum();
    assert!(
        (f.active_der_contribution - sum).abs() < 1e-3,
        "{}: contribution {} != registry sum {}",
        f.id,
        f.active_der_contribution,
        sum
    );
}

#[tokio::test]
async fn activation_stand_down_and_reflag_cycle() {
    let svc = service(&two_feeder_config());

    let f = svc.feeder("F-1234").expect("feeder");
    assert_eq!(f.status, LoadStatus::Critical);
    assert!((f.load_percent - 92.1).abs() < 0.1);

    svc.activate_der("DER-SOLAR-003", activation("F-1234", 25.0))
        .await
        .expect("activation should succeed");
    let f = svc.feeder("F-1234").expect("feeder");
    assert!((f.active_der_contribution - 25.0).abs() < 1e-4);
    assert!((f.current_load - 62.5).abs() < 1e-4);
    assert_eq!(f.status, LoadStatus::Normal);
    assert_eq!(
        svc.with_state(|s| monitor::phase_of(s, "F-1234")).expect("phase"),
        FeederPhase::OverMitigated
    );

    // Over-mitigated: the scan releases every DER and does not flag yet.
    let report = svc.run_monitor();
    assert_eq!(report.stood_down.len(), 1);
    assert_eq!(report.stood_down[0].released.len(), 1);
    assert!(report.flagged.is_empty());

    let f = svc.feeder("F-1234").expect("feeder");
    assert_eq!(f.active_der_contribution, 0.0);
    assert!((f.current_load - 87.5).abs() < 1e-4);
    assert_eq!(f.status, LoadStatus::Critical);

    // The next scan sees a critical feeder with nothing active.
    let report = svc.run_monitor();
    assert_eq!(report.flagged, vec!["F-1234".to_string()]);
    assert_eq!(
        svc.with_state(|s| monitor::phase_of(s, "F-1234")).expect("phase"),
        FeederPhase::CriticalPending
    );
}

#[tokio::test]
async fn repeated_scans_never_double_release() {
    let svc = service(&two_feeder_config());
    svc.activate_der("DER-BATT-001", activation("F-1234", 10.0))
        .await
        .expect("first activation");
    svc.activate_der("DER-DR-004", activation("F-1234", 20.0))
        .await
        .expect("second activation");
    assert_eq!(svc.active_ders().len(), 2);

    let first = svc.run_monitor();
    assert_eq!(first.stood_down[0].released.len(), 2);

    let second = svc.run_monitor();
    assert!(second.stood_down.is_empty());
    let f = svc.feeder("F-1234").expect("feeder");
    assert_eq!(f.active_der_contribution, 0.0);
    assert!((f.current_load - 87.5).abs() < 1e-4);
}

#[tokio::test]
async fn flag_is_raised_once_and_cleared_by_confirm() {
    let svc = service(&two_feeder_config());

    assert_eq!(svc.run_monitor().flagged.len(), 1);
    assert!(svc.run_monitor().flagged.is_empty());
    let pending = svc.pending_requests();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].feeder_id, "F-1234");

    let activations = svc
        .confirm_auto_activation("F-1234")
        .await
        .expect("confirm should activate");
    assert!(!activations.is_empty());
    assert!(svc.pending_requests().is_empty());

    let f = svc.feeder("F-1234").expect("feeder");
    assert!(!f.pending_auto_activation);
    assert_eq!(f.active_ders.len(), activations.len());
    assert_feeder_invariants(&f);

    // Already handled: a second confirm is refused.
    let err = svc
        .confirm_auto_activation("F-1234")
        .await
        .expect_err("nothing pending");
    assert!(matches!(err, GridError::NotPending(_)));
}

#[tokio::test]
async fn dismissed_feeder_is_flagged_again_while_still_critical() {
    let svc = service(&two_feeder_config());
    svc.run_monitor();
    assert!(svc.dismiss_auto_activation("F-1234").expect("dismiss"));
    assert!(svc.pending_requests().is_empty());

    let report = svc.run_monitor();
    assert_eq!(report.flagged, vec!["F-1234".to_string()]);
}

#[tokio::test]
async fn manual_stand_down_releases_all_ders_on_one_feeder() {
    let svc = service(&two_feeder_config());
    svc.activate_der("DER-BATT-001", activation("F-1234", 5.0))
        .await
        .expect("activation on F-1234");
    svc.activate_der("DER-EV-002", activation("F-5678", 5.0))
        .await
        .expect("activation on F-5678");

    let released = svc.stand_down("F-1234").expect("stand down");
    assert_eq!(released.len(), 1);
    assert_eq!(svc.active_ders().len(), 1);
    assert_eq!(svc.active_ders()[0].feeder_id, "F-5678");
    assert!(matches!(
        svc.stand_down("F-0000"),
        Err(GridError::FeederNotFound(_))
    ));
}

#[tokio::test]
async fn invariants_hold_across_a_stressed_evening() {
    let svc = service(&ScenarioConfig::stressed());
    let mut flags = 0;

    for cycle in 1..=60u32 {
        svc.tick_load();
        for f in svc.feeders() {
            assert_feeder_invariants(&f);
        }

        if cycle % 2 == 0 {
            flags += svc.run_monitor().flagged.len();
            for f in svc.feeders() {
                assert_feeder_invariants(&f);
                if f.pending_auto_activation {
                    assert_eq!(f.status, LoadStatus::Critical, "{} pending", f.id);
                    assert!(f.active_ders.is_empty(), "{} pending with DERs", f.id);
                }
            }

            // Confirm the first pending request, dismiss the rest.
            let pending = svc.pending_requests();
            if let Some((first, rest)) = pending.split_first() {
                svc.confirm_auto_activation(&first.feeder_id)
                    .await
                    .expect("sandbox confirm should succeed");
                for p in rest {
                    assert!(svc.dismiss_auto_activation(&p.feeder_id).expect("dismiss"));
                }
            }
            assert!(svc.pending_requests().is_empty());
            for f in svc.feeders() {
                assert_feeder_invariants(&f);
            }
        }
    }

    assert!(flags > 0, "a stressed evening should raise at least one request");
    assert!(
        svc.audit_logs()
            .iter()
            .any(|e| e.action == "DER Activation"),
        "confirmed requests should be audited"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_and_scans_keep_the_registry_consistent() {
    const DERS: [&str; 6] = [
        "DER-BATT-001",
        "DER-EV-002",
        "DER-SOLAR-003",
        "DER-DR-004",
        "DER-BATT-005",
        "DER-DR-006",
    ];
    let svc = service(&two_feeder_config());

    let mut tasks = Vec::new();
    for i in 0..24 {
        let svc = svc.clone();
        let feeder = if i % 2 == 0 { "F-1234" } else { "F-5678" };
        tasks.push(tokio::spawn(async move {
            svc.activate_der(DERS[i % DERS.len()], activation(feeder, 1.5)).await
        }));
    }
    let loop_svc = svc.clone();
    let control = tokio::spawn(async move {
        for _ in 0..50 {
            loop_svc.tick_load();
            loop_svc.run_monitor();
            for f in loop_svc.feeders() {
                assert_feeder_invariants(&f);
            }
            tokio::task::yield_now().await;
        }
    });

    let mut succeeded = 0;
    for task in tasks {
        if task.await.expect("activation task should not panic").is_ok() {
            succeeded += 1;
        }
    }
    control.await.expect("control loop should not panic");
    assert!(succeeded > 0);

    let feeders = svc.feeders();
    for f in &feeders {
        assert_feeder_invariants(f);
    }
    let per_feeder: usize = feeders.iter().map(|f| f.active_ders.len()).sum();
    let active = svc.active_ders();
    assert_eq!(per_feeder, active.len());
    let orders: HashSet<&str> = active.iter().map(|d| d.order_id.as_str()).collect();
    assert_eq!(orders.len(), active.len(), "an order is attributed twice");
}
