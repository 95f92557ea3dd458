mod common;

use grid_command_center::beckn::gateway::MockGateway;
use grid_command_center::beckn::journey::Compensation;
use grid_command_center::beckn::types::{OrderState, Stage};
use grid_command_center::config::ScenarioConfig;
use grid_command_center::{GridError, JourneyError};

use common::{RecordingGateway, activation, service_with_gateway, two_feeder_config};

const HAPPY_PATH: [Stage; 5] = [
    Stage::Search,
    Stage::Select,
    Stage::Init,
    Stage::Confirm,
    Stage::Status,
];

#[tokio::test]
async fn activation_runs_stages_in_protocol_order() {
    let gateway = RecordingGateway::new(MockGateway::default());
    let svc = service_with_gateway(&two_feeder_config(), gateway.clone());

    let act = svc
        .activate_der("DER-BATT-001", activation("F-1234", 10.0))
        .await
        .expect("activation should succeed");

    assert_eq!(gateway.calls(), HAPPY_PATH);
    assert_eq!(act.status, OrderState::Active);
    assert_eq!(
        gateway.order(&act.order_id).map(|o| o.state),
        Some(OrderState::Active)
    );
}

#[tokio::test]
async fn failed_verification_cancels_the_confirmed_order() {
    let gateway = RecordingGateway::new(MockGateway::default().failing_at(Stage::Status));
    let svc = service_with_gateway(&two_feeder_config(), gateway.clone());

    let err = svc
        .activate_der("DER-BATT-001", activation("F-1234", 10.0))
        .await
        .expect_err("status stage fails");
    assert!(matches!(
        err,
        GridError::Journey(JourneyError::StageFailed {
            stage: Stage::Status,
            ..
        })
    ));

    let calls = gateway.calls();
    assert_eq!(calls[..5], HAPPY_PATH);
    assert_eq!(calls.last(), Some(&Stage::Cancel));

    // Nothing was attributed and the feeder is still critical.
    assert!(svc.active_ders().is_empty());
    let f = svc.feeder("F-1234").expect("feeder");
    assert_eq!(f.active_der_contribution, 0.0);
    assert!((f.current_load - 87.5).abs() < 1e-4);
}

#[tokio::test]
async fn compensation_can_be_switched_off() {
    let mut cfg = two_feeder_config();
    cfg.journey.compensation = Compensation::None;
    let gateway = RecordingGateway::new(MockGateway::default().failing_at(Stage::Confirm));
    let svc = service_with_gateway(&cfg, gateway.clone());

    svc.activate_der("DER-BATT-001", activation("F-1234", 10.0))
        .await
        .expect_err("confirm stage fails");

    assert_eq!(
        gateway.calls(),
        [Stage::Search, Stage::Select, Stage::Init, Stage::Confirm]
    );
}

#[tokio::test]
async fn empty_catalog_stops_after_search() {
    let gateway = RecordingGateway::new(MockGateway::new(Vec::new()));
    let svc = service_with_gateway(&two_feeder_config(), gateway.clone());

    let err = svc
        .activate_der("DER-BATT-001", activation("F-1234", 10.0))
        .await
        .expect_err("no providers");
    assert!(matches!(err, GridError::Journey(JourneyError::NoProviders)));
    assert_eq!(gateway.calls(), [Stage::Search]);
}

#[tokio::test]
async fn unknown_resource_is_rejected_before_select() {
    let gateway = RecordingGateway::new(MockGateway::default());
    let svc = service_with_gateway(&two_feeder_config(), gateway.clone());

    let err = svc
        .activate_der("DER-NOPE-999", activation("F-1234", 10.0))
        .await
        .expect_err("unknown resource");
    assert!(matches!(
        err,
        GridError::Journey(JourneyError::ProviderNotFound(ref id)) if id == "DER-NOPE-999"
    ));
    assert_eq!(gateway.calls(), [Stage::Search]);
}

#[tokio::test]
async fn unknown_feeder_never_reaches_the_gateway() {
    let gateway = RecordingGateway::new(MockGateway::default());
    let svc = service_with_gateway(&two_feeder_config(), gateway.clone());

    let err = svc
        .activate_der("DER-BATT-001", activation("F-0000", 10.0))
        .await
        .expect_err("unknown feeder");
    assert!(matches!(err, GridError::FeederNotFound(_)));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn confirmed_request_runs_one_journey_per_der() {
    let gateway = RecordingGateway::new(MockGateway::default());
    let svc = service_with_gateway(&ScenarioConfig::stressed(), gateway.clone());
    svc.run_monitor();

    let activations = svc
        .confirm_auto_activation("F-1234")
        .await
        .expect("confirm should activate");
    assert_eq!(activations.len(), 2);

    // One discovery for the request, then a full journey per DER.
    let calls = gateway.calls();
    assert_eq!(calls[0], Stage::Search);
    assert_eq!(calls[1..6], HAPPY_PATH);
    assert_eq!(calls[6..11], HAPPY_PATH);
    assert_eq!(calls.len(), 11);
    // Stressed caps each DER at 20 kW.
    assert!(activations.iter().all(|a| a.output <= 20.0));
}

#[tokio::test]
async fn cancelled_order_reports_cancelled_and_releases_load() {
    let gateway = RecordingGateway::new(MockGateway::default());
    let svc = service_with_gateway(&two_feeder_config(), gateway.clone());

    let act = svc
        .activate_der("DER-DR-004", activation("F-1234", 20.0))
        .await
        .expect("activation should succeed");
    assert_eq!(
        svc.order_status(&act.order_id).await.expect("status").state,
        OrderState::Active
    );

    let order = svc.cancel_order(&act.order_id).await.expect("cancel");
    assert_eq!(order.state, OrderState::Cancelled);
    assert!(svc.active_ders().is_empty());
    assert!((svc.feeder("F-1234").expect("feeder").current_load - 87.5).abs() < 1e-4);

    // A cancelled order cannot be cancelled twice.
    assert!(svc.cancel_order(&act.order_id).await.is_err());
}
