//! Integration tests for the simulated devices
//!
//! These tests verify that SimulatedPositioner and SimulatedAnalyzer correctly
//! implement the capability traits and exhibit realistic behavior.

use chamber_daq::error::{InstrumentError, PositionerError};
use chamber_daq::experiment::{
    AngleRange, FrequencySpec, PlanDefinition, PolarizationDefinition, SParameter, ScanPlan,
};
use chamber_daq::hardware::jog::{jog_azimuth, return_to_zero};
use chamber_daq::hardware::{NetworkAnalyzer, Positioner, SimulatedAnalyzer, SimulatedPositioner};
use num_complex::Complex64;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// SimulatedPositioner Tests
// =============================================================================

#[tokio::test]
async fn test_positioner_slew_timing() {
    let positioner = SimulatedPositioner::new().with_slew_rate(200.0);

    // 40° at 200°/s should take ~200 ms
    let start = Instant::now();
    positioner.move_to(40.0, -20.0).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(190) && elapsed <= Duration::from_millis(400),
        "Expected ~200ms, got {}ms",
        elapsed.as_millis()
    );
    assert_eq!(positioner.current_position().await.unwrap(), (40.0, -20.0));
}

#[tokio::test]
async fn test_stop_halts_move_in_flight() {
    let positioner = Arc::new(SimulatedPositioner::new().with_move_time(Duration::from_secs(5)));

    let mover = {
        let positioner = positioner.clone();
        tokio::spawn(async move { positioner.move_to(90.0, 0.0).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    positioner.stop().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), mover)
        .await
        .expect("stop should interrupt the move")
        .unwrap();
    assert_eq!(result, Err(PositionerError::Halted));
    assert_eq!(positioner.current_position().await.unwrap(), (0.0, 0.0));
    assert_eq!(positioner.stop_count(), 1);
}

#[tokio::test]
async fn test_travel_limits() {
    let positioner = SimulatedPositioner::new().with_limits((-90.0, 90.0), (0.0, 45.0));

    assert!(matches!(
        positioner.move_to(120.0, 0.0).await,
        Err(PositionerError::OutOfRange { .. })
    ));
    assert!(matches!(
        positioner.move_to(0.0, -5.0).await,
        Err(PositionerError::OutOfRange { .. })
    ));
    positioner.move_to(-90.0, 45.0).await.unwrap();
}

#[tokio::test]
async fn test_jog_through_trait_object() {
    let positioner: Arc<dyn Positioner> = Arc::new(SimulatedPositioner::new());

    assert_eq!(
        jog_azimuth(positioner.as_ref(), 30.0, true).await.unwrap(),
        (30.0, 0.0)
    );
    assert_eq!(
        jog_azimuth(positioner.as_ref(), 30.0, true).await.unwrap(),
        (60.0, 0.0)
    );
    assert_eq!(return_to_zero(positioner.as_ref()).await.unwrap(), (0.0, 0.0));
}

// =============================================================================
// SimulatedAnalyzer Tests
// =============================================================================

fn two_port_plan() -> ScanPlan {
    PlanDefinition::new(
        AngleRange::fixed(0.0),
        AngleRange::fixed(0.0),
        FrequencySpec::sweep(1e9, 3e9, 3),
    )
    .with_polarizations(vec![
        PolarizationDefinition::new("Co"),
        PolarizationDefinition::new("Cross").with_sparameter(SParameter::new(3, 1)),
    ])
    .validate()
    .unwrap()
}

#[tokio::test]
async fn test_analyzer_deterministic_response() {
    let plan = two_port_plan();
    let analyzer = SimulatedAnalyzer::new();

    let co = analyzer
        .measure(plan.frequencies(), &plan.polarizations()[0])
        .await
        .unwrap();
    assert_eq!(
        co,
        vec![
            Complex64::new(1.0, 0.21),
            Complex64::new(2.0, 0.21),
            Complex64::new(3.0, 0.21)
        ]
    );

    let cross = analyzer
        .measure(plan.frequencies(), &plan.polarizations()[1])
        .await
        .unwrap();
    assert_eq!(cross[1], Complex64::new(2.0, 0.31));
    assert_eq!(analyzer.measure_count(), 2);
    assert_eq!(analyzer.measured_polarizations().await, vec!["Co", "Cross"]);
}

#[tokio::test]
async fn test_analyzer_scripted_failures() {
    let plan = two_port_plan();
    let polarization = &plan.polarizations()[0];
    let analyzer = SimulatedAnalyzer::new();
    analyzer.queue_failures([InstrumentError::Timeout]).await;
    analyzer
        .fail_on_call(3, InstrumentError::CommunicationLost("cable".into()))
        .await;

    assert_eq!(
        analyzer.measure(plan.frequencies(), polarization).await,
        Err(InstrumentError::Timeout)
    );
    assert!(analyzer.measure(plan.frequencies(), polarization).await.is_ok());
    let err = analyzer
        .measure(plan.frequencies(), polarization)
        .await
        .unwrap_err();
    assert!(err.is_communication_lost());
}

#[tokio::test]
async fn test_pattern_follows_positioner() {
    let plan = two_port_plan();
    let positioner = Arc::new(SimulatedPositioner::new());
    let analyzer = SimulatedAnalyzer::new().with_pattern(positioner.clone());

    let boresight = analyzer
        .measure(plan.frequencies(), &plan.polarizations()[0])
        .await
        .unwrap();
    positioner.move_to(60.0, 0.0).await.unwrap();
    let off_axis = analyzer
        .measure(plan.frequencies(), &plan.polarizations()[0])
        .await
        .unwrap();

    assert!((boresight[0].norm() - 1.0).abs() < 1e-12);
    assert!((off_axis[0].norm() - 0.5).abs() < 1e-12);
}
