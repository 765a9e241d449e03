//! Simulator behaviour as seen through the hardware boundary.

use deck_core::definitions::ModuleModel;
use deck_core::hardware::{HardwareControl, HardwareError};
use deck_core::limits::MAX_SIMULATED_DELAY;
use deck_core::types::{point, Mount, MountType};
use deck_hardware::{
    Fault, FaultScript, HardwareCall, HardwareConfig, HardwareOperation, SimulatedHardware,
    SimulationMode,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing_test::traced_test;

#[tokio::test(start_paused = true)]
async fn realistic_moves_take_time_but_are_capped() {
    let hw = SimulatedHardware::builder()
        .mode(SimulationMode::Realistic)
        .pipette(MountType::Left, "p50_single")
        .build();

    let start = Instant::now();
    hw.move_to(Mount::Left, point(477.2, 93.8, 230.0), None, None)
        .await
        .unwrap();
    // 400 mm at 400 mm/s
    let elapsed = start.elapsed();
    assert!(elapsed >= std::time::Duration::from_secs(1));
    assert!(elapsed < std::time::Duration::from_millis(1100));

    let start = Instant::now();
    hw.move_to(Mount::Left, point(477.2, 93.8, 230.0 - 1.0), None, Some(0.01))
        .await
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= MAX_SIMULATED_DELAY);
    assert!(elapsed < MAX_SIMULATED_DELAY * 2);
}

#[tokio::test(start_paused = true)]
async fn instant_mode_never_sleeps() {
    let hw = SimulatedHardware::builder()
        .pipette(MountType::Left, "p1000_single")
        .build();
    let start = Instant::now();
    hw.move_to(Mount::Left, point(0.0, 0.0, 100.0), None, None)
        .await
        .unwrap();
    hw.aspirate(MountType::Left, 500.0, 1.0).await.unwrap();
    assert_eq!(start.elapsed().as_millis(), 0);
}

#[tokio::test]
#[traced_test]
async fn injected_faults_are_logged() {
    let hw = SimulatedHardware::builder()
        .pipette(MountType::Right, "p1000_multi")
        .fault(FaultScript::once(HardwareOperation::Dispense, Fault::Overpressure).after(1))
        .build();
    hw.dispense(MountType::Right, 10.0, 100.0, None).await.unwrap();
    let err = hw.dispense(MountType::Right, 10.0, 100.0, None).await.unwrap_err();
    assert!(matches!(err, HardwareError::Overpressure { mount: Mount::Right, .. }));
    assert!(logs_contain("Injecting simulated fault"));
}

#[tokio::test(start_paused = true)]
async fn overlapping_moves_are_detected() {
    let hw = Arc::new(
        SimulatedHardware::builder()
            .mode(SimulationMode::Realistic)
            .build(),
    );
    let a = {
        let hw = Arc::clone(&hw);
        tokio::spawn(async move { hw.move_to(Mount::Left, point(0.0, 0.0, 200.0), None, None).await })
    };
    let b = {
        let hw = Arc::clone(&hw);
        tokio::spawn(async move { hw.move_to(Mount::Right, point(0.0, 0.0, 200.0), None, None).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(hw.peak_concurrent_moves(), 2);
}

#[tokio::test]
async fn configured_robot_records_calls_in_order() {
    let config: HardwareConfig = toml::from_str(
        r#"
        gripper = true
        [pipettes]
        left = "p50_single"
        [[modules]]
        serialNumber = "HS-1"
        model = "heaterShakerModuleV1"
        "#,
    )
    .unwrap();
    let hw = config.build();
    hw.home(None).await.unwrap();
    hw.grip(10.0).await.unwrap();
    hw.ungrip().await.unwrap();
    hw.module_command(
        "HS-1",
        deck_core::hardware::ModuleOperation::SetShakeSpeed { rpm: 500 },
    )
    .await
    .unwrap();

    let calls = hw.calls();
    assert_eq!(calls.len(), 4);
    assert!(matches!(calls[0], HardwareCall::Home { axes: None }));
    assert_eq!(calls.iter().filter(|c| c.is_gripper_call()).count(), 2);
    assert_eq!(
        hw.attached_modules().await.unwrap()[0].model,
        ModuleModel::HeaterShakerModuleV1
    );

    hw.clear_calls();
    assert!(hw.calls().is_empty());
}
