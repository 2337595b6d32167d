//! 端到端测试：注册表 → 驱动卡 → 电机控制器 → 状态机
//!
//! 全部使用模拟驱动卡，无需硬件。

use std::sync::Arc;
use std::time::Duration;

use mdcard_sdk::driver::mock::DummyCard;
use mdcard_sdk::driver::spi::{MAX_ATTEMPTS, SYNC_ERROR};
use mdcard_sdk::prelude::*;

const MODULE: &str = "MD22";
const TIMEOUT: Duration = Duration::from_secs(10);

fn fast_config() -> MotorDriverCardConfig {
    let mut config = MotorDriverCardConfig {
        controler_spi_waiting_time_us: 0,
        spi_poll_count: 2,
        ..Default::default()
    };
    for motor in &mut config.motors {
        motor.driver_spi_waiting_time_us = 0;
    }
    config
}

fn open(registry: &CardRegistry, dummy: &Arc<DummyCard>) -> Arc<MotorDriverCard> {
    let backend: Arc<dyn RegisterBackend> = dummy.clone();
    registry
        .get_or_open("sim0", MODULE, || {
            MotorDriverCard::new(backend, MODULE, fast_config())
        })
        .unwrap()
}

fn reference_motor(card: &MotorDriverCard, id: u8) -> StepperMotorWithReference {
    let controler: Arc<dyn MotorControl> = card.motor_controler(id).unwrap();
    let motor = StepperMotorWithReference::new(controler, ReferenceConfig::default()).unwrap();
    motor.set_enabled(true).unwrap();
    motor
}

/// 测试完整流程：校准、容差测量、限位开关范围内运动
#[test]
fn test_calibration_workflow() {
    mdcard_sdk::init_logging();
    let registry = CardRegistry::new();
    let dummy = DummyCard::new(MODULE);
    dummy.set_end_switches(1, Some(-10_000), Some(10_000));
    let card = open(&registry, &dummy);
    let motor = reference_motor(&card, 1);

    motor.calibrate().unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    assert_eq!(
        motor.calibration_status(),
        CalibrationStatus::Calibrated(CalibrationMode::Full)
    );
    assert_eq!(motor.current_position().unwrap(), 10_000);

    motor.determine_tolerance().unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    assert_eq!(motor.tolerance_status(), ToleranceStatus::Calculated);
    assert_eq!(
        motor.calibration_record(),
        Some(CalibrationRecord {
            negative_end_switch: 0,
            positive_end_switch: 20_000,
            negative_tolerance: 0.0,
            positive_tolerance: 0.0,
        })
    );

    motor.move_to_position(12_345).unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    assert_eq!(motor.current_position().unwrap(), 12_345);
    assert_eq!(dummy.physical_position(1), 2_345);

    // 其他电机不受影响
    assert_eq!(dummy.physical_position(0), 0);
}

/// 测试注册表中同一张卡被多个电机对象共享
#[test]
fn test_registry_shares_card() {
    let registry = CardRegistry::new();
    let dummy = DummyCard::new(MODULE);

    let first = open(&registry, &dummy);
    let second = open(&registry, &dummy);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.number_of_motors(), 2);

    let a = StepperMotor::new(first.motor_controler(0).unwrap()).unwrap();
    let b = StepperMotor::new(second.motor_controler(1).unwrap()).unwrap();
    a.set_enabled(true).unwrap();
    b.set_enabled(true).unwrap();
    a.move_to_position(100).unwrap();
    b.move_to_position(-100).unwrap();
    a.wait_until_idle(TIMEOUT).unwrap();
    b.wait_until_idle(TIMEOUT).unwrap();

    assert_eq!(dummy.physical_position(0), 100);
    assert_eq!(dummy.physical_position(1), -100);
}

/// 测试握手：两次不应答后第三次成功
#[test]
fn test_handshake_recovers_within_attempts() {
    let registry = CardRegistry::new();
    let dummy = DummyCard::new(MODULE);
    let card = open(&registry, &dummy);
    let motor = StepperMotor::new(card.motor_controler(0).unwrap()).unwrap();
    motor.set_enabled(true).unwrap();

    dummy.stall_next_transactions(MAX_ATTEMPTS - 1);
    motor.move_to_position(500).unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    assert_eq!(motor.current_position().unwrap(), 500);
}

/// 测试握手：全部尝试都不应答时超时，电机进入 error
#[test]
fn test_handshake_exhausted() {
    let registry = CardRegistry::new();
    let dummy = DummyCard::new(MODULE);
    let card = open(&registry, &dummy);
    let motor = StepperMotor::new(card.motor_controler(0).unwrap()).unwrap();
    motor.set_enabled(true).unwrap();

    dummy.stall_next_transactions(MAX_ATTEMPTS);
    let err = motor.move_to_position(500).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Driver(DriverError::HandshakeTimeout { attempts, .. }) if attempts == MAX_ATTEMPTS
    ));
    assert_eq!(motor.state(), "error");

    motor.reset_error().unwrap();
    assert_eq!(motor.state(), "idle");
}

/// 测试握手：错误值立即失败，不再重试
#[test]
fn test_handshake_fault_is_not_retried() {
    let registry = CardRegistry::new();
    let dummy = DummyCard::new(MODULE);
    let card = open(&registry, &dummy);
    let controler = card.motor_controler(0).unwrap();

    dummy.force_sync_value(Some(SYNC_ERROR));
    let before = dummy.transactions();
    let err = controler.set_target_position(10).unwrap_err();
    assert!(matches!(err, DriverError::HandshakeFault { value, .. } if value == SYNC_ERROR as u32));
    assert_eq!(dummy.transactions(), before + 1);

    dummy.force_sync_value(None);
    controler.set_target_position(10).unwrap();
    assert_eq!(controler.actual_position().unwrap(), 10);
}

/// 测试固件版本不匹配时驱动卡打开失败，且不登记
#[test]
fn test_firmware_mismatch_is_fatal() {
    let registry = CardRegistry::new();
    let dummy = DummyCard::new(MODULE);
    dummy.set_firmware_version(0x0001_0400);

    let backend: Arc<dyn RegisterBackend> = dummy.clone();
    let result = registry.get_or_open("sim0", MODULE, || {
        MotorDriverCard::new(backend, MODULE, fast_config())
    });
    assert!(matches!(result, Err(DriverError::FirmwareVersionMismatch { .. })));
    assert!(registry.is_empty());
}
