//! 基本步进电机状态机测试（使用 DummyCard）

mod common;

use std::time::Duration;

use mdcard_client::motor::states;
use mdcard_client::{CalibrationMode, CalibrationStatus, ClientError, StepperMotor};
use mdcard_driver::{DriverError, MotorControl};

const TIMEOUT: Duration = Duration::from_secs(5);

fn enabled_motor() -> (std::sync::Arc<mdcard_driver::mock::DummyCard>, StepperMotor) {
    let (dummy, card) = common::open_card();
    let motor = StepperMotor::new(common::motor(&card, 0)).unwrap();
    motor.set_enabled(true).unwrap();
    (dummy, motor)
}

#[test]
fn test_starts_disabled_until_enabled() {
    let (_dummy, card) = common::open_card();
    let motor = StepperMotor::new(common::motor(&card, 0)).unwrap();

    assert_eq!(motor.state(), states::DISABLED);
    assert!(!motor.is_system_idle());
    assert_eq!(
        motor.move_to_position(100).unwrap_err(),
        ClientError::ActionNotAllowed {
            state: states::DISABLED.to_string(),
            action: "move"
        }
    );

    motor.set_enabled(true).unwrap();
    assert_eq!(motor.state(), states::IDLE);
    assert!(motor.is_system_idle());
}

#[test]
fn test_move_completes_to_idle() {
    let (dummy, motor) = enabled_motor();
    dummy.set_steps_per_transaction(Some(100));

    motor.move_to_position(1000).unwrap();
    assert_eq!(motor.state(), states::MOVING);
    assert!(!motor.is_system_idle());

    motor.wait_until_idle(TIMEOUT).unwrap();
    assert_eq!(motor.current_position().unwrap(), 1000);
    assert_eq!(motor.state(), states::IDLE);
}

#[test]
fn test_move_relative() {
    let (_dummy, motor) = enabled_motor();

    motor.move_to_position(-300).unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    motor.move_relative(500).unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    assert_eq!(motor.current_position().unwrap(), 200);
}

#[test]
fn test_stop_while_moving() {
    let (dummy, motor) = enabled_motor();
    dummy.set_steps_per_transaction(Some(10));

    motor.move_to_position(100_000).unwrap();
    assert_eq!(motor.state(), states::MOVING);
    motor.stop().unwrap();
    assert_eq!(motor.state(), states::IDLE);

    motor.wait_until_idle(TIMEOUT).unwrap();
    assert!(motor.current_position().unwrap() < 1000);
}

#[test]
fn test_emergency_stop_and_reset() {
    let (dummy, motor) = enabled_motor();
    dummy.set_steps_per_transaction(Some(10));

    motor.move_to_position(100_000).unwrap();
    motor.emergency_stop().unwrap();
    assert_eq!(motor.state(), states::ERROR);
    assert!(!motor.motor().is_enabled().unwrap());
    assert!(matches!(
        motor.move_to_position(0),
        Err(ClientError::ActionNotAllowed { .. })
    ));

    // error 状态下使能被拒绝，不写硬件
    assert_eq!(
        motor.set_enabled(true).unwrap_err(),
        ClientError::ActionNotAllowed {
            state: states::ERROR.to_string(),
            action: "enable"
        }
    );
    assert!(!motor.motor().is_enabled().unwrap());
    assert_eq!(motor.state(), states::ERROR);

    // 驱动器已关闭，复位后进入 disabled
    motor.reset_error().unwrap();
    assert_eq!(motor.state(), states::DISABLED);
    motor.set_enabled(true).unwrap();
    assert_eq!(motor.state(), states::IDLE);
}

/// 测试运动中不能使能，关闭在任何状态都允许
#[test]
fn test_enable_only_from_idle_or_disabled() {
    let (dummy, motor) = enabled_motor();
    dummy.set_steps_per_transaction(Some(10));

    motor.move_to_position(100_000).unwrap();
    assert!(matches!(
        motor.set_enabled(true),
        Err(ClientError::ActionNotAllowed { action: "enable", .. })
    ));
    assert_eq!(motor.state(), states::MOVING);

    motor.set_enabled(false).unwrap();
    assert_eq!(motor.state(), states::DISABLED);
    assert!(!motor.motor().is_enabled().unwrap());
    motor.set_enabled(true).unwrap();
    assert_eq!(motor.state(), states::IDLE);
    assert!(motor.motor().is_enabled().unwrap());
}

#[test]
fn test_reset_error_requires_error_state() {
    let (_dummy, motor) = enabled_motor();
    assert_eq!(
        motor.reset_error().unwrap_err(),
        ClientError::ActionNotAllowed {
            state: states::IDLE.to_string(),
            action: "reset_error"
        }
    );
}

#[test]
fn test_set_actual_position_marks_simple_calibration() {
    let (dummy, motor) = enabled_motor();
    assert_eq!(motor.calibration_status(), CalibrationStatus::NotCalibrated);

    motor.move_to_position(700).unwrap();
    motor.wait_until_idle(TIMEOUT).unwrap();
    motor.set_actual_position(0).unwrap();

    assert_eq!(motor.current_position().unwrap(), 0);
    assert_eq!(dummy.physical_position(0), 700);
    assert_eq!(
        motor.calibration_status(),
        CalibrationStatus::Calibrated(CalibrationMode::Simple)
    );
    assert_eq!(motor.state(), states::IDLE);
}

#[test]
fn test_set_actual_position_rejected_while_moving() {
    let (dummy, motor) = enabled_motor();
    dummy.set_steps_per_transaction(Some(1));

    motor.move_to_position(100_000).unwrap();
    assert!(matches!(
        motor.set_actual_position(0),
        Err(ClientError::ActionNotAllowed { action: "set_actual_position", .. })
    ));
    motor.stop().unwrap();
}

#[test]
fn test_software_limits() {
    let (_dummy, motor) = enabled_motor();
    motor.set_software_limits(100, -100);
    motor.set_software_limits_enabled(true);

    let limits = motor.software_limits();
    assert_eq!((limits.min, limits.max), (-100, 100));
    assert_eq!(
        motor.move_to_position(200).unwrap_err(),
        ClientError::LimitExceeded {
            target: 200,
            min: -100.0,
            max: 100.0
        }
    );
    motor.move_to_position(100).unwrap();

    motor.set_software_limits_enabled(false);
    motor.wait_until_idle(TIMEOUT).unwrap();
    motor.move_to_position(200).unwrap();
}

#[test]
fn test_position_register_range() {
    let (_dummy, motor) = enabled_motor();
    assert!(matches!(
        motor.move_to_position(9_000_000),
        Err(ClientError::LimitExceeded { target: 9_000_000, .. })
    ));
    assert!(matches!(
        motor.move_relative(i32::MAX),
        Err(ClientError::LimitExceeded { .. })
    ));
}

/// 测试通信失败时进入 error 状态
#[test]
fn test_transport_failure_enters_error() {
    let (dummy, motor) = enabled_motor();

    dummy.stall_next_transactions(3);
    assert!(matches!(
        motor.move_to_position(5),
        Err(ClientError::Driver(DriverError::HandshakeTimeout { attempts: 3, .. }))
    ));
    assert_eq!(motor.state(), states::ERROR);
}

#[test]
fn test_limits_pass_through() {
    let (_dummy, motor) = enabled_motor();

    let max = motor.max_speed_capability();
    assert_eq!(motor.set_user_speed_limit(max * 10.0).unwrap(), max);
    assert_eq!(motor.user_speed_limit(), max);

    let max = motor.max_current_limit();
    assert_eq!(motor.set_user_current_limit(100.0).unwrap(), max);
    assert_eq!(motor.user_current_limit(), max);
}
