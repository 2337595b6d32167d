//! 带参考（限位）开关的步进电机
//!
//! 在 [`StepperMotor`] 的基本状态上增加 calibrating 和 calculating_tolerance 两个状态。
//! 两者都由 idle 上的异步转换进入。后台动作执行期间状态机内部的当前状态仍是 idle，
//! 但 [`state`](StepperMotorWithReference::state) 报告动作的状态，
//! [`is_system_idle`](StepperMotorWithReference::is_system_idle) 返回 `false`。
//! 动作结束后以 `stop` 回到 idle。
//!
//! 完整校准后，运动目标必须严格位于 `(负开关 + 3·容差, 正开关 - 3·容差)` 内。

use std::sync::Arc;
use std::time::Duration;

use mdcard_driver::MotorControl;
use parking_lot::Mutex;
use tracing::error;

use crate::calibration::{
    CalibrationMode, CalibrationRecord, CalibrationState, CalibrationStatus, ReferenceTask,
    ToleranceStatus,
};
use crate::config::ReferenceConfig;
use crate::error::ClientError;
use crate::motor::{events, relative_target, states, SoftwareLimits, StepperMotor};
use crate::state::{StateId, Transition};

/// 带参考开关的步进电机
pub struct StepperMotorWithReference {
    base: StepperMotor,
    task: Arc<ReferenceTask>,
    calibrating: StateId,
    calculating_tolerance: StateId,
}

impl StepperMotorWithReference {
    pub fn new(motor: Arc<dyn MotorControl>, config: ReferenceConfig) -> Result<Self, ClientError> {
        let calibration = Arc::new(Mutex::new(CalibrationState::default()));
        let task = Arc::new(ReferenceTask::new(
            Arc::clone(&motor),
            config,
            Arc::clone(&calibration),
        ));

        let (base, (calibrating, calculating_tolerance)) =
            StepperMotor::with_extension(motor, calibration, |builder, base_states| {
                let calibrating = builder.add_state(states::CALIBRATING);
                let calculating_tolerance = builder.add_state(states::CALCULATING_TOLERANCE);

                let calibrate = Arc::clone(&task);
                builder.add_transition(
                    base_states.idle,
                    events::CALIBRATE,
                    Transition::to(calibrating).with_async(move || calibrate.calibrate()),
                );
                let tolerance = Arc::clone(&task);
                builder.add_transition(
                    base_states.idle,
                    events::DETERMINE_TOLERANCE,
                    Transition::to(calculating_tolerance)
                        .with_async(move || tolerance.determine_tolerance()),
                );

                for state in [calibrating, calculating_tolerance] {
                    builder
                        .add_transition(state, events::STOP, Transition::to(base_states.idle))
                        .add_transition(state, events::EMERGENCY_STOP, Transition::to(base_states.error))
                        .add_transition(state, events::ERROR, Transition::to(base_states.error));
                }
                (calibrating, calculating_tolerance)
            })?;

        Ok(Self {
            base,
            task,
            calibrating,
            calculating_tolerance,
        })
    }

    /// 基本电机（不做限位开关范围检查）
    pub fn base(&self) -> &StepperMotor {
        &self.base
    }

    pub fn reference_config(&self) -> &ReferenceConfig {
        self.task.config()
    }

    fn calibration(&self) -> &Arc<Mutex<CalibrationState>> {
        self.base.calibration_state()
    }

    // ==================== 长时间动作 ====================

    /// 开始完整校准（后台执行）
    ///
    /// 结果通过 [`calibration_status`](Self::calibration_status) 查询。
    pub fn calibrate(&self) -> Result<(), ClientError> {
        self.base.ensure_state("calibrate", &[self.base.idle_state()])?;
        self.task.reset_flags();
        {
            let mut calibration = self.calibration().lock();
            calibration.status = CalibrationStatus::InProgress;
            calibration.record = None;
            calibration.tolerance = ToleranceStatus::NotCalculated;
        }

        if !self.base.machine().set_and_process_user_event(events::CALIBRATE) {
            error!("Motor {}: calibration could not be started", self.base.motor().id());
            self.calibration().lock().status = CalibrationStatus::Failed;
        }
        Ok(())
    }

    /// 开始容差测量（需要完整校准）
    pub fn determine_tolerance(&self) -> Result<(), ClientError> {
        self.base
            .ensure_state("determine_tolerance", &[self.base.idle_state()])?;
        {
            let mut calibration = self.calibration().lock();
            if calibration.status != CalibrationStatus::Calibrated(CalibrationMode::Full) {
                return Err(ClientError::NotCalibrated);
            }
            calibration.tolerance = ToleranceStatus::InProgress;
        }
        self.task.reset_flags();

        if !self
            .base
            .machine()
            .set_and_process_user_event(events::DETERMINE_TOLERANCE)
        {
            error!("Motor {}: tolerance calculation could not be started", self.base.motor().id());
            self.calibration().lock().tolerance = ToleranceStatus::Failed;
        }
        Ok(())
    }

    /// 停止运动；正在执行的校准/容差测量在下一次轮询时结束
    pub fn stop(&self) -> Result<(), ClientError> {
        self.task.request_stop();
        self.base.stop()
    }

    pub fn emergency_stop(&self) -> Result<(), ClientError> {
        self.task.request_stop();
        self.base.emergency_stop()
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.calibration().lock().status
    }

    pub fn tolerance_status(&self) -> ToleranceStatus {
        self.calibration().lock().tolerance
    }

    /// 完整校准的结果
    pub fn calibration_record(&self) -> Option<CalibrationRecord> {
        self.calibration().lock().record
    }

    /// 最近一次动作中运动是否意外中断
    pub fn was_move_interrupted(&self) -> bool {
        self.task.was_interrupted()
    }

    pub fn is_calibrating(&self) -> bool {
        self.is_pending(self.calibrating)
    }

    pub fn is_calculating_tolerance(&self) -> bool {
        self.is_pending(self.calculating_tolerance)
    }

    fn is_pending(&self, state: StateId) -> bool {
        self.base.machine().reported_state() == state
    }

    // ==================== 运动 ====================

    /// 运动到绝对位置；完整校准后检查限位开关范围
    pub fn move_to_position(&self, target: i32) -> Result<(), ClientError> {
        let record = {
            let calibration = self.calibration().lock();
            match calibration.status {
                CalibrationStatus::Calibrated(CalibrationMode::Full) => calibration.record,
                _ => None,
            }
        };
        if let Some(record) = record
            && !record.allows(target)
        {
            let (min, max) = record.allowed_range();
            return Err(ClientError::LimitExceeded { target, min, max });
        }
        self.base.move_to_position(target)
    }

    pub fn move_relative(&self, delta: i32) -> Result<(), ClientError> {
        let target = relative_target(self.base.current_position()?, delta)?;
        self.move_to_position(target)
    }

    // ==================== 限位开关 ====================

    pub fn is_positive_end_switch_active(&self) -> Result<bool, ClientError> {
        Ok(self.base.motor().reference_switch_data()?.positive_active)
    }

    pub fn is_negative_end_switch_active(&self) -> Result<bool, ClientError> {
        Ok(self.base.motor().reference_switch_data()?.negative_active)
    }

    pub fn is_positive_end_switch_enabled(&self) -> Result<bool, ClientError> {
        Ok(self.base.motor().reference_switch_data()?.positive_enabled)
    }

    pub fn is_negative_end_switch_enabled(&self) -> Result<bool, ClientError> {
        Ok(self.base.motor().reference_switch_data()?.negative_enabled)
    }

    // ==================== 基本操作 ====================

    pub fn state(&self) -> String {
        self.base.state()
    }

    pub fn is_system_idle(&self) -> bool {
        self.base.is_system_idle()
    }

    pub fn wait_until_idle(&self, timeout: Duration) -> Result<(), ClientError> {
        self.base.wait_until_idle(timeout)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.base.set_enabled(enabled)
    }

    pub fn reset_error(&self) -> Result<(), ClientError> {
        self.base.reset_error()
    }

    pub fn current_position(&self) -> Result<i32, ClientError> {
        self.base.current_position()
    }

    /// 重设当前位置（简单校准，清除完整校准的记录）
    pub fn set_actual_position(&self, position: i32) -> Result<(), ClientError> {
        self.base.set_actual_position(position)
    }

    pub fn set_user_speed_limit(&self, usteps_per_second: f64) -> Result<f64, ClientError> {
        self.base.set_user_speed_limit(usteps_per_second)
    }

    pub fn set_user_current_limit(&self, amps: f64) -> Result<f64, ClientError> {
        self.base.set_user_current_limit(amps)
    }

    pub fn software_limits(&self) -> SoftwareLimits {
        self.base.software_limits()
    }

    pub fn set_software_limits(&self, a: i32, b: i32) {
        self.base.set_software_limits(a, b)
    }

    pub fn set_software_limits_enabled(&self, enabled: bool) {
        self.base.set_software_limits_enabled(enabled)
    }
}
