//! 步进电机状态机
//!
//! [`StepperMotor`] 把一个 [`MotorControl`] 包装成带状态的电机：
//!
//! ```text
//!            enable                 move
//! disabled ────────► idle ◄──────────────► moving
//!     ▲   ◄──────── │  ▲   stop / action_complete │
//!     │    disable   │  │                          │
//!     │              ▼  │ reset_to_idle            │ emergency_stop / error
//!     └─────────── error ◄─────────────────────────┘
//! ```
//!
//! moving 状态安装内部回调轮询电机速度，电机停止后产生 `action_complete`。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mdcard_driver::MotorControl;
use mdcard_driver::converter::POSITION;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::calibration::{CalibrationMode, CalibrationState, CalibrationStatus, ToleranceStatus};
use crate::error::ClientError;
use crate::state::{Event, StateId, StateMachine, StateMachineBuilder, Transition};

/// 电机状态机事件
pub mod events {
    use crate::state::Event;

    pub const MOVE: Event = Event::new("move");
    pub const STOP: Event = Event::new("stop");
    pub const EMERGENCY_STOP: Event = Event::new("emergency_stop");
    pub const ENABLE: Event = Event::new("enable");
    pub const DISABLE: Event = Event::new("disable");
    pub const RESET_TO_IDLE: Event = Event::new("reset_to_idle");
    pub const ACTION_COMPLETE: Event = Event::new("action_complete");
    pub const ERROR: Event = Event::new("error");
    pub const CALIBRATE: Event = Event::new("calibrate");
    pub const DETERMINE_TOLERANCE: Event = Event::new("determine_tolerance");
}

/// 电机状态名
pub mod states {
    pub const IDLE: &str = "idle";
    pub const MOVING: &str = "moving";
    pub const ERROR: &str = "error";
    pub const DISABLED: &str = "disabled";
    pub const CALIBRATING: &str = "calibrating";
    pub const CALCULATING_TOLERANCE: &str = "calculating_tolerance";
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 软件位置限制（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareLimits {
    pub enabled: bool,
    pub min: i32,
    pub max: i32,
}

impl Default for SoftwareLimits {
    fn default() -> Self {
        Self {
            enabled: false,
            min: POSITION.min(),
            max: POSITION.max(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MotorStates {
    pub(crate) idle: StateId,
    pub(crate) moving: StateId,
    pub(crate) error: StateId,
    pub(crate) disabled: StateId,
}

/// 带状态机的步进电机
pub struct StepperMotor {
    motor: Arc<dyn MotorControl>,
    machine: StateMachine,
    states: MotorStates,
    limits: Mutex<SoftwareLimits>,
    calibration: Arc<Mutex<CalibrationState>>,
}

impl StepperMotor {
    /// 创建电机；驱动器已使能时从 idle 开始，否则从 disabled 开始
    pub fn new(motor: Arc<dyn MotorControl>) -> Result<Self, ClientError> {
        let (stepper, ()) = Self::with_extension(motor, Arc::default(), |_, _| ())?;
        Ok(stepper)
    }

    /// 构造基本状态机，`extend` 可以添加状态和从基本状态出发的转换
    pub(crate) fn with_extension<R>(
        motor: Arc<dyn MotorControl>,
        calibration: Arc<Mutex<CalibrationState>>,
        extend: impl FnOnce(&mut StateMachineBuilder, &MotorStates) -> R,
    ) -> Result<(Self, R), ClientError> {
        let mut builder = StateMachineBuilder::new();
        let states = MotorStates {
            idle: builder.add_state(states::IDLE),
            moving: builder.add_state(states::MOVING),
            error: builder.add_state(states::ERROR),
            disabled: builder.add_state(states::DISABLED),
        };

        let poll_motion = {
            let motor = Arc::clone(&motor);
            move || match motor.is_motor_moving() {
                Ok(true) => None,
                Ok(false) => Some(events::ACTION_COMPLETE),
                Err(e) => {
                    warn!("Motor {}: motion poll failed: {}", motor.id(), e);
                    Some(events::ERROR)
                },
            }
        };
        let moving = Transition::to(states.moving).with_internal(poll_motion);

        let MotorStates {
            idle,
            moving: moving_state,
            error,
            disabled,
        } = states;
        let table: [(StateId, Event, Transition); 19] = [
            (idle, events::MOVE, moving.clone()),
            (idle, events::STOP, Transition::to(idle)),
            (idle, events::ENABLE, Transition::to(idle)),
            (idle, events::DISABLE, Transition::to(disabled)),
            (idle, events::EMERGENCY_STOP, Transition::to(error)),
            (idle, events::ERROR, Transition::to(error)),
            (moving_state, events::MOVE, moving),
            (moving_state, events::STOP, Transition::to(idle)),
            (moving_state, events::ACTION_COMPLETE, Transition::to(idle)),
            (moving_state, events::DISABLE, Transition::to(disabled)),
            (moving_state, events::EMERGENCY_STOP, Transition::to(error)),
            (moving_state, events::ERROR, Transition::to(error)),
            (error, events::RESET_TO_IDLE, Transition::to(idle)),
            (error, events::DISABLE, Transition::to(disabled)),
            (error, events::EMERGENCY_STOP, Transition::to(error)),
            (disabled, events::ENABLE, Transition::to(idle)),
            (disabled, events::DISABLE, Transition::to(disabled)),
            (disabled, events::EMERGENCY_STOP, Transition::to(error)),
            (disabled, events::ERROR, Transition::to(error)),
        ];
        for (from, event, transition) in table {
            builder.add_transition(from, event, transition);
        }

        let extension = extend(&mut builder, &states);

        let initial = if motor.is_enabled()? { idle } else { disabled };
        let machine = builder.build(format!("motor{}", motor.id()), initial);

        Ok((
            Self {
                motor,
                machine,
                states,
                limits: Mutex::new(SoftwareLimits::default()),
                calibration,
            },
            extension,
        ))
    }

    pub fn motor(&self) -> &Arc<dyn MotorControl> {
        &self.motor
    }

    pub(crate) fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub(crate) fn calibration_state(&self) -> &Arc<Mutex<CalibrationState>> {
        &self.calibration
    }

    // ==================== 状态 ====================

    /// 当前状态名（见 [`states`]）；后台动作执行期间为该动作的状态
    pub fn state(&self) -> String {
        self.machine.reported_state_name().to_string()
    }

    /// 处于 idle 且没有后台动作在执行
    pub fn is_system_idle(&self) -> bool {
        self.machine.current_state() == self.states.idle && !self.machine.is_action_in_flight()
    }

    /// 轮询直到 [`is_system_idle`](Self::is_system_idle)
    pub fn wait_until_idle(&self, timeout: Duration) -> Result<(), ClientError> {
        let start = Instant::now();
        loop {
            if self.is_system_idle() {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(ClientError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// 当前状态在 `allowed` 中且没有后台动作
    ///
    /// 拒绝时报告 [`state`](Self::state) 给出的状态。
    pub(crate) fn ensure_state(&self, action: &'static str, allowed: &[StateId]) -> Result<(), ClientError> {
        let current = self.machine.current_state();
        if !self.machine.is_action_in_flight() && allowed.contains(&current) {
            return Ok(());
        }
        let state = self.machine.reported_state();
        Err(ClientError::ActionNotAllowed {
            state: self.machine.state_name(state).to_string(),
            action,
        })
    }

    pub(crate) fn idle_state(&self) -> StateId {
        self.states.idle
    }

    // ==================== 运动 ====================

    /// 运动到绝对位置（idle 或 moving 状态）
    pub fn move_to_position(&self, target: i32) -> Result<(), ClientError> {
        self.ensure_state("move", &[self.states.idle, self.states.moving])?;
        self.check_limits(target)?;

        if let Err(e) = self.motor.set_target_position(target) {
            self.machine.set_and_process_user_event(events::ERROR);
            return Err(e.into());
        }
        self.machine.set_and_process_user_event(events::MOVE);
        Ok(())
    }

    /// 相对当前位置运动
    pub fn move_relative(&self, delta: i32) -> Result<(), ClientError> {
        let target = relative_target(self.current_position()?, delta)?;
        self.move_to_position(target)
    }

    /// 停止运动（目标设为当前位置）
    pub fn stop(&self) -> Result<(), ClientError> {
        let result = self.halt();
        self.machine.set_and_process_user_event(events::STOP);
        result
    }

    /// 急停：停止运动、关闭驱动器，进入 error 状态
    pub fn emergency_stop(&self) -> Result<(), ClientError> {
        let halted = self.halt();
        let disabled = self.motor.set_enabled(false);
        self.machine.set_and_process_user_event(events::EMERGENCY_STOP);
        warn!("Motor {}: emergency stop", self.motor.id());
        halted?;
        disabled?;
        Ok(())
    }

    fn halt(&self) -> Result<(), ClientError> {
        let actual = self.motor.actual_position()?;
        self.motor.set_target_position(actual)?;
        Ok(())
    }

    /// 使能/关闭驱动器
    ///
    /// 只能在 idle 或 disabled 状态使能，其他状态（包括 error）下不写硬件。
    /// 关闭在任何状态都允许。
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        if enabled {
            self.ensure_state("enable", &[self.states.idle, self.states.disabled])?;
        }
        self.motor.set_enabled(enabled)?;
        let event = if enabled { events::ENABLE } else { events::DISABLE };
        self.machine.set_and_process_user_event(event);
        Ok(())
    }

    /// 离开 error 状态；驱动器未使能时进入 disabled
    pub fn reset_error(&self) -> Result<(), ClientError> {
        self.ensure_state("reset_error", &[self.states.error])?;
        self.machine.set_and_process_user_event(events::RESET_TO_IDLE);
        if !self.motor.is_enabled()? {
            self.machine.set_and_process_user_event(events::DISABLE);
        }
        Ok(())
    }

    pub fn current_position(&self) -> Result<i32, ClientError> {
        Ok(self.motor.actual_position()?)
    }

    /// 重设当前位置（只在 idle 状态），记为简单校准
    pub fn set_actual_position(&self, position: i32) -> Result<(), ClientError> {
        self.ensure_state("set_actual_position", &[self.states.idle])?;
        self.motor.set_actual_position(position)?;
        self.motor.set_target_position(position)?;

        let mut calibration = self.calibration.lock();
        calibration.status = CalibrationStatus::Calibrated(CalibrationMode::Simple);
        calibration.record = None;
        calibration.tolerance = ToleranceStatus::NotCalculated;
        info!("Motor {}: position set to {} (simple calibration)", self.motor.id(), position);
        Ok(())
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.calibration.lock().status
    }

    // ==================== 限制 ====================

    pub fn user_speed_limit(&self) -> f64 {
        self.motor.user_speed_limit()
    }

    /// 返回实际生效的速度限制（微步/秒）
    pub fn set_user_speed_limit(&self, usteps_per_second: f64) -> Result<f64, ClientError> {
        Ok(self.motor.set_user_speed_limit(usteps_per_second)?)
    }

    pub fn max_speed_capability(&self) -> f64 {
        self.motor.max_speed_capability()
    }

    pub fn user_current_limit(&self) -> f64 {
        self.motor.user_current_limit()
    }

    /// 返回实际生效的电流限制（安培）
    pub fn set_user_current_limit(&self, amps: f64) -> Result<f64, ClientError> {
        Ok(self.motor.set_user_current_limit(amps)?)
    }

    pub fn max_current_limit(&self) -> f64 {
        self.motor.max_current_limit()
    }

    pub fn software_limits(&self) -> SoftwareLimits {
        *self.limits.lock()
    }

    /// 设置软件限位（两端顺序无关）
    pub fn set_software_limits(&self, a: i32, b: i32) {
        let mut limits = self.limits.lock();
        limits.min = a.min(b);
        limits.max = a.max(b);
    }

    pub fn set_software_limits_enabled(&self, enabled: bool) {
        self.limits.lock().enabled = enabled;
    }

    /// 位置寄存器范围与软件限位
    fn check_limits(&self, target: i32) -> Result<(), ClientError> {
        let limits = *self.limits.lock();
        let (min, max) = if limits.enabled {
            (limits.min.max(POSITION.min()), limits.max.min(POSITION.max()))
        } else {
            (POSITION.min(), POSITION.max())
        };
        if target < min || target > max {
            return Err(ClientError::LimitExceeded {
                target,
                min: f64::from(min),
                max: f64::from(max),
            });
        }
        Ok(())
    }
}

/// `position + delta`，溢出时报告 `LimitExceeded`
pub(crate) fn relative_target(position: i32, delta: i32) -> Result<i32, ClientError> {
    position.checked_add(delta).ok_or(ClientError::LimitExceeded {
        target: position.saturating_add(delta),
        min: f64::from(POSITION.min()),
        max: f64::from(POSITION.max()),
    })
}
