//! 校准与容差测量
//!
//! 两个长时间动作都在状态机启动的后台线程中执行，由两个原子标志控制：
//!
//! - `stop_requested`：用户请求停止，在下一次轮询时生效
//! - `interrupted`：运动意外停止（速度为零，两个限位开关都未触发，且未到达目标）
//!
//! 动作不向外返回错误，结果写入 [`CalibrationStatus`] / [`ToleranceStatus`]。
//! 无论成功与否，动作都以 `stop` 事件结束，使状态机回到 idle。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use mdcard_driver::converter::POSITION;
use mdcard_driver::{DriverError, MotorControl, ReferenceSwitchData};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ReferenceConfig;
use crate::motor::events;
use crate::state::Event;
use crate::statistics::sample_std_dev;

/// 校准方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationMode {
    /// 找到两个限位开关
    Full,
    /// 用户直接设定了当前位置
    Simple,
}

/// 校准状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationStatus {
    #[default]
    NotCalibrated,
    InProgress,
    Calibrated(CalibrationMode),
    /// 后台动作中的通信错误
    Failed,
    /// 运动意外停止
    MoveInterrupted,
    StoppedByUser,
    /// 限位开关未全部使能
    NotAvailable,
}

impl CalibrationStatus {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated(_))
    }
}

/// 容差测量状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ToleranceStatus {
    #[default]
    NotCalculated,
    InProgress,
    Calculated,
    Failed,
}

/// 完整校准的结果
///
/// 位置以负限位开关为零点（微步）。容差是多次接近限位开关时触发位置的样本标准差。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationRecord {
    pub negative_end_switch: i32,
    pub positive_end_switch: i32,
    pub negative_tolerance: f64,
    pub positive_tolerance: f64,
}

impl CalibrationRecord {
    /// 允许的目标范围（开区间），两端各留出 3 倍容差
    pub fn allowed_range(&self) -> (f64, f64) {
        (
            f64::from(self.negative_end_switch) + 3.0 * self.negative_tolerance,
            f64::from(self.positive_end_switch) - 3.0 * self.positive_tolerance,
        )
    }

    pub fn allows(&self, target: i32) -> bool {
        let (min, max) = self.allowed_range();
        let target = f64::from(target);
        target > min && target < max
    }
}

#[derive(Debug, Default)]
pub(crate) struct CalibrationState {
    pub(crate) status: CalibrationStatus,
    pub(crate) tolerance: ToleranceStatus,
    pub(crate) record: Option<CalibrationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Positive,
    Negative,
}

impl Direction {
    fn sign(self) -> i32 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }

    fn opposite(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }

    fn switch_active(self, switches: &ReferenceSwitchData) -> bool {
        match self {
            Direction::Positive => switches.positive_active,
            Direction::Negative => switches.negative_active,
        }
    }
}

/// 一次运动的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    /// 运动方向上的限位开关触发，附带停止位置
    SwitchReached(i32),
    /// 到达目标，开关未触发
    Arrived,
    StoppedByUser,
    Interrupted,
}

/// 后台动作的共享上下文
pub(crate) struct ReferenceTask {
    motor: Arc<dyn MotorControl>,
    config: ReferenceConfig,
    calibration: Arc<Mutex<CalibrationState>>,
    stop_requested: AtomicBool,
    interrupted: AtomicBool,
}

impl ReferenceTask {
    pub(crate) fn new(
        motor: Arc<dyn MotorControl>,
        config: ReferenceConfig,
        calibration: Arc<Mutex<CalibrationState>>,
    ) -> Self {
        Self {
            motor,
            config,
            calibration,
            stop_requested: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset_flags(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    // ==================== 动作入口 ====================

    /// 校准动作（后台线程）
    pub(crate) fn calibrate(&self) -> Option<Event> {
        let id = self.motor.id();
        info!("Motor {}: calibration started", id);

        let status = self.run_calibration().unwrap_or_else(|e| {
            error!("Motor {}: calibration failed: {}", id, e);
            CalibrationStatus::Failed
        });

        let mut state = self.calibration.lock();
        state.status = status;
        if status.is_calibrated() {
            info!("Motor {}: calibration complete {:?}", id, state.record);
        } else {
            state.record = None;
            info!("Motor {}: calibration aborted ({:?})", id, status);
        }
        Some(events::STOP)
    }

    /// 容差测量动作（后台线程）
    pub(crate) fn determine_tolerance(&self) -> Option<Event> {
        let id = self.motor.id();
        info!("Motor {}: tolerance calculation started", id);

        let result = self.run_tolerance().unwrap_or_else(|e| {
            error!("Motor {}: tolerance calculation failed: {}", id, e);
            None
        });

        let mut guard = self.calibration.lock();
        let state = &mut *guard;
        match (result, state.record.as_mut()) {
            (Some((negative, positive)), Some(record)) => {
                record.negative_tolerance = negative;
                record.positive_tolerance = positive;
                state.tolerance = ToleranceStatus::Calculated;
                info!(
                    "Motor {}: tolerance calculated (negative {:.3}, positive {:.3})",
                    id, negative, positive
                );
            },
            _ => {
                state.tolerance = ToleranceStatus::Failed;
                info!("Motor {}: tolerance calculation aborted", id);
            },
        }
        Some(events::STOP)
    }

    // ==================== 校准 ====================

    fn run_calibration(&self) -> Result<CalibrationStatus, DriverError> {
        let switches = self.motor.reference_switch_data()?;
        if !switches.both_enabled() {
            warn!(
                "Motor {}: calibration needs both end switches enabled",
                self.motor.id()
            );
            return Ok(CalibrationStatus::NotAvailable);
        }

        let positive = match self.seek_end_switch(Direction::Positive)? {
            MoveOutcome::SwitchReached(position) => position,
            outcome => return Ok(abort_status(outcome)),
        };
        let negative = match self.seek_end_switch(Direction::Negative)? {
            MoveOutcome::SwitchReached(position) => position,
            outcome => return Ok(abort_status(outcome)),
        };

        // 零点移到负限位开关，目标同步更新以免电机运动
        let rebased = self.motor.actual_position()? - negative;
        self.motor.set_actual_position(rebased)?;
        self.motor.set_target_position(rebased)?;

        let record = CalibrationRecord {
            negative_end_switch: 0,
            positive_end_switch: positive - negative,
            ..Default::default()
        };
        {
            let mut state = self.calibration.lock();
            state.record = Some(record);
            state.tolerance = ToleranceStatus::NotCalculated;
        }

        // 停在中点才算完成
        let midpoint = record.positive_end_switch / 2;
        match self.move_and_wait(midpoint, Direction::Positive)? {
            MoveOutcome::Arrived => Ok(CalibrationStatus::Calibrated(CalibrationMode::Full)),
            outcome => {
                warn!(
                    "Motor {}: move to midpoint {} ended with {:?}",
                    self.motor.id(),
                    midpoint,
                    outcome
                );
                Ok(abort_status(outcome))
            },
        }
    }

    // ==================== 容差 ====================

    /// 返回 `(负侧, 正侧)` 容差；停止或运动中断时返回 `None`
    fn run_tolerance(&self) -> Result<Option<(f64, f64)>, DriverError> {
        let Some(record) = self.calibration.lock().record else {
            return Ok(None);
        };

        let Some(positive) = self.measure_switch(Direction::Positive, record.positive_end_switch)?
        else {
            return Ok(None);
        };
        let Some(negative) = self.measure_switch(Direction::Negative, record.negative_end_switch)?
        else {
            return Ok(None);
        };
        Ok(Some((negative, positive)))
    }

    fn measure_switch(&self, direction: Direction, position: i32) -> Result<Option<f64>, DriverError> {
        let away = position - direction.sign() * self.config.tolerance_approach_offset;
        let mut samples = Vec::with_capacity(self.config.tolerance_trials);

        for trial in 0..self.config.tolerance_trials {
            let outcome = self.move_and_wait(away, direction.opposite())?;
            if outcome != MoveOutcome::Arrived {
                debug!("Motor {}: tolerance trial {} aborted: {:?}", self.motor.id(), trial, outcome);
                return Ok(None);
            }

            let sample = match self.move_and_wait(position, direction)? {
                MoveOutcome::SwitchReached(stopped_at) => stopped_at,
                MoveOutcome::Arrived => match self.seek_end_switch(direction)? {
                    MoveOutcome::SwitchReached(stopped_at) => stopped_at,
                    _ => return Ok(None),
                },
                _ => return Ok(None),
            };
            debug!(
                "Motor {}: {:?} end switch trial {} at {}",
                self.motor.id(),
                direction,
                trial,
                sample
            );
            samples.push(f64::from(sample));
        }

        Ok(Some(sample_std_dev(&samples)))
    }

    // ==================== 运动 ====================

    /// 分步向限位开关运动，直到开关触发、用户停止或运动中断
    fn seek_end_switch(&self, direction: Direction) -> Result<MoveOutcome, DriverError> {
        loop {
            if self.is_stop_requested() {
                self.halt()?;
                return Ok(MoveOutcome::StoppedByUser);
            }

            let actual = self.motor.actual_position()?;
            if direction.switch_active(&self.motor.reference_switch_data()?) {
                return Ok(MoveOutcome::SwitchReached(actual));
            }

            let target = actual
                .saturating_add(direction.sign() * self.config.calibration_step)
                .clamp(POSITION.min(), POSITION.max());
            if target == actual {
                // 已到位置寄存器的边界仍未找到开关
                self.interrupted.store(true, Ordering::SeqCst);
                return Ok(MoveOutcome::Interrupted);
            }

            match self.move_and_wait(target, direction)? {
                MoveOutcome::Arrived => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// 运动到目标并等待停止
    ///
    /// `direction` 决定检查哪一侧的限位开关。
    fn move_and_wait(&self, target: i32, direction: Direction) -> Result<MoveOutcome, DriverError> {
        self.motor.set_target_position(target)?;
        if !self.wait_for_standstill()? {
            self.halt()?;
            return Ok(MoveOutcome::StoppedByUser);
        }

        let switches = self.motor.reference_switch_data()?;
        let actual = self.motor.actual_position()?;
        if direction.switch_active(&switches) {
            return Ok(MoveOutcome::SwitchReached(actual));
        }
        if actual != target {
            warn!(
                "Motor {}: move interrupted at {} (target {})",
                self.motor.id(),
                actual,
                target
            );
            self.interrupted.store(true, Ordering::SeqCst);
            return Ok(MoveOutcome::Interrupted);
        }
        Ok(MoveOutcome::Arrived)
    }

    /// 等待电机停止；用户请求停止时返回 `false`
    fn wait_for_standstill(&self) -> Result<bool, DriverError> {
        loop {
            if self.is_stop_requested() {
                return Ok(false);
            }
            if !self.motor.is_motor_moving()? {
                return Ok(true);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// 目标设为当前位置
    fn halt(&self) -> Result<(), DriverError> {
        let actual = self.motor.actual_position()?;
        self.motor.set_target_position(actual)
    }
}

fn abort_status(outcome: MoveOutcome) -> CalibrationStatus {
    match outcome {
        MoveOutcome::StoppedByUser => CalibrationStatus::StoppedByUser,
        MoveOutcome::Interrupted => CalibrationStatus::MoveInterrupted,
        MoveOutcome::SwitchReached(_) | MoveOutcome::Arrived => CalibrationStatus::Failed,
    }
}
