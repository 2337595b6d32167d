//! 电机控制器
//!
//! 每个电机一个 [`MotorControlerImpl`]，提供全部逻辑寄存器的类型化读写。
//!
//! # 并发
//!
//! - 每个控制器持有自己的 `Mutex<MotorState>`，所有寄存器访问都在该锁内完成，
//!   因此同一电机上的"读-改-写"序列不会交错
//! - TMC429 会话由整张卡共享，其传输内部另有一把锁
//! - 加锁顺序固定为：电机锁 → 传输锁
//!
//! # 单位
//!
//! - 位置、速度、加速度为微步（寄存器原始值，经 [`SignedIntConverter`] 做符号扩展）
//! - 用户速度限制为微步/秒，用户电流限制为安培；设置时钳位到配置范围，并返回实际生效的值
//!
//! [`SignedIntConverter`]: crate::converter::SignedIntConverter

use std::sync::Arc;

use mdcard_protocol::tmc260::{
    ChopperControlData, CoolStepControlData, DriverConfigData, DriverControlData,
    DriverStatusFlags, StallGuardControlData,
};
use mdcard_protocol::tmc429::{
    AccelerationThresholdData, CommonRegister, ControlerRegister, ControlerRegisterKind,
    ControlerStatusBits, DividersAndMicroStepResolutionData, InterruptData, MotorRegister,
    ProportionalityFactorData, ReferenceConfigAndRampModeData, ReferenceSwitchBits, Selector,
};
use mdcard_protocol::word::{DataWord, Field};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{names, RegisterBackend, ScalarRegister};
use crate::config::{MotorControlerConfig, MotorDriverCardConfig};
use crate::converter::{CurrentConverter, SpeedConverter, ACCELERATION, POSITION, VELOCITY};
use crate::error::DriverError;
use crate::session::{ControlerSpiSession, DriverSpiSession};
use crate::spi::HandshakeTransport;

const MINIMUM_VELOCITY: Field = Field::new("V_MIN", 0, 10);
const MAXIMUM_VELOCITY: Field = Field::new("V_MAX", 0, 10);
const MAXIMUM_ACCELERATION: Field = Field::new("A_MAX", 0, 10);
const DX_REFERENCE_TOLERANCE: Field = Field::new("DX_REF_TOLERANCE", 0, 11);
const MICROSTEP_COUNT: Field = Field::new("MSTEP", 0, 9);

/// 参考（限位）开关状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceSwitchData {
    pub positive_active: bool,
    pub negative_active: bool,
    pub positive_enabled: bool,
    pub negative_enabled: bool,
}

impl ReferenceSwitchData {
    pub fn both_enabled(&self) -> bool {
        self.positive_enabled && self.negative_enabled
    }
}

/// 客户端层使用的电机控制接口
///
/// 某些硬件变体才有的操作提供返回 `NotSupported` 的默认实现。
pub trait MotorControl: Send + Sync {
    fn id(&self) -> u8;

    fn actual_position(&self) -> Result<i32, DriverError>;

    /// 重设当前位置（不运动）
    fn set_actual_position(&self, steps: i32) -> Result<(), DriverError>;

    fn target_position(&self) -> Result<i32, DriverError>;

    /// 设置目标位置（开始运动）
    fn set_target_position(&self, steps: i32) -> Result<(), DriverError>;

    fn actual_velocity(&self) -> Result<i32, DriverError>;

    fn is_motor_moving(&self) -> Result<bool, DriverError>;

    fn target_position_reached(&self) -> Result<bool, DriverError>;

    fn reference_switch_data(&self) -> Result<ReferenceSwitchData, DriverError>;

    fn set_positive_reference_switch_enabled(&self, enabled: bool) -> Result<(), DriverError>;

    fn set_negative_reference_switch_enabled(&self, enabled: bool) -> Result<(), DriverError>;

    fn is_enabled(&self) -> Result<bool, DriverError>;

    fn set_enabled(&self, enabled: bool) -> Result<(), DriverError>;

    fn user_speed_limit(&self) -> f64;

    /// 返回实际生效的速度限制（微步/秒）
    fn set_user_speed_limit(&self, usteps_per_second: f64) -> Result<f64, DriverError>;

    fn max_speed_capability(&self) -> f64;

    fn user_current_limit(&self) -> f64;

    /// 返回实际生效的电流限制（安培）
    fn set_user_current_limit(&self, amps: f64) -> Result<f64, DriverError>;

    fn max_current_limit(&self) -> f64;

    /// 限位开关供电；旧固件没有该寄存器时返回 `false`
    fn is_end_switch_powered(&self) -> Result<bool, DriverError>;

    fn set_end_switch_power(&self, enabled: bool) -> Result<(), DriverError>;

    fn decoder_position(&self) -> Result<i32, DriverError> {
        Err(DriverError::NotSupported("decoder position".to_string()))
    }

    fn decoder_readout_mode(&self) -> Result<u32, DriverError> {
        Err(DriverError::NotSupported("decoder readout mode".to_string()))
    }

    fn set_decoder_readout_mode(&self, _mode: u32) -> Result<(), DriverError> {
        Err(DriverError::NotSupported("decoder readout mode".to_string()))
    }
}

/// 控制器私有状态（由电机锁保护）
struct MotorState {
    config: MotorControlerConfig,
    driver_control: DriverControlData,
    chopper_control: ChopperControlData,
    cool_step_control: CoolStepControlData,
    stall_guard_control: StallGuardControlData,
    driver_config: DriverConfigData,
    system_clock_hz: u32,
    speed: SpeedConverter,
    current: CurrentConverter,
    /// 配置中的电流缩放，用户电流限制的上限
    max_current_scale: u32,
    user_speed_limit: f64,
    user_current_limit: f64,
    position_tolerance: u32,
}

/// TMC429 + TMC260 电机控制器
pub struct MotorControlerImpl {
    id: u8,
    controler: Arc<ControlerSpiSession>,
    driver: DriverSpiSession,
    driver_enable: ScalarRegister,
    end_switch_power: Option<ScalarRegister>,
    calibration_time: Option<ScalarRegister>,
    state: Mutex<MotorState>,
}

impl MotorControlerImpl {
    /// 创建控制器并写入配置中的寄存器默认值
    pub fn new(
        id: u8,
        controler: Arc<ControlerSpiSession>,
        backend: &Arc<dyn RegisterBackend>,
        module: &str,
        card_config: &MotorDriverCardConfig,
    ) -> Result<Self, DriverError> {
        let config = card_config
            .motors
            .get(usize::from(id))
            .cloned()
            .ok_or(DriverError::InvalidMotorId {
                id,
                available: card_config.motors.len(),
            })?;

        let transport = HandshakeTransport::new(
            ScalarRegister::open(backend, module, &names::driver_spi_write(id))?,
            ScalarRegister::open(backend, module, &names::driver_spi_sync(id))?,
            None,
            config.driver_spi_timing(card_config.spi_poll_count),
        );

        let dividers = DividersAndMicroStepResolutionData::from_payload(
            Selector::motor(id)?,
            config.dividers_and_micro_step_resolution_data,
        )?;
        let speed = SpeedConverter::new(card_config.system_clock_hz, dividers.pulse_divider());
        let current = CurrentConverter::new(config.max_current_amps);
        let stall_guard_control = config.stall_guard_control()?;

        let state = MotorState {
            driver_control: config.driver_control()?,
            chopper_control: config.chopper_control()?,
            cool_step_control: config.cool_step_control()?,
            driver_config: config.driver_config()?,
            user_speed_limit: speed.to_usteps_per_second(config.maximum_velocity),
            user_current_limit: current.to_amps(stall_guard_control.current_scale()),
            position_tolerance: config.position_tolerance,
            system_clock_hz: card_config.system_clock_hz,
            max_current_scale: stall_guard_control.current_scale(),
            stall_guard_control,
            speed,
            current,
            config,
        };

        let motor = Self {
            id,
            controler,
            driver: DriverSpiSession::new(transport),
            driver_enable: ScalarRegister::open(backend, module, &names::driver_enable(id))?,
            end_switch_power: ScalarRegister::open_optional(
                backend,
                module,
                &names::end_switch_power(id),
            ),
            calibration_time: ScalarRegister::open_optional(
                backend,
                module,
                &names::calibration_time(id),
            ),
            state: Mutex::new(state),
        };
        motor.apply_config()?;
        info!("Motor {} on {} initialized", id, module);
        Ok(motor)
    }

    fn apply_config(&self) -> Result<(), DriverError> {
        let state = self.state.lock();
        let config = &state.config;

        self.driver.write(&state.driver_config)?;
        self.driver.write(&state.driver_control)?;
        self.driver.write(&state.chopper_control)?;
        self.driver.write(&state.stall_guard_control)?;
        self.driver.write(&state.cool_step_control)?;

        for (register, payload) in [
            (MotorRegister::AccelerationThreshold, config.acceleration_threshold_data),
            (MotorRegister::ProportionalityFactors, config.proportionality_factors),
            (MotorRegister::ReferenceConfigAndRampMode, config.reference_config_and_ramp_mode_data),
            (MotorRegister::InterruptFlags, config.interrupt_data),
            (
                MotorRegister::DividersAndMicroStepResolution,
                config.dividers_and_micro_step_resolution_data,
            ),
            (MotorRegister::MaximumAcceleration, config.maximum_acceleration),
            (MotorRegister::MaximumVelocity, config.maximum_velocity),
            (MotorRegister::MinimumVelocity, config.minimum_velocity),
            (MotorRegister::DeltaXReferenceTolerance, config.dx_reference_tolerance),
            (MotorRegister::MicroStepCount, config.microstep_count),
            (MotorRegister::ActualPosition, POSITION.to_raw(config.actual_position)),
            (MotorRegister::TargetPosition, POSITION.to_raw(config.target_position)),
            (MotorRegister::TargetVelocity, VELOCITY.to_raw(config.target_velocity)),
        ] {
            self.write_motor(register, payload)?;
        }

        self.driver_enable.write(i32::from(config.enabled))
    }

    fn selector(&self) -> Selector {
        Selector::Motor(self.id)
    }

    fn read_motor(&self, register: MotorRegister) -> Result<u32, DriverError> {
        self.controler.read(self.selector(), register.into())
    }

    fn write_motor(&self, register: MotorRegister, payload: u32) -> Result<(), DriverError> {
        self.controler.write(self.selector(), register.into(), payload)
    }

    fn write_checked(&self, register: MotorRegister, field: Field, value: u32) -> Result<(), DriverError> {
        let payload = DataWord::default().with(field, value)?.raw();
        self.write_motor(register, payload)
    }

    // ==================== 位置与速度 ====================

    pub fn minimum_velocity(&self) -> Result<u32, DriverError> {
        let _state = self.state.lock();
        self.read_motor(MotorRegister::MinimumVelocity)
    }

    pub fn set_minimum_velocity(&self, value: u32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_checked(MotorRegister::MinimumVelocity, MINIMUM_VELOCITY, value)
    }

    pub fn maximum_velocity(&self) -> Result<u32, DriverError> {
        let _state = self.state.lock();
        self.read_motor(MotorRegister::MaximumVelocity)
    }

    /// 直接写 V_MAX，返回实际写入的寄存器值
    ///
    /// 超出配置的 `maximum_velocity` 时钳位到该值，用户速度限制随之更新。
    pub fn set_maximum_velocity(&self, value: u32) -> Result<u32, DriverError> {
        let mut state = self.state.lock();
        let register = value.min(state.config.maximum_velocity);
        self.write_checked(MotorRegister::MaximumVelocity, MAXIMUM_VELOCITY, register)?;
        state.user_speed_limit = state.speed.to_usteps_per_second(register);
        if register != value {
            debug!("Motor {}: V_MAX {} clamped to {}", self.id, value, register);
        }
        Ok(register)
    }

    pub fn target_velocity(&self) -> Result<i32, DriverError> {
        let _state = self.state.lock();
        Ok(VELOCITY.to_signed(self.read_motor(MotorRegister::TargetVelocity)?))
    }

    pub fn set_target_velocity(&self, value: i32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_motor(MotorRegister::TargetVelocity, VELOCITY.to_raw(value))
    }

    pub fn maximum_acceleration(&self) -> Result<u32, DriverError> {
        let _state = self.state.lock();
        self.read_motor(MotorRegister::MaximumAcceleration)
    }

    pub fn set_maximum_acceleration(&self, value: u32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_checked(MotorRegister::MaximumAcceleration, MAXIMUM_ACCELERATION, value)
    }

    pub fn actual_acceleration(&self) -> Result<i32, DriverError> {
        let _state = self.state.lock();
        Ok(ACCELERATION.to_signed(self.read_motor(MotorRegister::ActualAcceleration)?))
    }

    pub fn dx_reference_tolerance(&self) -> Result<u32, DriverError> {
        let _state = self.state.lock();
        self.read_motor(MotorRegister::DeltaXReferenceTolerance)
    }

    pub fn set_dx_reference_tolerance(&self, value: u32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_checked(MotorRegister::DeltaXReferenceTolerance, DX_REFERENCE_TOLERANCE, value)
    }

    /// 到位判定的位置容差（微步）
    pub fn position_tolerance(&self) -> u32 {
        self.state.lock().position_tolerance
    }

    pub fn set_position_tolerance(&self, steps: u32) {
        self.state.lock().position_tolerance = steps;
    }

    pub fn latched_position(&self) -> Result<i32, DriverError> {
        let _state = self.state.lock();
        Ok(POSITION.to_signed(self.read_motor(MotorRegister::PositionLatched)?))
    }

    pub fn microstep_count(&self) -> Result<u32, DriverError> {
        let _state = self.state.lock();
        self.read_motor(MotorRegister::MicroStepCount)
    }

    pub fn set_microstep_count(&self, value: u32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_checked(MotorRegister::MicroStepCount, MICROSTEP_COUNT, value)
    }

    // ==================== TMC429 带字段寄存器 ====================

    pub fn acceleration_threshold_data(&self) -> Result<AccelerationThresholdData, DriverError> {
        let _state = self.state.lock();
        self.controler.read_register(self.selector())
    }

    pub fn set_acceleration_threshold_data(&self, data: AccelerationThresholdData) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_own_register(data)
    }

    pub fn proportionality_factor_data(&self) -> Result<ProportionalityFactorData, DriverError> {
        let _state = self.state.lock();
        self.controler.read_register(self.selector())
    }

    pub fn set_proportionality_factor_data(&self, data: ProportionalityFactorData) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_own_register(data)
    }

    pub fn reference_config_and_ramp_mode_data(&self) -> Result<ReferenceConfigAndRampModeData, DriverError> {
        let _state = self.state.lock();
        self.controler.read_register(self.selector())
    }

    pub fn set_reference_config_and_ramp_mode_data(
        &self,
        data: ReferenceConfigAndRampModeData,
    ) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_own_register(data)
    }

    pub fn interrupt_data(&self) -> Result<InterruptData, DriverError> {
        let _state = self.state.lock();
        self.controler.read_register(self.selector())
    }

    pub fn set_interrupt_data(&self, data: InterruptData) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_own_register(data)
    }

    pub fn dividers_and_micro_step_resolution_data(
        &self,
    ) -> Result<DividersAndMicroStepResolutionData, DriverError> {
        let _state = self.state.lock();
        self.controler.read_register(self.selector())
    }

    /// 写分频器
    ///
    /// 脉冲分频改变后按新的换算重新写 V_MAX，使硬件速度尽量保持原来的用户速度限制
    /// （仍不超过配置的 `maximum_velocity`），用户速度限制取实际写入的值。
    pub fn set_dividers_and_micro_step_resolution_data(
        &self,
        data: DividersAndMicroStepResolutionData,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.write_own_register(data)?;
        state.speed = SpeedConverter::new(state.system_clock_hz, data.pulse_divider());
        let register = state
            .speed
            .to_register(state.user_speed_limit)
            .min(state.config.maximum_velocity);
        self.write_motor(MotorRegister::MaximumVelocity, register)?;
        state.user_speed_limit = state.speed.to_usteps_per_second(register);
        Ok(())
    }

    /// 写入本电机的带字段寄存器（选择器强制为本电机）
    fn write_own_register<K: ControlerRegisterKind>(
        &self,
        data: ControlerRegister<K>,
    ) -> Result<(), DriverError> {
        let mut word = data.input_word();
        word.set_selector(self.selector())?;
        self.controler.write_word(word)
    }

    // ==================== TMC260 寄存器（只写，本地缓存） ====================

    pub fn driver_control_data(&self) -> DriverControlData {
        self.state.lock().driver_control
    }

    pub fn set_driver_control_data(&self, data: DriverControlData) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.driver.write(&data)?;
        state.driver_control = data;
        Ok(())
    }

    pub fn chopper_control_data(&self) -> ChopperControlData {
        self.state.lock().chopper_control
    }

    pub fn set_chopper_control_data(&self, data: ChopperControlData) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.driver.write(&data)?;
        state.chopper_control = data;
        Ok(())
    }

    pub fn cool_step_control_data(&self) -> CoolStepControlData {
        self.state.lock().cool_step_control
    }

    pub fn set_cool_step_control_data(&self, data: CoolStepControlData) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.driver.write(&data)?;
        state.cool_step_control = data;
        Ok(())
    }

    pub fn stall_guard_control_data(&self) -> StallGuardControlData {
        self.state.lock().stall_guard_control
    }

    /// 写 SGCS；电流缩放超过配置值时钳位，用户电流限制随之更新
    pub fn set_stall_guard_control_data(&self, data: StallGuardControlData) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let mut data = data;
        if data.current_scale() > state.max_current_scale {
            debug!(
                "Motor {}: current scale {} clamped to {}",
                self.id,
                data.current_scale(),
                state.max_current_scale
            );
            data.set_current_scale(state.max_current_scale)?;
        }
        self.driver.write(&data)?;
        state.stall_guard_control = data;
        state.user_current_limit = state.current.to_amps(data.current_scale());
        Ok(())
    }

    pub fn driver_config_data(&self) -> DriverConfigData {
        self.state.lock().driver_config
    }

    pub fn set_driver_config_data(&self, data: DriverConfigData) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.driver.write(&data)?;
        state.driver_config = data;
        Ok(())
    }

    /// 驱动器状态标志（需要驱动器读回链路）
    pub fn driver_status(&self) -> Result<DriverStatusFlags, DriverError> {
        let state = self.state.lock();
        let response = self.driver.read_response(&state.driver_config)?;
        Ok(DriverStatusFlags::from_response(response))
    }

    // ==================== 状态与可选寄存器 ====================

    /// 控制器状态字节
    pub fn controler_status(&self) -> Result<ControlerStatusBits, DriverError> {
        let _state = self.state.lock();
        self.controler.status()
    }

    /// 校准时间（固件写入的时间戳）；旧固件返回 `None`
    pub fn calibration_time(&self) -> Result<Option<u32>, DriverError> {
        let _state = self.state.lock();
        match &self.calibration_time {
            Some(register) => Ok(Some(register.read_bits()?)),
            None => Ok(None),
        }
    }

    pub fn set_calibration_time(&self, time: u32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        match &self.calibration_time {
            Some(register) => register.write_bits(time),
            None => {
                debug!("Motor {}: calibration time register not available", self.id);
                Ok(())
            },
        }
    }

    pub fn config(&self) -> MotorControlerConfig {
        self.state.lock().config.clone()
    }
}

impl MotorControl for MotorControlerImpl {
    fn id(&self) -> u8 {
        self.id
    }

    fn actual_position(&self) -> Result<i32, DriverError> {
        let _state = self.state.lock();
        Ok(POSITION.to_signed(self.read_motor(MotorRegister::ActualPosition)?))
    }

    fn set_actual_position(&self, steps: i32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_motor(MotorRegister::ActualPosition, POSITION.to_raw(steps))
    }

    fn target_position(&self) -> Result<i32, DriverError> {
        let _state = self.state.lock();
        Ok(POSITION.to_signed(self.read_motor(MotorRegister::TargetPosition)?))
    }

    fn set_target_position(&self, steps: i32) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.write_motor(MotorRegister::TargetPosition, POSITION.to_raw(steps))
    }

    fn actual_velocity(&self) -> Result<i32, DriverError> {
        let _state = self.state.lock();
        Ok(VELOCITY.to_signed(self.read_motor(MotorRegister::ActualVelocity)?))
    }

    fn is_motor_moving(&self) -> Result<bool, DriverError> {
        Ok(self.actual_velocity()? != 0)
    }

    /// 状态字节中的 xEQt 位，或位置误差在容差内
    fn target_position_reached(&self) -> Result<bool, DriverError> {
        let state = self.state.lock();
        let output = self
            .controler
            .read_output(self.selector(), MotorRegister::TargetPosition.into())?;
        if output.status().target_reached(self.id) {
            return Ok(true);
        }
        if state.position_tolerance == 0 {
            return Ok(false);
        }
        let target = POSITION.to_signed(output.payload());
        let actual = POSITION.to_signed(self.read_motor(MotorRegister::ActualPosition)?);
        Ok(actual.abs_diff(target) <= state.position_tolerance)
    }

    fn reference_switch_data(&self) -> Result<ReferenceSwitchData, DriverError> {
        let _state = self.state.lock();
        let switches = ReferenceSwitchBits::from_payload(
            self.controler
                .read(Selector::Common, CommonRegister::ReferenceSwitches.into())?,
        );
        let config: ReferenceConfigAndRampModeData = self.controler.read_register(self.selector())?;
        Ok(ReferenceSwitchData {
            positive_active: switches.positive_active(self.id),
            negative_active: switches.negative_active(self.id),
            positive_enabled: config.positive_switch_enabled(),
            negative_enabled: config.negative_switch_enabled(),
        })
    }

    fn set_positive_reference_switch_enabled(&self, enabled: bool) -> Result<(), DriverError> {
        let _state = self.state.lock();
        let mut config: ReferenceConfigAndRampModeData = self.controler.read_register(self.selector())?;
        config.set_positive_switch_enabled(enabled);
        self.controler.write_register(&config)
    }

    fn set_negative_reference_switch_enabled(&self, enabled: bool) -> Result<(), DriverError> {
        let _state = self.state.lock();
        let mut config: ReferenceConfigAndRampModeData = self.controler.read_register(self.selector())?;
        config.set_negative_switch_enabled(enabled);
        self.controler.write_register(&config)
    }

    fn is_enabled(&self) -> Result<bool, DriverError> {
        let _state = self.state.lock();
        Ok(self.driver_enable.read()? != 0)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), DriverError> {
        let _state = self.state.lock();
        self.driver_enable.write(i32::from(enabled))
    }

    fn user_speed_limit(&self) -> f64 {
        self.state.lock().user_speed_limit
    }

    fn set_user_speed_limit(&self, usteps_per_second: f64) -> Result<f64, DriverError> {
        let mut state = self.state.lock();
        let register = state
            .speed
            .to_register(usteps_per_second)
            .min(state.config.maximum_velocity);
        self.write_motor(MotorRegister::MaximumVelocity, register)?;
        state.user_speed_limit = state.speed.to_usteps_per_second(register);
        debug!(
            "Motor {}: speed limit {} requested, {} applied",
            self.id, usteps_per_second, state.user_speed_limit
        );
        Ok(state.user_speed_limit)
    }

    fn max_speed_capability(&self) -> f64 {
        let state = self.state.lock();
        state.speed.to_usteps_per_second(state.config.maximum_velocity)
    }

    fn user_current_limit(&self) -> f64 {
        self.state.lock().user_current_limit
    }

    fn set_user_current_limit(&self, amps: f64) -> Result<f64, DriverError> {
        let mut state = self.state.lock();
        let current_scale = state.current.to_current_scale(amps).min(state.max_current_scale);

        let mut data = state.stall_guard_control;
        data.set_current_scale(current_scale)?;
        self.driver.write(&data)?;
        state.stall_guard_control = data;
        state.user_current_limit = state.current.to_amps(current_scale);
        debug!(
            "Motor {}: current limit {} A requested, {} A applied",
            self.id, amps, state.user_current_limit
        );
        Ok(state.user_current_limit)
    }

    fn max_current_limit(&self) -> f64 {
        let state = self.state.lock();
        state.current.to_amps(state.max_current_scale)
    }

    fn is_end_switch_powered(&self) -> Result<bool, DriverError> {
        let _state = self.state.lock();
        match &self.end_switch_power {
            Some(register) => Ok(register.read()? != 0),
            None => Ok(false),
        }
    }

    fn set_end_switch_power(&self, enabled: bool) -> Result<(), DriverError> {
        let _state = self.state.lock();
        match &self.end_switch_power {
            Some(register) => register.write(i32::from(enabled)),
            None => {
                debug!("Motor {}: end switch power register not available", self.id);
                Ok(())
            },
        }
    }
}
