//! 模拟驱动卡（无需硬件）
//!
//! [`DummyCard`] 实现 [`RegisterBackend`]，在内存中模拟：
//!
//! - SPI 握手：写寄存器被写入后立即把同步寄存器置为 `SYNC_OK`
//! - TMC429：解码输入字，维护寄存器文件，读请求写入读回寄存器
//! - TMC260：记录每个电机收到的数据报
//! - 电机运动：写目标位置后立即到位，或每次事务前进 N 步
//! - 限位开关：物理位置、逐次接近的抖动、由参考配置寄存器决定是否停止电机
//! - 障碍物：运动在该位置意外停止
//! - 故障注入：接下来 N 次事务不应答，或强制同步寄存器的值
//!
//! 模拟只关心位置与限位，不检查驱动器使能。
//!
//! # 坐标
//!
//! 开关和障碍物使用物理坐标；寄存器中的位置是逻辑坐标（`logical = physical - origin`）。
//! 写 X_ACTUAL 只平移原点，不引起运动。

use std::collections::HashMap;
use std::sync::Arc;

use mdcard_protocol::tmc429::{
    CommonRegister, ControlerInputWord, MotorRegister, Selector, CHIP_VERSION, MAX_MOTORS,
};
use mdcard_protocol::tmc429::kind::ReferenceConfigAndRampMode;
use mdcard_protocol::word::DataWord;
use mdcard_protocol::RegisterWord;
use parking_lot::Mutex;

use crate::backend::{names, register_path, RegisterBackend};
use crate::converter::{POSITION, VELOCITY};
use crate::error::BackendError;
use crate::spi::{SYNC_OK, SYNC_REQUESTED};

/// 默认固件版本 2.0.0
pub const DEFAULT_FIRMWARE_VERSION: u32 = 0x0002_0000;

/// 运动中报告的速度（寄存器值）
const SIMULATED_VELOCITY: i32 = 100;

#[derive(Debug, Clone)]
struct SimMotor {
    physical: i32,
    origin: i32,
    target: i32,
    moving: bool,
    direction: i32,
    negative_switch: Option<i32>,
    positive_switch: Option<i32>,
    negative_trigger: i32,
    positive_trigger: i32,
    negative_enabled: bool,
    positive_enabled: bool,
    jitter: Vec<i32>,
    negative_approaches: usize,
    positive_approaches: usize,
    blocked_at: Option<i32>,
}

impl Default for SimMotor {
    fn default() -> Self {
        Self {
            physical: 0,
            origin: 0,
            target: 0,
            moving: false,
            direction: 0,
            negative_switch: None,
            positive_switch: None,
            negative_trigger: 0,
            positive_trigger: 0,
            negative_enabled: true,
            positive_enabled: true,
            jitter: Vec::new(),
            negative_approaches: 0,
            positive_approaches: 0,
            blocked_at: None,
        }
    }
}

impl SimMotor {
    fn actual(&self) -> i32 {
        self.physical - self.origin
    }

    fn physical_target(&self) -> i32 {
        self.target + self.origin
    }

    /// 平移原点，物理目标保持不变
    fn set_actual(&mut self, logical: i32) {
        let physical_target = self.physical_target();
        self.origin = self.physical - logical;
        self.target = physical_target - self.origin;
    }

    fn jitter_for(&self, approach: usize) -> i32 {
        if self.jitter.is_empty() {
            0
        } else {
            self.jitter[approach % self.jitter.len()]
        }
    }

    fn set_target(&mut self, logical: i32) {
        let physical_target = logical + self.origin;
        if physical_target > self.physical {
            if let Some(position) = self.positive_switch {
                self.positive_trigger = position + self.jitter_for(self.positive_approaches);
                self.positive_approaches += 1;
            }
        } else if physical_target < self.physical {
            if let Some(position) = self.negative_switch {
                self.negative_trigger = position - self.jitter_for(self.negative_approaches);
                self.negative_approaches += 1;
            }
        }
        self.target = logical;
    }

    fn positive_active(&self) -> bool {
        self.positive_switch.is_some() && self.physical >= self.positive_trigger
    }

    fn negative_active(&self) -> bool {
        self.negative_switch.is_some() && self.physical <= self.negative_trigger
    }

    /// 向目标前进；`None` 表示一步到位
    fn advance(&mut self, max_steps: Option<u32>) {
        let target = self.physical_target();
        if target == self.physical {
            self.moving = false;
            self.direction = 0;
            return;
        }

        let limit = if target > self.physical {
            self.direction = 1;
            let mut limit = target;
            if self.positive_enabled && self.positive_switch.is_some() {
                limit = limit.min(self.positive_trigger);
            }
            if let Some(obstacle) = self.blocked_at.filter(|b| *b >= self.physical) {
                limit = limit.min(obstacle);
            }
            limit.max(self.physical)
        } else {
            self.direction = -1;
            let mut limit = target;
            if self.negative_enabled && self.negative_switch.is_some() {
                limit = limit.max(self.negative_trigger);
            }
            if let Some(obstacle) = self.blocked_at.filter(|b| *b <= self.physical) {
                limit = limit.max(obstacle);
            }
            limit.min(self.physical)
        };

        self.physical = match max_steps {
            None => limit,
            Some(steps) => {
                let steps = i32::try_from(steps).unwrap_or(i32::MAX);
                if self.direction > 0 {
                    self.physical.saturating_add(steps).min(limit)
                } else {
                    self.physical.saturating_sub(steps).max(limit)
                }
            },
        };
        self.moving = self.physical != limit;
        if !self.moving {
            self.direction = 0;
        }
    }

    fn velocity(&self) -> i32 {
        if self.moving {
            self.direction * SIMULATED_VELOCITY
        } else {
            0
        }
    }
}

struct Paths {
    controler_write: String,
    controler_sync: String,
    controler_readback: String,
    driver_write: Vec<String>,
    driver_sync: Vec<String>,
}

enum Port {
    ControlerWrite,
    ControlerSync,
    ControlerReadback,
    DriverWrite(usize),
    DriverSync(usize),
    Scalar,
}

struct DummyState {
    scalars: HashMap<String, i32>,
    controler_registers: [u32; 64],
    controler_sync: i32,
    readback: i32,
    driver_sync: [i32; MAX_MOTORS as usize],
    driver_datagrams: [Vec<u32>; MAX_MOTORS as usize],
    motors: [SimMotor; MAX_MOTORS as usize],
    stalled_transactions: u32,
    forced_sync: Option<i32>,
    steps_per_transaction: Option<u32>,
    transactions: u64,
}

impl DummyState {
    /// 一次事务的握手结果；`None` 表示不应答（同步寄存器保持原值）
    fn handshake_outcome(&mut self) -> Option<i32> {
        self.transactions += 1;
        if self.stalled_transactions > 0 {
            self.stalled_transactions -= 1;
            return None;
        }
        Some(self.forced_sync.unwrap_or(SYNC_OK))
    }

    fn process_controler_word(&mut self, raw: u32) {
        if let Some(steps) = self.steps_per_transaction {
            for motor in &mut self.motors {
                motor.advance(Some(steps));
            }
        }

        let word = ControlerInputWord::from_raw(raw);
        let selector = word.selector();
        let sub_index = word.sub_index();
        if word.is_read() {
            let payload = self.read_controler(selector, sub_index) & 0x00FF_FFFF;
            self.readback = ((u32::from(self.status_byte()) << 24) | payload) as i32;
        } else {
            self.write_controler(selector, sub_index, word.payload());
        }
    }

    fn slot(selector: Selector, sub_index: u8) -> usize {
        selector.value() as usize * 16 + usize::from(sub_index & 0xF)
    }

    fn read_controler(&self, selector: Selector, sub_index: u8) -> u32 {
        match selector {
            Selector::Motor(id) => {
                let motor = &self.motors[usize::from(id)];
                match MotorRegister::try_from(sub_index) {
                    Ok(MotorRegister::ActualPosition) => POSITION.to_raw(motor.actual()),
                    Ok(MotorRegister::TargetPosition) => POSITION.to_raw(motor.target),
                    Ok(MotorRegister::ActualVelocity) => VELOCITY.to_raw(motor.velocity()),
                    Ok(MotorRegister::ActualAcceleration) => 0,
                    _ => self.controler_registers[Self::slot(selector, sub_index)],
                }
            },
            Selector::Common => match CommonRegister::try_from(sub_index) {
                Ok(CommonRegister::ChipVersion) => CHIP_VERSION,
                Ok(CommonRegister::ReferenceSwitches) => self.reference_switch_bits(),
                _ => self.controler_registers[Self::slot(selector, sub_index)],
            },
        }
    }

    fn write_controler(&mut self, selector: Selector, sub_index: u8, payload: u32) {
        self.controler_registers[Self::slot(selector, sub_index)] = payload;
        let Selector::Motor(id) = selector else {
            return;
        };

        let motor = &mut self.motors[usize::from(id)];
        match MotorRegister::try_from(sub_index) {
            Ok(MotorRegister::TargetPosition) => motor.set_target(POSITION.to_signed(payload)),
            Ok(MotorRegister::ActualPosition) => motor.set_actual(POSITION.to_signed(payload)),
            Ok(MotorRegister::ReferenceConfigAndRampMode) => {
                let word = DataWord::new(payload);
                motor.negative_enabled = !word.get_bool(ReferenceConfigAndRampMode::DISABLE_STOP_LEFT);
                motor.positive_enabled = !word.get_bool(ReferenceConfigAndRampMode::DISABLE_STOP_RIGHT);
            },
            _ => {},
        }
        if self.steps_per_transaction.is_none() {
            motor.advance(None);
        }
    }

    fn status_byte(&self) -> u8 {
        self.motors.iter().enumerate().fold(0u8, |status, (id, motor)| {
            let reached = u8::from(motor.physical == motor.physical_target());
            let switch = u8::from(motor.negative_active());
            status | (reached << (2 * id)) | (switch << (2 * id + 1))
        })
    }

    fn reference_switch_bits(&self) -> u32 {
        self.motors.iter().enumerate().fold(0u32, |bits, (id, motor)| {
            bits | (u32::from(motor.negative_active()) << (2 * id))
                | (u32::from(motor.positive_active()) << (2 * id + 1))
        })
    }
}

/// 模拟驱动卡
pub struct DummyCard {
    module: String,
    paths: Paths,
    state: Mutex<DummyState>,
}

impl DummyCard {
    pub fn new(module: &str) -> Arc<Self> {
        let motors = 0..MAX_MOTORS;
        let paths = Paths {
            controler_write: register_path(module, names::CONTROLER_SPI_WRITE),
            controler_sync: register_path(module, names::CONTROLER_SPI_SYNC),
            controler_readback: register_path(module, names::CONTROLER_SPI_READBACK),
            driver_write: motors
                .clone()
                .map(|id| register_path(module, &names::driver_spi_write(id)))
                .collect(),
            driver_sync: motors
                .clone()
                .map(|id| register_path(module, &names::driver_spi_sync(id)))
                .collect(),
        };

        let mut scalars = HashMap::new();
        scalars.insert(
            register_path(module, names::FIRMWARE_VERSION),
            DEFAULT_FIRMWARE_VERSION as i32,
        );
        for id in motors {
            scalars.insert(register_path(module, &names::driver_enable(id)), 0);
            scalars.insert(register_path(module, &names::end_switch_power(id)), 0);
            scalars.insert(register_path(module, &names::calibration_time(id)), 0);
        }

        Arc::new(Self {
            module: module.to_string(),
            paths,
            state: Mutex::new(DummyState {
                scalars,
                controler_registers: [0; 64],
                controler_sync: SYNC_OK,
                readback: 0,
                driver_sync: [SYNC_OK; MAX_MOTORS as usize],
                driver_datagrams: Default::default(),
                motors: Default::default(),
                stalled_transactions: 0,
                forced_sync: None,
                steps_per_transaction: None,
                transactions: 0,
            }),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    fn port(&self, path: &str) -> Port {
        if path == self.paths.controler_write {
            Port::ControlerWrite
        } else if path == self.paths.controler_sync {
            Port::ControlerSync
        } else if path == self.paths.controler_readback {
            Port::ControlerReadback
        } else if let Some(id) = self.paths.driver_write.iter().position(|p| p == path) {
            Port::DriverWrite(id)
        } else if let Some(id) = self.paths.driver_sync.iter().position(|p| p == path) {
            Port::DriverSync(id)
        } else {
            Port::Scalar
        }
    }

    fn motor_index(motor: u8) -> usize {
        usize::from(motor.min(MAX_MOTORS - 1))
    }

    pub fn set_firmware_version(&self, raw: u32) {
        self.state.lock().scalars.insert(
            register_path(&self.module, names::FIRMWARE_VERSION),
            raw as i32,
        );
    }

    /// 删除一个标量寄存器（模拟旧固件）
    pub fn remove_register(&self, name: &str) {
        self.state
            .lock()
            .scalars
            .remove(&register_path(&self.module, name));
    }

    pub fn scalar(&self, name: &str) -> Option<i32> {
        self.state
            .lock()
            .scalars
            .get(&register_path(&self.module, name))
            .copied()
    }

    /// 设置限位开关的物理位置
    pub fn set_end_switches(&self, motor: u8, negative: Option<i32>, positive: Option<i32>) {
        let mut state = self.state.lock();
        let motor = &mut state.motors[Self::motor_index(motor)];
        motor.negative_switch = negative;
        motor.positive_switch = positive;
        motor.negative_trigger = negative.unwrap_or(0);
        motor.positive_trigger = positive.unwrap_or(0);
    }

    /// 每次接近限位开关时的触发偏移（循环使用，正值表示更晚触发）
    pub fn set_end_switch_jitter(&self, motor: u8, jitter: Vec<i32>) {
        self.state.lock().motors[Self::motor_index(motor)].jitter = jitter;
    }

    /// 在物理位置放置障碍物
    pub fn set_blocked_at(&self, motor: u8, position: Option<i32>) {
        self.state.lock().motors[Self::motor_index(motor)].blocked_at = position;
    }

    /// 把电机放到物理位置（目标随之更新，不引起运动）
    pub fn set_physical_position(&self, motor: u8, position: i32) {
        let mut state = self.state.lock();
        let motor = &mut state.motors[Self::motor_index(motor)];
        motor.physical = position;
        motor.target = position - motor.origin;
        motor.moving = false;
    }

    pub fn physical_position(&self, motor: u8) -> i32 {
        self.state.lock().motors[Self::motor_index(motor)].physical
    }

    /// `None`：写目标后立即到位；`Some(n)`：每次控制器事务前进 n 步
    pub fn set_steps_per_transaction(&self, steps: Option<u32>) {
        self.state.lock().steps_per_transaction = steps;
    }

    /// 接下来 n 次事务不应答
    pub fn stall_next_transactions(&self, count: u32) {
        self.state.lock().stalled_transactions = count;
    }

    /// 强制同步寄存器在事务后返回的值
    pub fn force_sync_value(&self, value: Option<i32>) {
        self.state.lock().forced_sync = value;
    }

    pub fn driver_datagrams(&self, motor: u8) -> Vec<u32> {
        self.state.lock().driver_datagrams[Self::motor_index(motor)].clone()
    }

    pub fn controler_register(&self, selector: Selector, sub_index: u8) -> u32 {
        let state = self.state.lock();
        state.read_controler(selector, sub_index)
    }

    pub fn transactions(&self) -> u64 {
        self.state.lock().transactions
    }
}

impl RegisterBackend for DummyCard {
    fn read(&self, path: &str) -> Result<i32, BackendError> {
        let state = self.state.lock();
        match self.port(path) {
            Port::ControlerWrite | Port::DriverWrite(_) => Ok(SYNC_OK),
            Port::ControlerSync => Ok(state.controler_sync),
            Port::ControlerReadback => Ok(state.readback),
            Port::DriverSync(id) => Ok(state.driver_sync[id]),
            Port::Scalar => state
                .scalars
                .get(path)
                .copied()
                .ok_or_else(|| BackendError::NotFound(path.to_string())),
        }
    }

    fn write(&self, path: &str, value: i32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        match self.port(path) {
            Port::ControlerWrite => {
                if let Some(sync) = state.handshake_outcome() {
                    if sync == SYNC_OK {
                        state.process_controler_word(value as u32);
                    }
                    state.controler_sync = sync;
                }
            },
            Port::DriverWrite(id) => {
                if let Some(sync) = state.handshake_outcome() {
                    if sync == SYNC_OK {
                        state.driver_datagrams[id].push(value as u32);
                    }
                    state.driver_sync[id] = sync;
                }
            },
            Port::ControlerSync => state.controler_sync = value,
            Port::DriverSync(id) => state.driver_sync[id] = value,
            Port::ControlerReadback => {
                return Err(BackendError::Device {
                    path: path.to_string(),
                    message: "read-only register".to_string(),
                });
            },
            Port::Scalar => match state.scalars.get_mut(path) {
                Some(slot) => *slot = value,
                None => return Err(BackendError::NotFound(path.to_string())),
            },
        }
        Ok(())
    }

    fn contains(&self, path: &str) -> bool {
        match self.port(path) {
            Port::Scalar => self.state.lock().scalars.contains_key(path),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_word(card: &DummyCard, word: ControlerInputWord) {
        card.write(&card.paths.controler_sync, SYNC_REQUESTED).unwrap();
        card.write(&card.paths.controler_write, word.raw() as i32).unwrap();
        assert_eq!(card.read(&card.paths.controler_sync).unwrap(), SYNC_OK);
    }

    fn read_payload(card: &DummyCard, selector: Selector, register: u8) -> u32 {
        write_word(card, ControlerInputWord::read(selector, register).unwrap());
        card.read(&card.paths.controler_readback).unwrap() as u32 & 0xFF_FFFF
    }

    #[test]
    fn test_chip_version_readback() {
        let card = DummyCard::new("MD22");
        assert_eq!(
            read_payload(&card, Selector::Common, CommonRegister::ChipVersion.into()),
            CHIP_VERSION
        );
    }

    #[test]
    fn test_motion_stops_at_enabled_switch() {
        let card = DummyCard::new("MD22");
        card.set_end_switches(0, Some(-100), Some(100));

        let target = ControlerInputWord::write(
            Selector::Motor(0),
            MotorRegister::TargetPosition.into(),
            POSITION.to_raw(500),
        )
        .unwrap();
        write_word(&card, target);

        assert_eq!(card.physical_position(0), 100);
        let switches = read_payload(&card, Selector::Common, CommonRegister::ReferenceSwitches.into());
        assert_eq!(switches, 0b10);
    }

    #[test]
    fn test_disabled_switch_does_not_stop() {
        let card = DummyCard::new("MD22");
        card.set_end_switches(0, Some(-100), Some(100));

        let mut config = DataWord::default();
        config.set_bool(ReferenceConfigAndRampMode::DISABLE_STOP_RIGHT, true);
        write_word(
            &card,
            ControlerInputWord::write(
                Selector::Motor(0),
                MotorRegister::ReferenceConfigAndRampMode.into(),
                config.raw(),
            )
            .unwrap(),
        );
        write_word(
            &card,
            ControlerInputWord::write(Selector::Motor(0), MotorRegister::TargetPosition.into(), 500)
                .unwrap(),
        );
        assert_eq!(card.physical_position(0), 500);
    }

    #[test]
    fn test_rebasing_does_not_move() {
        let card = DummyCard::new("MD22");
        card.set_physical_position(1, 250);
        write_word(
            &card,
            ControlerInputWord::write(Selector::Motor(1), MotorRegister::ActualPosition.into(), 0)
                .unwrap(),
        );
        assert_eq!(card.physical_position(1), 250);
        assert_eq!(
            read_payload(&card, Selector::Motor(1), MotorRegister::ActualPosition.into()),
            0
        );
    }

    #[test]
    fn test_stepped_motion_reports_velocity() {
        let card = DummyCard::new("MD22");
        card.set_steps_per_transaction(Some(10));
        write_word(
            &card,
            ControlerInputWord::write(Selector::Motor(0), MotorRegister::TargetPosition.into(), 25)
                .unwrap(),
        );

        let velocity = read_payload(&card, Selector::Motor(0), MotorRegister::ActualVelocity.into());
        assert_eq!(VELOCITY.to_signed(velocity), SIMULATED_VELOCITY);
        read_payload(&card, Selector::Motor(0), MotorRegister::ActualVelocity.into());
        let velocity = read_payload(&card, Selector::Motor(0), MotorRegister::ActualVelocity.into());
        assert_eq!(velocity, 0);
        assert_eq!(card.physical_position(0), 25);
    }

    #[test]
    fn test_stalled_transaction_is_not_processed() {
        let card = DummyCard::new("MD22");
        card.stall_next_transactions(1);
        card.write(&card.paths.controler_sync, SYNC_REQUESTED).unwrap();
        card.write(&card.paths.controler_write, 0x1234).unwrap();
        assert_eq!(card.read(&card.paths.controler_sync).unwrap(), SYNC_REQUESTED);
        assert_eq!(card.transactions(), 1);
    }
}
