//! 测试公共工具：模拟驱动卡

#![allow(dead_code)]

use std::sync::Arc;

use mdcard_driver::mock::DummyCard;
use mdcard_driver::{MotorControl, MotorDriverCard, MotorDriverCardConfig, RegisterBackend};

pub const MODULE: &str = "MD22";

/// 无等待时间的卡配置
pub fn test_config() -> MotorDriverCardConfig {
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

pub fn open_card() -> (Arc<DummyCard>, MotorDriverCard) {
    let dummy = DummyCard::new(MODULE);
    let backend: Arc<dyn RegisterBackend> = dummy.clone();
    let card = MotorDriverCard::new(backend, MODULE, test_config()).unwrap();
    (dummy, card)
}

pub fn motor(card: &MotorDriverCard, id: u8) -> Arc<dyn MotorControl> {
    card.motor_controler(id).unwrap()
}
