//! 电机驱动卡
//!
//! 初始化顺序：
//!
//! 1. 校验配置
//! 2. 读取固件版本并与配置中的 semver 要求比较（不兼容时构造失败）
//! 3. 建立共享的 TMC429 会话，写入公共寄存器
//! 4. 检查芯片版本（不一致只告警）
//! 5. 为每个配置的电机创建控制器

use std::sync::Arc;

use mdcard_protocol::tmc429::{
    CommonRegister, ControlerStatusBits, ReferenceSwitchBits, Selector, CHIP_VERSION,
};
use semver::Version;
use tracing::{error, info, warn};

use crate::backend::{names, RegisterBackend, ScalarRegister};
use crate::config::MotorDriverCardConfig;
use crate::error::DriverError;
use crate::motor::MotorControlerImpl;
use crate::session::ControlerSpiSession;
use crate::spi::HandshakeTransport;

/// 固件版本寄存器 → semver（`0x00MMmmpp`）
pub fn decode_firmware_version(raw: u32) -> Version {
    Version::new(
        u64::from((raw >> 16) & 0xFF),
        u64::from((raw >> 8) & 0xFF),
        u64::from(raw & 0xFF),
    )
}

/// 一张电机驱动卡
pub struct MotorDriverCard {
    module: String,
    firmware_version: Version,
    controler: Arc<ControlerSpiSession>,
    motors: Vec<Arc<MotorControlerImpl>>,
    config: MotorDriverCardConfig,
}

impl MotorDriverCard {
    pub fn new(
        backend: Arc<dyn RegisterBackend>,
        module: &str,
        config: MotorDriverCardConfig,
    ) -> Result<Self, DriverError> {
        config.validate()?;

        let required = config.firmware_version_req()?;
        let firmware = ScalarRegister::open(&backend, module, names::FIRMWARE_VERSION)?;
        let firmware_version = decode_firmware_version(firmware.read_bits()?);
        if !required.matches(&firmware_version) {
            error!(
                "Firmware {} on {} does not satisfy {}",
                firmware_version, module, required
            );
            return Err(DriverError::FirmwareVersionMismatch {
                found: firmware_version,
                required,
            });
        }

        let transport = HandshakeTransport::new(
            ScalarRegister::open(&backend, module, names::CONTROLER_SPI_WRITE)?,
            ScalarRegister::open(&backend, module, names::CONTROLER_SPI_SYNC)?,
            Some(ScalarRegister::open(&backend, module, names::CONTROLER_SPI_READBACK)?),
            config.controler_spi_timing(),
        );
        let controler = Arc::new(ControlerSpiSession::new(transport));

        for (register, payload) in [
            (CommonRegister::DatagramLowWord, config.datagram_low_word),
            (CommonRegister::DatagramHighWord, config.datagram_high_word),
            (CommonRegister::CoverPositionAndLength, config.cover_position_and_length),
            (CommonRegister::CoverDatagram, config.cover_datagram),
            (CommonRegister::InterfaceConfiguration, config.interface_configuration),
            (CommonRegister::PositionCompare, config.position_compare),
            (CommonRegister::PositionCompareInterrupt, config.position_compare_interrupt),
            (CommonRegister::PowerDown, config.power_down),
            (CommonRegister::GlobalParameters, config.stepper_motor_global_parameters),
        ] {
            controler.write(Selector::Common, register.into(), payload)?;
        }

        let chip_version = controler.read(Selector::Common, CommonRegister::ChipVersion.into())?;
        if chip_version != CHIP_VERSION {
            warn!(
                "Unexpected motion controller version 0x{:06X} on {} (expected 0x{:06X})",
                chip_version, module, CHIP_VERSION
            );
        }

        let motors = (0..config.motors.len())
            .map(|id| {
                MotorControlerImpl::new(id as u8, Arc::clone(&controler), &backend, module, &config)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Motor driver card {} initialized: firmware {}, {} motors",
            module,
            firmware_version,
            motors.len()
        );

        Ok(Self {
            module: module.to_string(),
            firmware_version,
            controler,
            motors,
            config,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn firmware_version(&self) -> &Version {
        &self.firmware_version
    }

    pub fn config(&self) -> &MotorDriverCardConfig {
        &self.config
    }

    pub fn number_of_motors(&self) -> usize {
        self.motors.len()
    }

    pub fn motor_controler(&self, id: u8) -> Result<Arc<MotorControlerImpl>, DriverError> {
        self.motors
            .get(usize::from(id))
            .cloned()
            .ok_or(DriverError::InvalidMotorId {
                id,
                available: self.motors.len(),
            })
    }

    pub fn controler_status(&self) -> Result<ControlerStatusBits, DriverError> {
        self.controler.status()
    }

    pub fn reference_switches(&self) -> Result<ReferenceSwitchBits, DriverError> {
        let payload = self
            .controler
            .read(Selector::Common, CommonRegister::ReferenceSwitches.into())?;
        Ok(ReferenceSwitchBits::from_payload(payload))
    }

    pub fn controler_session(&self) -> &Arc<ControlerSpiSession> {
        &self.controler
    }
}
