//! 电机驱动卡配置
//!
//! 配置以"已解码的寄存器默认值"形式给出，可以从 TOML 加载：
//!
//! ```toml
//! controler_spi_waiting_time_us = 40
//! firmware_requirement = "^2"
//!
//! [[motors]]
//! enabled = true
//! maximum_velocity = 1500
//! max_current_amps = 1.2
//! ```

use std::path::Path;
use std::time::Duration;

use mdcard_protocol::tmc260::{
    ChopperControlData, CoolStepControlData, DriverConfigData, DriverControlData, DriverRegister,
    DriverRegisterKind, StallGuardControlData,
};
use mdcard_protocol::tmc429::{self, MAX_MOTORS};
use mdcard_protocol::word::Field;
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::spi::SpiTiming;

/// 单个电机的寄存器默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorControlerConfig {
    pub acceleration_threshold_data: u32,
    pub actual_position: i32,
    pub chopper_control_data: u32,
    pub cool_step_control_data: u32,
    pub dividers_and_micro_step_resolution_data: u32,
    pub driver_config_data: u32,
    pub driver_control_data: u32,
    pub dx_reference_tolerance: u32,
    pub enabled: bool,
    pub interrupt_data: u32,
    pub maximum_acceleration: u32,
    pub maximum_velocity: u32,
    pub microstep_count: u32,
    pub minimum_velocity: u32,
    pub position_tolerance: u32,
    pub proportionality_factors: u32,
    pub reference_config_and_ramp_mode_data: u32,
    pub stall_guard_control_data: u32,
    pub target_position: i32,
    pub target_velocity: i32,
    /// 满量程电流（CS = 31 时的电流，安培）
    pub max_current_amps: f64,
    pub driver_spi_waiting_time_us: u64,
}

impl Default for MotorControlerConfig {
    fn default() -> Self {
        Self {
            acceleration_threshold_data: 0x0000_03E8,
            actual_position: 0,
            chopper_control_data: 0x0001_4557,
            cool_step_control_data: 0x0000_0000,
            dividers_and_micro_step_resolution_data: 0x0000_7706,
            driver_config_data: 0x0000_0040,
            driver_control_data: 0x0000_0000,
            dx_reference_tolerance: 0,
            enabled: false,
            interrupt_data: 0,
            maximum_acceleration: 1000,
            maximum_velocity: 1000,
            microstep_count: 0,
            minimum_velocity: 1,
            position_tolerance: 0,
            proportionality_factors: 0,
            reference_config_and_ramp_mode_data: 0,
            stall_guard_control_data: 0x0000_0005,
            target_position: 0,
            target_velocity: 0,
            max_current_amps: 1.8,
            driver_spi_waiting_time_us: 120,
        }
    }
}

fn check_controler_payload(field: &str, value: u32) -> Result<(), DriverError> {
    if tmc429::DATA.accepts(value) {
        Ok(())
    } else {
        Err(DriverError::InvalidConfig(format!(
            "{field} = 0x{value:X} does not fit into 24 bits"
        )))
    }
}

fn check_driver_payload<K: DriverRegisterKind>(field: &str, value: u32) -> Result<(), DriverError> {
    DriverRegister::<K>::from_payload(value)
        .map(|_| ())
        .map_err(|e| DriverError::InvalidConfig(format!("{field}: {e}")))
}

fn check_field(name: &str, field: Field, value: u32) -> Result<(), DriverError> {
    if field.accepts(value) {
        Ok(())
    } else {
        Err(DriverError::InvalidConfig(format!(
            "{name} = {value} does not fit into {} bits",
            field.width()
        )))
    }
}

impl MotorControlerConfig {
    pub fn driver_spi_timing(&self, poll_count: u32) -> SpiTiming {
        SpiTiming::new(Duration::from_micros(self.driver_spi_waiting_time_us), poll_count)
    }

    /// 检查寄存器值是否能放入各自的位宽
    pub fn validate(&self) -> Result<(), DriverError> {
        use mdcard_protocol::tmc260::kind;

        for (name, value) in [
            ("acceleration_threshold_data", self.acceleration_threshold_data),
            ("dividers_and_micro_step_resolution_data", self.dividers_and_micro_step_resolution_data),
            ("dx_reference_tolerance", self.dx_reference_tolerance),
            ("interrupt_data", self.interrupt_data),
            ("maximum_acceleration", self.maximum_acceleration),
            ("microstep_count", self.microstep_count),
            ("minimum_velocity", self.minimum_velocity),
            ("position_tolerance", self.position_tolerance),
            ("proportionality_factors", self.proportionality_factors),
            ("reference_config_and_ramp_mode_data", self.reference_config_and_ramp_mode_data),
        ] {
            check_controler_payload(name, value)?;
        }

        check_driver_payload::<kind::DriverControl>("driver_control_data", self.driver_control_data)?;
        check_driver_payload::<kind::ChopperControl>("chopper_control_data", self.chopper_control_data)?;
        check_driver_payload::<kind::CoolStepControl>("cool_step_control_data", self.cool_step_control_data)?;
        check_driver_payload::<kind::StallGuardControl>(
            "stall_guard_control_data",
            self.stall_guard_control_data,
        )?;
        check_driver_payload::<kind::DriverConfig>("driver_config_data", self.driver_config_data)?;

        let velocity = Field::new("V", 0, 10);
        check_field("maximum_velocity", velocity, self.maximum_velocity)?;
        check_field("minimum_velocity", velocity, self.minimum_velocity)?;
        if self.minimum_velocity > self.maximum_velocity {
            return Err(DriverError::InvalidConfig(format!(
                "minimum_velocity = {} is above maximum_velocity = {}",
                self.minimum_velocity, self.maximum_velocity
            )));
        }
        if !(self.max_current_amps.is_finite() && self.max_current_amps > 0.0) {
            return Err(DriverError::InvalidConfig(format!(
                "max_current_amps = {} must be positive",
                self.max_current_amps
            )));
        }
        Ok(())
    }

    pub fn driver_control(&self) -> Result<DriverControlData, DriverError> {
        Ok(DriverControlData::from_payload(self.driver_control_data)?)
    }

    pub fn chopper_control(&self) -> Result<ChopperControlData, DriverError> {
        Ok(ChopperControlData::from_payload(self.chopper_control_data)?)
    }

    pub fn cool_step_control(&self) -> Result<CoolStepControlData, DriverError> {
        Ok(CoolStepControlData::from_payload(self.cool_step_control_data)?)
    }

    pub fn stall_guard_control(&self) -> Result<StallGuardControlData, DriverError> {
        Ok(StallGuardControlData::from_payload(self.stall_guard_control_data)?)
    }

    pub fn driver_config(&self) -> Result<DriverConfigData, DriverError> {
        Ok(DriverConfigData::from_payload(self.driver_config_data)?)
    }
}

/// 整张卡的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorDriverCardConfig {
    pub cover_datagram: u32,
    pub cover_position_and_length: u32,
    pub datagram_high_word: u32,
    pub datagram_low_word: u32,
    pub interface_configuration: u32,
    pub position_compare: u32,
    pub position_compare_interrupt: u32,
    pub power_down: u32,
    pub stepper_motor_global_parameters: u32,
    pub controler_spi_waiting_time_us: u64,
    pub spi_poll_count: u32,
    /// 固件版本要求（semver 语法）
    pub firmware_requirement: String,
    pub system_clock_hz: u32,
    pub motors: Vec<MotorControlerConfig>,
}

impl Default for MotorDriverCardConfig {
    fn default() -> Self {
        Self {
            cover_datagram: 0,
            cover_position_and_length: 0,
            datagram_high_word: 0,
            datagram_low_word: 0,
            interface_configuration: 0,
            position_compare: 0,
            position_compare_interrupt: 0,
            power_down: 0,
            // LSMD = 2（三个驱动器），CLK2_DIV = 7
            stepper_motor_global_parameters: 0x0000_0702,
            controler_spi_waiting_time_us: 40,
            spi_poll_count: 10,
            firmware_requirement: "^2".to_string(),
            system_clock_hz: 32_000_000,
            motors: vec![MotorControlerConfig::default(); 2],
        }
    }
}

impl MotorDriverCardConfig {
    /// 从 TOML 字符串解析（不校验）
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        toml::from_str(content).map_err(|e| DriverError::InvalidConfig(e.to_string()))
    }

    /// 从 TOML 文件加载（不校验）
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string(self).map_err(|e| DriverError::InvalidConfig(e.to_string()))
    }

    pub fn firmware_version_req(&self) -> Result<VersionReq, DriverError> {
        VersionReq::parse(&self.firmware_requirement).map_err(|e| {
            DriverError::InvalidConfig(format!(
                "firmware_requirement '{}': {e}",
                self.firmware_requirement
            ))
        })
    }

    pub fn controler_spi_timing(&self) -> SpiTiming {
        SpiTiming::new(
            Duration::from_micros(self.controler_spi_waiting_time_us),
            self.spi_poll_count,
        )
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.motors.len() > usize::from(MAX_MOTORS) {
            return Err(DriverError::InvalidConfig(format!(
                "{} motors configured, the controller drives at most {}",
                self.motors.len(),
                MAX_MOTORS
            )));
        }
        for (name, value) in [
            ("cover_datagram", self.cover_datagram),
            ("cover_position_and_length", self.cover_position_and_length),
            ("datagram_high_word", self.datagram_high_word),
            ("datagram_low_word", self.datagram_low_word),
            ("interface_configuration", self.interface_configuration),
            ("position_compare", self.position_compare),
            ("position_compare_interrupt", self.position_compare_interrupt),
            ("power_down", self.power_down),
            ("stepper_motor_global_parameters", self.stepper_motor_global_parameters),
        ] {
            check_controler_payload(name, value)?;
        }
        if self.system_clock_hz == 0 {
            return Err(DriverError::InvalidConfig("system_clock_hz must not be 0".to_string()));
        }
        self.firmware_version_req()?;
        for (id, motor) in self.motors.iter().enumerate() {
            motor
                .validate()
                .map_err(|e| DriverError::InvalidConfig(format!("motor {id}: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = MotorDriverCardConfig::default();
        config.validate().unwrap();
        assert_eq!(config.motors.len(), 2);

        let motor = &config.motors[0];
        assert_eq!(motor.stall_guard_control().unwrap().current_scale(), 5);
        assert_eq!(motor.chopper_control().unwrap().off_time(), 7);
    }

    #[test]
    fn test_from_toml_str_with_defaults() {
        let config = MotorDriverCardConfig::from_toml_str(
            r#"
            firmware_requirement = ">=2.1"
            spi_poll_count = 4

            [[motors]]
            enabled = true
            maximum_velocity = 1500

            [[motors]]
            max_current_amps = 1.2
            "#,
        )
        .unwrap();

        assert_eq!(config.spi_poll_count, 4);
        assert_eq!(config.controler_spi_waiting_time_us, 40);
        assert_eq!(config.motors.len(), 2);
        assert!(config.motors[0].enabled);
        assert_eq!(config.motors[0].maximum_velocity, 1500);
        assert_eq!(config.motors[1].max_current_amps, 1.2);
        assert_eq!(config.motors[1].chopper_control_data, 0x14557);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "system_clock_hz = 16000000").unwrap();
        let config = MotorDriverCardConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.system_clock_hz, 16_000_000);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = MotorDriverCardConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(MotorDriverCardConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_too_many_motors() {
        let config = MotorDriverCardConfig {
            motors: vec![MotorControlerConfig::default(); 4],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DriverError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_wide_payloads() {
        let config = MotorDriverCardConfig {
            power_down: 0x0100_0000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let motor = MotorControlerConfig {
            stall_guard_control_data: 0x2_0000,
            ..Default::default()
        };
        assert!(motor.validate().is_err());

        let motor = MotorControlerConfig {
            maximum_velocity: 2048,
            ..Default::default()
        };
        assert!(motor.validate().is_err());
    }

    #[test]
    fn test_invalid_firmware_requirement() {
        let config = MotorDriverCardConfig {
            firmware_requirement: "not a version".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.firmware_version_req(),
            Err(DriverError::InvalidConfig(_))
        ));
    }
}
