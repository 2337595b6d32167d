//! 驱动层错误类型定义

use mdcard_protocol::ProtocolError;
use semver::{Version, VersionReq};
use thiserror::Error;

/// 寄存器后端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// 寄存器不存在
    #[error("Register not found: {0}")]
    NotFound(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(String),

    /// 设备报告的错误
    #[error("Device error on {path}: {message}")]
    Device { path: String, message: String },
}

/// 驱动层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 后端访问错误
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// 构造寄存器访问器时寄存器不存在
    #[error("Register not found: {0}")]
    RegisterNotFound(String),

    /// 同步寄存器在重试预算内始终未就绪
    #[error("SPI handshake timeout on {register} after {attempts} attempts")]
    HandshakeTimeout { register: String, attempts: u32 },

    /// 同步寄存器返回错误值（不重试）
    #[error("SPI handshake fault on {register}: sync value 0x{value:02X}")]
    HandshakeFault { register: String, value: u32 },

    /// 当前硬件/固件不支持该操作
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// 固件版本不兼容（初始化时检测，致命）
    #[error("Firmware version {found} does not satisfy requirement {required}")]
    FirmwareVersionMismatch { found: Version, required: VersionReq },

    /// 电机编号无效
    #[error("Invalid motor id {id} (card has {available} motors)")]
    InvalidMotorId { id: u8, available: usize },

    /// 配置错误
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试 DriverError 的 Display 实现
    #[test]
    fn test_driver_error_display() {
        let err = DriverError::HandshakeTimeout {
            register: "MD22/WORD_CTRL_SPI_SYNC".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "SPI handshake timeout on MD22/WORD_CTRL_SPI_SYNC after 3 attempts"
        );

        let err = DriverError::HandshakeFault {
            register: "MD22/WORD_CTRL_SPI_SYNC".to_string(),
            value: 0xAA,
        };
        assert!(err.to_string().contains("0xAA"));

        let err = DriverError::InvalidMotorId { id: 4, available: 2 };
        assert!(err.to_string().contains("card has 2 motors"));
    }

    /// 测试 From 转换
    #[test]
    fn test_from_conversions() {
        let err: DriverError = BackendError::NotFound("MD22/X".to_string()).into();
        assert!(matches!(err, DriverError::Backend(BackendError::NotFound(_))));

        let err: DriverError = ProtocolError::InvalidValue {
            field: "SMDA",
            value: 3,
        }
        .into();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn test_firmware_mismatch_display() {
        let err = DriverError::FirmwareVersionMismatch {
            found: Version::new(1, 4, 0),
            required: VersionReq::parse("^2").unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Firmware version 1.4.0 does not satisfy requirement ^2"
        );
    }
}
