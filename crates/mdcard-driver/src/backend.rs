//! 寄存器后端抽象
//!
//! 设备访问层只需提供按 `"MODULE/REGISTER"` 路径读写有符号 32 位原始值的能力，
//! 本模块在其上封装 [`ScalarRegister`]。

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{BackendError, DriverError};

/// 卡上寄存器名
pub mod names {
    pub const FIRMWARE_VERSION: &str = "WORD_FIRMWARE_VER";

    pub const CONTROLER_SPI_WRITE: &str = "WORD_CTRL_SPI_WRITE";
    pub const CONTROLER_SPI_SYNC: &str = "WORD_CTRL_SPI_SYNC";
    pub const CONTROLER_SPI_READBACK: &str = "WORD_CTRL_SPI_READBACK";

    /// 电机在寄存器名中从 1 开始编号
    pub fn driver_spi_write(motor: u8) -> String {
        format!("WORD_M{}_DRV_SPI_WRITE", motor + 1)
    }

    pub fn driver_spi_sync(motor: u8) -> String {
        format!("WORD_M{}_DRV_SPI_SYNC", motor + 1)
    }

    pub fn driver_enable(motor: u8) -> String {
        format!("WORD_M{}_DRV_ENABLE", motor + 1)
    }

    /// 可选（旧固件没有）
    pub fn end_switch_power(motor: u8) -> String {
        format!("WORD_M{}_END_SW_POWER_EN", motor + 1)
    }

    /// 可选（旧固件没有）
    pub fn calibration_time(motor: u8) -> String {
        format!("WORD_M{}_CALIBRATION_TIME", motor + 1)
    }
}

/// 寄存器后端
///
/// 实现者负责把模块限定的寄存器路径映射到实际设备。
pub trait RegisterBackend: Send + Sync {
    fn read(&self, path: &str) -> Result<i32, BackendError>;

    fn write(&self, path: &str, value: i32) -> Result<(), BackendError>;

    /// 寄存器是否存在
    fn contains(&self, path: &str) -> bool;
}

pub fn register_path(module: &str, name: &str) -> String {
    format!("{module}/{name}")
}

/// 单个标量寄存器访问器
#[derive(Clone)]
pub struct ScalarRegister {
    backend: Arc<dyn RegisterBackend>,
    path: Arc<str>,
}

impl ScalarRegister {
    /// 打开寄存器
    ///
    /// # 错误
    ///
    /// - `DriverError::RegisterNotFound`: 后端没有该寄存器
    pub fn open(
        backend: &Arc<dyn RegisterBackend>,
        module: &str,
        name: &str,
    ) -> Result<Self, DriverError> {
        let path = register_path(module, name);
        if !backend.contains(&path) {
            return Err(DriverError::RegisterNotFound(path));
        }
        Ok(Self {
            backend: Arc::clone(backend),
            path: path.into(),
        })
    }

    /// 打开可选寄存器，不存在时返回 `None` 并记录警告
    pub fn open_optional(
        backend: &Arc<dyn RegisterBackend>,
        module: &str,
        name: &str,
    ) -> Option<Self> {
        match Self::open(backend, module, name) {
            Ok(register) => Some(register),
            Err(_) => {
                warn!(
                    "Optional register {}/{} not available, feature disabled",
                    module, name
                );
                None
            },
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn read(&self) -> Result<i32, DriverError> {
        Ok(self.backend.read(&self.path)?)
    }

    pub fn write(&self, value: i32) -> Result<(), DriverError> {
        Ok(self.backend.write(&self.path, value)?)
    }

    /// 按位重新解释为无符号值读取
    pub fn read_bits(&self) -> Result<u32, DriverError> {
        Ok(self.read()? as u32)
    }

    /// 按位重新解释为有符号值写入
    pub fn write_bits(&self, value: u32) -> Result<(), DriverError> {
        self.write(value as i32)
    }
}

impl fmt::Debug for ScalarRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarRegister")
            .field("path", &self.path)
            .finish()
    }
}
