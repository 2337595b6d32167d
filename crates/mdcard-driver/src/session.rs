//! 寄存器会话
//!
//! 在握手传输之上提供按逻辑地址 `(selector, sub_index)` 的读写。
//!
//! - [`ControlerSpiSession`]: TMC429，整张卡共享一个（`Arc`）
//! - [`DriverSpiSession`]: TMC260，每个电机一个，只写

use mdcard_protocol::tmc260::{DriverRegister, DriverRegisterKind};
use mdcard_protocol::tmc429::{
    ControlerInputWord, ControlerOutputWord, ControlerRegister, ControlerRegisterKind,
    ControlerStatusBits, Selector,
};
use mdcard_protocol::RegisterWord;
use tracing::trace;

use crate::error::DriverError;
use crate::spi::HandshakeTransport;

/// TMC429 寄存器会话
pub struct ControlerSpiSession {
    transport: HandshakeTransport,
}

impl ControlerSpiSession {
    pub fn new(transport: HandshakeTransport) -> Self {
        Self { transport }
    }

    /// 读寄存器，返回状态字节与有效负载
    pub fn read_output(
        &self,
        selector: Selector,
        sub_index: u8,
    ) -> Result<ControlerOutputWord, DriverError> {
        let word = ControlerInputWord::read(selector, sub_index)?;
        let raw = self.transport.read(word.raw())?;
        Ok(ControlerOutputWord::from_raw(raw))
    }

    /// 读寄存器有效负载
    pub fn read(&self, selector: Selector, sub_index: u8) -> Result<u32, DriverError> {
        Ok(self.read_output(selector, sub_index)?.payload())
    }

    /// 写寄存器有效负载
    pub fn write(&self, selector: Selector, sub_index: u8, payload: u32) -> Result<(), DriverError> {
        let word = ControlerInputWord::write(selector, sub_index, payload)?;
        trace!("TMC429 write {:?}/0x{:X} = 0x{:06X}", selector, sub_index, payload);
        self.transport.write(word.raw())
    }

    /// 直接写入已构造好的输入字（保留调用者设置的选择器等字段）
    pub fn write_word(&self, word: ControlerInputWord) -> Result<(), DriverError> {
        self.transport.write(word.raw())
    }

    /// 写入带字段表的寄存器
    pub fn write_register<K: ControlerRegisterKind>(
        &self,
        register: &ControlerRegister<K>,
    ) -> Result<(), DriverError> {
        trace!("TMC429 write {:?}", register);
        self.write_word(register.input_word())
    }

    /// 读取带字段表的寄存器
    pub fn read_register<K: ControlerRegisterKind>(
        &self,
        selector: Selector,
    ) -> Result<ControlerRegister<K>, DriverError> {
        let payload = self.read(selector, K::SUB_INDEX)?;
        Ok(ControlerRegister::from_payload(selector, payload)?)
    }

    /// 控制器状态字节（随任意一次读返回）
    pub fn status(&self) -> Result<ControlerStatusBits, DriverError> {
        use mdcard_protocol::tmc429::CommonRegister;
        Ok(self
            .read_output(Selector::Common, CommonRegister::ChipVersion.into())?
            .status())
    }
}

/// TMC260 寄存器会话
pub struct DriverSpiSession {
    transport: HandshakeTransport,
}

impl DriverSpiSession {
    pub fn new(transport: HandshakeTransport) -> Self {
        Self { transport }
    }

    pub fn write<K: DriverRegisterKind>(&self, register: &DriverRegister<K>) -> Result<(), DriverError> {
        trace!("TMC260 write {:?}", register);
        self.transport.write(register.datagram())
    }

    /// 读取驱动器应答
    ///
    /// 本卡驱动器链路没有读回寄存器，返回 `NotSupported`。
    pub fn read_response<K: DriverRegisterKind>(
        &self,
        register: &DriverRegister<K>,
    ) -> Result<u32, DriverError> {
        self.transport.read(register.datagram())
    }
}
