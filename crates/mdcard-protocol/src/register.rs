//! 寄存器描述符接口
//!
//! 每种寄存器都是一个携带自身字段表的小值类型，对外只暴露
//! 地址（address）与有效负载（payload）两个能力，以及字段表中的命名字段。
//!
//! 带类型的寄存器地址在构造时固定，只读；可改写地址的字单独实现 [`AddressWord`]。

use crate::ProtocolError;
use crate::word::{DataWord, Field};

/// 寄存器描述符：地址位段 + 有效负载位段
pub trait RegisterWord: Copy {
    /// 地址位段
    const ADDRESS: Field;
    /// 有效负载位段
    const PAYLOAD: Field;

    fn data_word(&self) -> DataWord;

    fn data_word_mut(&mut self) -> &mut DataWord;

    /// 原始 32 位值
    fn raw(&self) -> u32 {
        self.data_word().raw()
    }

    fn address(&self) -> u32 {
        self.data_word().get(Self::ADDRESS)
    }

    fn payload(&self) -> u32 {
        self.data_word().get(Self::PAYLOAD)
    }

    fn set_payload(&mut self, payload: u32) -> Result<(), ProtocolError> {
        self.data_word_mut().set(Self::PAYLOAD, payload)
    }

    /// 读取任意命名字段
    fn field(&self, field: Field) -> u32 {
        self.data_word().get(field)
    }

    /// 写入任意命名字段（检查范围）
    fn set_field(&mut self, field: Field, value: u32) -> Result<(), ProtocolError> {
        self.data_word_mut().set(field, value)
    }
}

/// 地址可改写的寄存器字
///
/// 只有通用的 [`ControlerInputWord`](crate::ControlerInputWord) 实现。
/// 带类型的寄存器没有这个能力：
///
/// ```compile_fail
/// use mdcard_protocol::{AddressWord, StallGuardControlData};
///
/// let mut sgcs = StallGuardControlData::new();
/// sgcs.set_address(0b100).unwrap();
/// ```
pub trait AddressWord: RegisterWord {
    fn set_address(&mut self, address: u32) -> Result<(), ProtocolError> {
        self.data_word_mut().set(Self::ADDRESS, address)
    }
}
