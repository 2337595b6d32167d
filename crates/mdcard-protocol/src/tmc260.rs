//! TMC260 驱动芯片寄存器
//!
//! 每个写入数据报（datagram）为 20 位：高 2~3 位是固定的寄存器地址，其余位为该寄存器的字段。
//!
//! | 寄存器 | 地址位 | 地址值 | 有效负载 |
//! |--------|--------|--------|----------|
//! | DRVCTRL  | 19:18 | `0b00`  | 17:0 |
//! | CHOPCONF | 19:17 | `0b100` | 16:0 |
//! | SMARTEN  | 19:17 | `0b101` | 16:0 |
//! | SGCSCONF | 19:17 | `0b110` | 16:0 |
//! | DRVCONF  | 19:17 | `0b111` | 16:0 |
//!
//! 字段位置均为数据报内的绝对位置（与芯片手册一致）。

use std::fmt;
use std::marker::PhantomData;

use bilge::prelude::*;

use crate::ProtocolError;
use crate::register::RegisterWord;
use crate::word::{DataWord, Field};

/// 完整 20 位数据报
pub const DATAGRAM: Field = Field::new("DATAGRAM", 0, 19);

/// 驱动寄存器种类：名称、地址与字段表
pub trait DriverRegisterKind: 'static {
    const NAME: &'static str;
    const ADDRESS: Field;
    const ADDRESS_VALUE: u32;
    const PAYLOAD: Field;
    /// 语义字段（互不重叠）
    const FIELDS: &'static [Field];
}

/// 寄存器种类标记
pub mod kind {
    use super::{DriverRegisterKind, Field};

    const ADDRESS_2BIT: Field = Field::new("ADDRESS", 18, 19);
    const ADDRESS_3BIT: Field = Field::new("ADDRESS", 17, 19);
    const PAYLOAD_18BIT: Field = Field::new("PAYLOAD", 0, 17);
    const PAYLOAD_17BIT: Field = Field::new("PAYLOAD", 0, 16);

    /// DRVCTRL（SPI 模式，SDOFF=0）
    #[derive(Debug)]
    pub enum DriverControl {}

    impl DriverControl {
        pub const INTERPOLATION: Field = Field::bit("INTPOL", 9);
        pub const DOUBLE_EDGE: Field = Field::bit("DEDGE", 8);
        pub const MICROSTEP_RESOLUTION: Field = Field::new("MRES", 0, 3);
    }

    impl DriverRegisterKind for DriverControl {
        const NAME: &'static str = "DRVCTRL";
        const ADDRESS: Field = ADDRESS_2BIT;
        const ADDRESS_VALUE: u32 = 0b00;
        const PAYLOAD: Field = PAYLOAD_18BIT;
        const FIELDS: &'static [Field] = &[
            Self::INTERPOLATION,
            Self::DOUBLE_EDGE,
            Self::MICROSTEP_RESOLUTION,
        ];
    }

    /// CHOPCONF
    #[derive(Debug)]
    pub enum ChopperControl {}

    impl ChopperControl {
        pub const BLANKING_TIME: Field = Field::new("TBL", 15, 16);
        pub const CHOPPER_MODE: Field = Field::bit("CHM", 14);
        pub const RANDOM_OFF_TIME: Field = Field::bit("RNDTF", 13);
        pub const HYSTERESIS_DECREMENT: Field = Field::new("HDEC", 11, 12);
        pub const HYSTERESIS_END: Field = Field::new("HEND", 7, 10);
        pub const HYSTERESIS_START: Field = Field::new("HSTRT", 4, 6);
        pub const OFF_TIME: Field = Field::new("TOFF", 0, 3);
    }

    impl DriverRegisterKind for ChopperControl {
        const NAME: &'static str = "CHOPCONF";
        const ADDRESS: Field = ADDRESS_3BIT;
        const ADDRESS_VALUE: u32 = 0b100;
        const PAYLOAD: Field = PAYLOAD_17BIT;
        const FIELDS: &'static [Field] = &[
            Self::BLANKING_TIME,
            Self::CHOPPER_MODE,
            Self::RANDOM_OFF_TIME,
            Self::HYSTERESIS_DECREMENT,
            Self::HYSTERESIS_END,
            Self::HYSTERESIS_START,
            Self::OFF_TIME,
        ];
    }

    /// SMARTEN（coolStep）
    #[derive(Debug)]
    pub enum CoolStepControl {}

    impl CoolStepControl {
        pub const MINIMUM_CURRENT: Field = Field::bit("SEIMIN", 15);
        pub const DECREMENT_SPEED: Field = Field::new("SEDN", 13, 14);
        pub const UPPER_THRESHOLD: Field = Field::new("SEMAX", 8, 11);
        pub const INCREMENT_SIZE: Field = Field::new("SEUP", 5, 6);
        pub const LOWER_THRESHOLD: Field = Field::new("SEMIN", 0, 3);
    }

    impl DriverRegisterKind for CoolStepControl {
        const NAME: &'static str = "SMARTEN";
        const ADDRESS: Field = ADDRESS_3BIT;
        const ADDRESS_VALUE: u32 = 0b101;
        const PAYLOAD: Field = PAYLOAD_17BIT;
        const FIELDS: &'static [Field] = &[
            Self::MINIMUM_CURRENT,
            Self::DECREMENT_SPEED,
            Self::UPPER_THRESHOLD,
            Self::INCREMENT_SIZE,
            Self::LOWER_THRESHOLD,
        ];
    }

    /// SGCSCONF（stallGuard2 + 电流设定）
    #[derive(Debug)]
    pub enum StallGuardControl {}

    impl StallGuardControl {
        pub const FILTER_ENABLE: Field = Field::bit("SFILT", 16);
        /// 7 位有符号阈值（-64..=63）
        pub const STALL_GUARD_THRESHOLD: Field = Field::new("SGT", 8, 14);
        pub const CURRENT_SCALE: Field = Field::new("CS", 0, 4);
    }

    impl DriverRegisterKind for StallGuardControl {
        const NAME: &'static str = "SGCSCONF";
        const ADDRESS: Field = ADDRESS_3BIT;
        const ADDRESS_VALUE: u32 = 0b110;
        const PAYLOAD: Field = PAYLOAD_17BIT;
        const FIELDS: &'static [Field] = &[
            Self::FILTER_ENABLE,
            Self::STALL_GUARD_THRESHOLD,
            Self::CURRENT_SCALE,
        ];
    }

    /// DRVCONF
    #[derive(Debug)]
    pub enum DriverConfig {}

    impl DriverConfig {
        pub const TEST_MODE: Field = Field::bit("TST", 16);
        pub const SLOPE_HIGH_SIDE: Field = Field::new("SLPH", 14, 15);
        pub const SLOPE_LOW_SIDE: Field = Field::new("SLPL", 12, 13);
        pub const DISABLE_SHORT_TO_GROUND: Field = Field::bit("DISS2G", 10);
        pub const SHORT_TO_GROUND_TIMER: Field = Field::new("TS2G", 8, 9);
        pub const STEP_DIR_OFF: Field = Field::bit("SDOFF", 7);
        pub const SENSE_VOLTAGE: Field = Field::bit("VSENSE", 6);
        pub const READOUT_SELECT: Field = Field::new("RDSEL", 4, 5);
    }

    impl DriverRegisterKind for DriverConfig {
        const NAME: &'static str = "DRVCONF";
        const ADDRESS: Field = ADDRESS_3BIT;
        const ADDRESS_VALUE: u32 = 0b111;
        const PAYLOAD: Field = PAYLOAD_17BIT;
        const FIELDS: &'static [Field] = &[
            Self::TEST_MODE,
            Self::SLOPE_HIGH_SIDE,
            Self::SLOPE_LOW_SIDE,
            Self::DISABLE_SHORT_TO_GROUND,
            Self::SHORT_TO_GROUND_TIMER,
            Self::STEP_DIR_OFF,
            Self::SENSE_VOLTAGE,
            Self::READOUT_SELECT,
        ];
    }
}

/// TMC260 寄存器值类型
///
/// 构造时即写入本寄存器的固定地址，之后只有有效负载与字段可写。
pub struct DriverRegister<K: DriverRegisterKind> {
    word: DataWord,
    _kind: PhantomData<K>,
}

pub type DriverControlData = DriverRegister<kind::DriverControl>;
pub type ChopperControlData = DriverRegister<kind::ChopperControl>;
pub type CoolStepControlData = DriverRegister<kind::CoolStepControl>;
pub type StallGuardControlData = DriverRegister<kind::StallGuardControl>;
pub type DriverConfigData = DriverRegister<kind::DriverConfig>;

impl<K: DriverRegisterKind> DriverRegister<K> {
    /// 创建有效负载为 0 的寄存器
    pub fn new() -> Self {
        let mut word = DataWord::default();
        word.set_truncated(K::ADDRESS, K::ADDRESS_VALUE);
        Self {
            word,
            _kind: PhantomData,
        }
    }

    /// 由有效负载创建
    pub fn from_payload(payload: u32) -> Result<Self, ProtocolError> {
        let mut register = Self::new();
        register.set_payload(payload)?;
        Ok(register)
    }

    /// 由完整数据报解析（校验位宽与地址）
    pub fn from_datagram(datagram: u32) -> Result<Self, ProtocolError> {
        if !DATAGRAM.accepts(datagram) {
            return Err(ProtocolError::OutOfRange {
                field: DATAGRAM.name,
                value: datagram,
                width: DATAGRAM.width(),
            });
        }
        let word = DataWord::new(datagram);
        let address = word.get(K::ADDRESS);
        if address != K::ADDRESS_VALUE {
            return Err(ProtocolError::InvalidAddress {
                register: K::NAME,
                expected: K::ADDRESS_VALUE,
                actual: address,
            });
        }
        Ok(Self {
            word,
            _kind: PhantomData,
        })
    }

    /// 要发往芯片的 20 位数据报
    pub fn datagram(&self) -> u32 {
        self.word.raw()
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }
}

impl<K: DriverRegisterKind> RegisterWord for DriverRegister<K> {
    const ADDRESS: Field = K::ADDRESS;
    const PAYLOAD: Field = K::PAYLOAD;

    fn data_word(&self) -> DataWord {
        self.word
    }

    fn data_word_mut(&mut self) -> &mut DataWord {
        &mut self.word
    }
}

impl<K: DriverRegisterKind> Default for DriverRegister<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: DriverRegisterKind> Clone for DriverRegister<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: DriverRegisterKind> Copy for DriverRegister<K> {}

impl<K: DriverRegisterKind> PartialEq for DriverRegister<K> {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word
    }
}

impl<K: DriverRegisterKind> Eq for DriverRegister<K> {}

impl<K: DriverRegisterKind> fmt::Debug for DriverRegister<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(K::NAME);
        for field in K::FIELDS {
            s.field(field.name, &self.word.get(*field));
        }
        s.finish()
    }
}

impl DriverControlData {
    pub fn microstep_resolution(&self) -> u32 {
        self.field(kind::DriverControl::MICROSTEP_RESOLUTION)
    }

    pub fn set_microstep_resolution(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_field(kind::DriverControl::MICROSTEP_RESOLUTION, value)
    }

    pub fn interpolation(&self) -> bool {
        self.word.get_bool(kind::DriverControl::INTERPOLATION)
    }

    pub fn set_interpolation(&mut self, enabled: bool) {
        self.word.set_bool(kind::DriverControl::INTERPOLATION, enabled);
    }

    pub fn double_edge(&self) -> bool {
        self.word.get_bool(kind::DriverControl::DOUBLE_EDGE)
    }

    pub fn set_double_edge(&mut self, enabled: bool) {
        self.word.set_bool(kind::DriverControl::DOUBLE_EDGE, enabled);
    }
}

impl ChopperControlData {
    pub fn off_time(&self) -> u32 {
        self.field(kind::ChopperControl::OFF_TIME)
    }

    pub fn set_off_time(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_field(kind::ChopperControl::OFF_TIME, value)
    }

    pub fn blanking_time(&self) -> u32 {
        self.field(kind::ChopperControl::BLANKING_TIME)
    }

    pub fn set_blanking_time(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_field(kind::ChopperControl::BLANKING_TIME, value)
    }
}

impl CoolStepControlData {
    pub fn lower_threshold(&self) -> u32 {
        self.field(kind::CoolStepControl::LOWER_THRESHOLD)
    }

    pub fn upper_threshold(&self) -> u32 {
        self.field(kind::CoolStepControl::UPPER_THRESHOLD)
    }
}

impl StallGuardControlData {
    /// 电流档位 CS（0..=31）
    pub fn current_scale(&self) -> u32 {
        self.field(kind::StallGuardControl::CURRENT_SCALE)
    }

    pub fn set_current_scale(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_field(kind::StallGuardControl::CURRENT_SCALE, value)
    }

    /// stallGuard 阈值原始值（7 位补码）
    pub fn stall_guard_threshold_raw(&self) -> u32 {
        self.field(kind::StallGuardControl::STALL_GUARD_THRESHOLD)
    }

    pub fn set_stall_guard_threshold_raw(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_field(kind::StallGuardControl::STALL_GUARD_THRESHOLD, value)
    }

    pub fn filter_enabled(&self) -> bool {
        self.word.get_bool(kind::StallGuardControl::FILTER_ENABLE)
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.word.set_bool(kind::StallGuardControl::FILTER_ENABLE, enabled);
    }
}

impl DriverConfigData {
    pub fn sense_voltage_high(&self) -> bool {
        self.word.get_bool(kind::DriverConfig::SENSE_VOLTAGE)
    }

    pub fn readout_select(&self) -> u32 {
        self.field(kind::DriverConfig::READOUT_SELECT)
    }

    pub fn set_readout_select(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_field(kind::DriverConfig::READOUT_SELECT, value)
    }
}

/// 驱动芯片状态标志（读回数据报 Bit 0-7）
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct DriverStatusFlags {
    pub stall_guard: bool,              // Bit 0: SG
    pub over_temperature: bool,         // Bit 1: OT
    pub over_temperature_warning: bool, // Bit 2: OTPW
    pub short_to_ground_a: bool,        // Bit 3: S2GA
    pub short_to_ground_b: bool,        // Bit 4: S2GB
    pub open_load_a: bool,              // Bit 5: OLA
    pub open_load_b: bool,              // Bit 6: OLB
    pub standstill: bool,               // Bit 7: STST
}

impl DriverStatusFlags {
    /// 由读回数据报解析（只取低 8 位）
    pub fn from_response(response: u32) -> Self {
        Self::from(u8::new((response & 0xFF) as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::{output_mask_of, overlapping_fields};

    fn check_layout<K: DriverRegisterKind>() {
        assert!(
            overlapping_fields(K::FIELDS).is_empty(),
            "{} has overlapping fields",
            K::NAME
        );
        assert!(!K::ADDRESS.range.overlaps(K::PAYLOAD.range));
        assert_eq!(
            K::ADDRESS.output_mask() | K::PAYLOAD.output_mask(),
            DATAGRAM.output_mask()
        );
        for field in K::FIELDS {
            assert_eq!(
                field.output_mask() & !K::PAYLOAD.output_mask(),
                0,
                "{}.{} leaks into the address bits",
                K::NAME,
                field.name
            );
        }
    }

    #[test]
    fn test_layouts_are_consistent() {
        check_layout::<kind::DriverControl>();
        check_layout::<kind::ChopperControl>();
        check_layout::<kind::CoolStepControl>();
        check_layout::<kind::StallGuardControl>();
        check_layout::<kind::DriverConfig>();
    }

    #[test]
    fn test_fixed_addresses() {
        assert_eq!(DriverControlData::new().datagram(), 0x00000);
        assert_eq!(ChopperControlData::new().datagram(), 0x80000);
        assert_eq!(CoolStepControlData::new().datagram(), 0xA0000);
        assert_eq!(StallGuardControlData::new().datagram(), 0xC0000);
        assert_eq!(DriverConfigData::new().datagram(), 0xE0000);
    }

    #[test]
    fn test_stall_guard_layout_against_reference() {
        // SFILT = bit 16, SGT = bits 14:8, CS = bits 4:0
        let sfilt = output_mask_of(
            |w| w.get(kind::StallGuardControl::FILTER_ENABLE),
            |w, v| w.set_truncated(kind::StallGuardControl::FILTER_ENABLE, v),
        );
        let sgt = output_mask_of(
            |w| w.get(kind::StallGuardControl::STALL_GUARD_THRESHOLD),
            |w, v| w.set_truncated(kind::StallGuardControl::STALL_GUARD_THRESHOLD, v),
        );
        let cs = output_mask_of(
            |w| w.get(kind::StallGuardControl::CURRENT_SCALE),
            |w, v| w.set_truncated(kind::StallGuardControl::CURRENT_SCALE, v),
        );
        assert_eq!(sfilt, 0x1_0000);
        assert_eq!(sgt, 0x7F00);
        assert_eq!(cs, 0x1F);
    }

    #[test]
    fn test_named_accessors_match_field_table() {
        let mut sg = StallGuardControlData::new();
        sg.set_current_scale(31).unwrap();
        assert_eq!(sg.datagram(), 0xC001F);
        sg.set_stall_guard_threshold_raw(0x7F).unwrap();
        sg.set_filter_enabled(true);
        assert_eq!(sg.datagram(), 0xD7F1F);
        assert_eq!(sg.current_scale(), 31);
        assert_eq!(sg.stall_guard_threshold_raw(), 0x7F);
        assert!(sg.filter_enabled());

        assert!(sg.set_current_scale(32).is_err());
        assert_eq!(sg.current_scale(), 31);
    }

    #[test]
    fn test_payload_cannot_touch_address() {
        let mut chop = ChopperControlData::new();
        assert!(chop.set_payload(0x2_0000).is_err());
        chop.set_payload(0x1_4557).unwrap();
        assert_eq!(chop.datagram(), 0x9_4557);
        assert_eq!(chop.address(), 0b100);
        assert_eq!(chop.off_time(), 7);
        assert_eq!(chop.blanking_time(), 2);
    }

    #[test]
    fn test_from_datagram_checks_address() {
        let sg = StallGuardControlData::from_datagram(0xD0505).unwrap();
        assert_eq!(sg.current_scale(), 5);

        let err = StallGuardControlData::from_datagram(0x94557).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidAddress {
                register: "SGCSCONF",
                expected: 0b110,
                actual: 0b100,
            }
        );

        assert!(matches!(
            DriverControlData::from_datagram(0x10_0000),
            Err(ProtocolError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_driver_status_flags() {
        let flags = DriverStatusFlags::from_response(0b1000_0011);
        assert!(flags.stall_guard());
        assert!(flags.over_temperature());
        assert!(!flags.over_temperature_warning());
        assert!(flags.standstill());
    }
}
