//! TMC429 运动控制器寄存器
//!
//! # 输入字（主机 → 控制器）
//!
//! | 位 | 字段 | 说明 |
//! |----|------|------|
//! | 31    | RRS     | 读请求重复标志 |
//! | 30:29 | SMDA    | 选择器：0..=2 为电机，3 为公共寄存器 |
//! | 28:25 | IDX     | 子索引 |
//! | 30:25 | ADDRESS | 完整逻辑地址（SMDA + IDX） |
//! | 24    | RW      | 0 = 写，1 = 读 |
//! | 23:0  | DATA    | 有效负载 |
//!
//! # 输出字（控制器 → 主机）
//!
//! | 位 | 字段 |
//! |----|------|
//! | 31:24 | 状态字节（见 [`ControlerStatusBits`]） |
//! | 23:0  | 有效负载 |

use std::fmt;
use std::marker::PhantomData;

use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ProtocolError;
use crate::register::{AddressWord, RegisterWord};
use crate::word::{DataWord, Field};

pub const READ_REQUEST_REPEAT: Field = Field::bit("RRS", 31);
pub const SELECTOR: Field = Field::new("SMDA", 29, 30);
pub const SUB_INDEX: Field = Field::new("IDX", 25, 28);
pub const ADDRESS: Field = Field::new("ADDRESS", 25, 30);
pub const READ_WRITE: Field = Field::bit("RW", 24);
pub const DATA: Field = Field::new("DATA", 0, 23);
pub const STATUS: Field = Field::new("STATUS", 24, 31);

/// 公共寄存器的选择器值
pub const COMMON_SELECTOR: u32 = 3;
/// TMC429 最多驱动的电机数
pub const MAX_MOTORS: u8 = 3;
/// 类型/版本寄存器的期望值
pub const CHIP_VERSION: u32 = 0x42_9101;

/// 逻辑地址的选择器部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// 单个电机（0..=2）
    Motor(u8),
    /// 芯片公共寄存器
    Common,
}

impl Selector {
    /// 电机选择器（校验电机编号）
    pub fn motor(id: u8) -> Result<Self, ProtocolError> {
        if id >= MAX_MOTORS {
            return Err(ProtocolError::InvalidValue {
                field: SELECTOR.name,
                value: u32::from(id),
            });
        }
        Ok(Selector::Motor(id))
    }

    pub fn value(self) -> u32 {
        match self {
            Selector::Motor(id) => u32::from(id),
            Selector::Common => COMMON_SELECTOR,
        }
    }

    pub fn from_value(value: u32) -> Self {
        if value == COMMON_SELECTOR {
            Selector::Common
        } else {
            Selector::Motor(value as u8)
        }
    }
}

/// 电机寄存器子索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MotorRegister {
    TargetPosition = 0x0,
    ActualPosition = 0x1,
    MinimumVelocity = 0x2,
    MaximumVelocity = 0x3,
    TargetVelocity = 0x4,
    ActualVelocity = 0x5,
    MaximumAcceleration = 0x6,
    ActualAcceleration = 0x7,
    AccelerationThreshold = 0x8,
    ProportionalityFactors = 0x9,
    ReferenceConfigAndRampMode = 0xA,
    InterruptFlags = 0xB,
    DividersAndMicroStepResolution = 0xC,
    DeltaXReferenceTolerance = 0xD,
    PositionLatched = 0xE,
    MicroStepCount = 0xF,
}

/// 公共寄存器子索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CommonRegister {
    DatagramLowWord = 0x0,
    DatagramHighWord = 0x1,
    CoverPositionAndLength = 0x2,
    CoverDatagram = 0x3,
    InterfaceConfiguration = 0x4,
    PositionCompare = 0x5,
    PositionCompareInterrupt = 0x6,
    PowerDown = 0x8,
    ChipVersion = 0x9,
    ReferenceSwitches = 0xE,
    GlobalParameters = 0xF,
}

/// 斜坡模式（RAMP_MODE）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RampMode {
    #[default]
    Ramp = 0,
    Soft = 1,
    Velocity = 2,
    Hold = 3,
}

/// 控制器输入字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ControlerInputWord(DataWord);

impl RegisterWord for ControlerInputWord {
    const ADDRESS: Field = ADDRESS;
    const PAYLOAD: Field = DATA;

    fn data_word(&self) -> DataWord {
        self.0
    }

    fn data_word_mut(&mut self) -> &mut DataWord {
        &mut self.0
    }
}

impl AddressWord for ControlerInputWord {}

impl ControlerInputWord {
    /// 写访问
    pub fn write(selector: Selector, sub_index: u8, payload: u32) -> Result<Self, ProtocolError> {
        let mut word = Self::addressed(selector, sub_index)?;
        word.set_payload(payload)?;
        Ok(word)
    }

    /// 读访问（有效负载为 0）
    pub fn read(selector: Selector, sub_index: u8) -> Result<Self, ProtocolError> {
        let mut word = Self::addressed(selector, sub_index)?;
        word.0.set_bool(READ_WRITE, true);
        Ok(word)
    }

    fn addressed(selector: Selector, sub_index: u8) -> Result<Self, ProtocolError> {
        let mut word = DataWord::default();
        word.set(SELECTOR, selector.value())?;
        word.set(SUB_INDEX, u32::from(sub_index))?;
        Ok(Self(word))
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(DataWord::new(raw))
    }

    pub fn selector(&self) -> Selector {
        Selector::from_value(self.0.get(SELECTOR))
    }

    pub fn set_selector(&mut self, selector: Selector) -> Result<(), ProtocolError> {
        self.0.set(SELECTOR, selector.value())
    }

    pub fn sub_index(&self) -> u8 {
        self.0.get(SUB_INDEX) as u8
    }

    pub fn is_read(&self) -> bool {
        self.0.get_bool(READ_WRITE)
    }

    pub fn set_read(&mut self, read: bool) {
        self.0.set_bool(READ_WRITE, read);
    }

    pub fn read_request_repeat(&self) -> bool {
        self.0.get_bool(READ_REQUEST_REPEAT)
    }
}

/// 控制器状态字节
///
/// 每个电机占一对位（目标到达 xEQt、参考开关 RS），最高两位为全局标志。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct ControlerStatusBits {
    pub target_reached_1: bool,         // Bit 0: xEQt1
    pub reference_switch_1: bool,       // Bit 1: RS1
    pub target_reached_2: bool,         // Bit 2: xEQt2
    pub reference_switch_2: bool,       // Bit 3: RS2
    pub target_reached_3: bool,         // Bit 4: xEQt3
    pub reference_switch_3: bool,       // Bit 5: RS3
    pub cover_datagram_waiting: bool,   // Bit 6: CDGW
    pub interrupt: bool,                // Bit 7: INT
}

impl ControlerStatusBits {
    pub fn target_reached(&self, motor: u8) -> bool {
        match motor {
            0 => self.target_reached_1(),
            1 => self.target_reached_2(),
            2 => self.target_reached_3(),
            _ => false,
        }
    }

    pub fn reference_switch(&self, motor: u8) -> bool {
        match motor {
            0 => self.reference_switch_1(),
            1 => self.reference_switch_2(),
            2 => self.reference_switch_3(),
            _ => false,
        }
    }
}

/// 控制器输出字（读回寄存器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlerOutputWord(DataWord);

impl ControlerOutputWord {
    pub fn new(status: u8, payload: u32) -> Result<Self, ProtocolError> {
        let mut word = DataWord::default();
        word.set(STATUS, u32::from(status))?;
        word.set(DATA, payload)?;
        Ok(Self(word))
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(DataWord::new(raw))
    }

    pub fn raw(&self) -> u32 {
        self.0.raw()
    }

    pub fn status(&self) -> ControlerStatusBits {
        ControlerStatusBits::from(u8::new(self.0.get(STATUS) as u8))
    }

    pub fn payload(&self) -> u32 {
        self.0.get(DATA)
    }
}

/// 参考开关寄存器（公共寄存器 0xE，只读）
///
/// L = 负方向开关，R = 正方向开关。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct ReferenceSwitchBits {
    pub left_1: bool,  // Bit 0
    pub right_1: bool, // Bit 1
    pub left_2: bool,  // Bit 2
    pub right_2: bool, // Bit 3
    pub left_3: bool,  // Bit 4
    pub right_3: bool, // Bit 5
    pub reserved: u2,  // Bit 6-7: 保留
}

impl ReferenceSwitchBits {
    pub fn from_payload(payload: u32) -> Self {
        Self::from(u8::new((payload & 0xFF) as u8))
    }

    pub fn negative_active(&self, motor: u8) -> bool {
        match motor {
            0 => self.left_1(),
            1 => self.left_2(),
            2 => self.left_3(),
            _ => false,
        }
    }

    pub fn positive_active(&self, motor: u8) -> bool {
        match motor {
            0 => self.right_1(),
            1 => self.right_2(),
            2 => self.right_3(),
            _ => false,
        }
    }
}

// ============================================================================
// 带字段表的控制器寄存器
// ============================================================================

/// 控制器寄存器种类：固定子索引与字段表
pub trait ControlerRegisterKind: 'static {
    const NAME: &'static str;
    const SUB_INDEX: u8;
    /// 语义字段（互不重叠，位置相对于有效负载 = 输入字绝对位置）
    const FIELDS: &'static [Field];
}

pub mod kind {
    use super::{CommonRegister, ControlerRegisterKind, Field, MotorRegister};

    /// 加速度阈值与电流缩放（电机寄存器 0x8）
    #[derive(Debug)]
    pub enum AccelerationThreshold {}

    impl AccelerationThreshold {
        pub const A_THRESHOLD: Field = Field::new("A_THRESHOLD", 0, 10);
        pub const IS_AGTAT: Field = Field::new("IS_AGTAT", 12, 14);
        pub const IS_ALEAT: Field = Field::new("IS_ALEAT", 16, 18);
        pub const IS_V0: Field = Field::new("IS_V0", 20, 22);
    }

    impl ControlerRegisterKind for AccelerationThreshold {
        const NAME: &'static str = "ACCELERATION_THRESHOLD";
        const SUB_INDEX: u8 = MotorRegister::AccelerationThreshold as u8;
        const FIELDS: &'static [Field] = &[
            Self::A_THRESHOLD,
            Self::IS_AGTAT,
            Self::IS_ALEAT,
            Self::IS_V0,
        ];
    }

    /// 比例因子（电机寄存器 0x9）
    #[derive(Debug)]
    pub enum ProportionalityFactors {}

    impl ProportionalityFactors {
        /// 高位必须为 1（128..=255）
        pub const PMUL: Field = Field::new("PMUL", 8, 15);
        pub const PDIV: Field = Field::new("PDIV", 0, 3);
    }

    impl ControlerRegisterKind for ProportionalityFactors {
        const NAME: &'static str = "PROPORTIONALITY_FACTORS";
        const SUB_INDEX: u8 = MotorRegister::ProportionalityFactors as u8;
        const FIELDS: &'static [Field] = &[Self::PMUL, Self::PDIV];
    }

    /// 参考开关配置与斜坡模式（电机寄存器 0xA）
    #[derive(Debug)]
    pub enum ReferenceConfigAndRampMode {}

    impl ReferenceConfigAndRampMode {
        pub const RAMP_MODE: Field = Field::new("RAMP_MODE", 0, 1);
        pub const DISABLE_STOP_LEFT: Field = Field::bit("DISABLE_STOP_L", 8);
        pub const DISABLE_STOP_RIGHT: Field = Field::bit("DISABLE_STOP_R", 9);
        pub const SOFT_STOP: Field = Field::bit("SOFT_STOP", 10);
        pub const REF_RNL: Field = Field::bit("REF_RNL", 11);
        pub const LATCH_POSITION: Field = Field::bit("LP", 16);
        /// 整个 REF_CONF 半字节的别名视图
        pub const REF_CONF: Field = Field::new("REF_CONF", 8, 11);
    }

    impl ControlerRegisterKind for ReferenceConfigAndRampMode {
        const NAME: &'static str = "REFERENCE_CONFIG_AND_RAMP_MODE";
        const SUB_INDEX: u8 = MotorRegister::ReferenceConfigAndRampMode as u8;
        const FIELDS: &'static [Field] = &[
            Self::RAMP_MODE,
            Self::DISABLE_STOP_LEFT,
            Self::DISABLE_STOP_RIGHT,
            Self::SOFT_STOP,
            Self::REF_RNL,
            Self::LATCH_POSITION,
        ];
    }

    /// 中断掩码与标志（电机寄存器 0xB）
    #[derive(Debug)]
    pub enum Interrupt {}

    impl Interrupt {
        pub const FLAGS: Field = Field::new("INT_FLAGS", 0, 7);
        pub const MASK: Field = Field::new("INT_MASK", 8, 15);
    }

    impl ControlerRegisterKind for Interrupt {
        const NAME: &'static str = "INTERRUPT";
        const SUB_INDEX: u8 = MotorRegister::InterruptFlags as u8;
        const FIELDS: &'static [Field] = &[Self::FLAGS, Self::MASK];
    }

    /// 分频器与微步分辨率（电机寄存器 0xC）
    #[derive(Debug)]
    pub enum DividersAndMicroStepResolution {}

    impl DividersAndMicroStepResolution {
        pub const MICRO_STEP_RESOLUTION: Field = Field::new("USRS", 0, 2);
        pub const RAMP_DIVIDER: Field = Field::new("RAMP_DIV", 8, 11);
        pub const PULSE_DIVIDER: Field = Field::new("PULSE_DIV", 12, 15);
    }

    impl ControlerRegisterKind for DividersAndMicroStepResolution {
        const NAME: &'static str = "DIVIDERS_AND_MICRO_STEP_RESOLUTION";
        const SUB_INDEX: u8 = MotorRegister::DividersAndMicroStepResolution as u8;
        const FIELDS: &'static [Field] = &[
            Self::MICRO_STEP_RESOLUTION,
            Self::RAMP_DIVIDER,
            Self::PULSE_DIVIDER,
        ];
    }

    /// 接口配置（公共寄存器 0x4）
    #[derive(Debug)]
    pub enum InterfaceConfiguration {}

    impl InterfaceConfiguration {
        pub const INVERT_REFERENCE: Field = Field::bit("INV_REF", 0);
        pub const SDO_INTERRUPT: Field = Field::bit("SDO_INT", 1);
        pub const STEP_HALF: Field = Field::bit("STEP_HALF", 2);
        pub const INVERT_STEP: Field = Field::bit("INV_STP", 3);
        pub const INVERT_DIRECTION: Field = Field::bit("INV_DIR", 4);
        pub const ENABLE_STEP_DIRECTION: Field = Field::bit("EN_SD", 5);
        pub const POSITION_COMPARE_SELECT: Field = Field::new("POS_COMP_SEL", 6, 7);
        pub const ENABLE_REFERENCE_RIGHT: Field = Field::bit("EN_REFR", 8);
    }

    impl ControlerRegisterKind for InterfaceConfiguration {
        const NAME: &'static str = "INTERFACE_CONFIGURATION";
        const SUB_INDEX: u8 = CommonRegister::InterfaceConfiguration as u8;
        const FIELDS: &'static [Field] = &[
            Self::INVERT_REFERENCE,
            Self::SDO_INTERRUPT,
            Self::STEP_HALF,
            Self::INVERT_STEP,
            Self::INVERT_DIRECTION,
            Self::ENABLE_STEP_DIRECTION,
            Self::POSITION_COMPARE_SELECT,
            Self::ENABLE_REFERENCE_RIGHT,
        ];
    }

    /// 步进电机全局参数（公共寄存器 0xF）
    #[derive(Debug)]
    pub enum StepperMotorGlobalParameters {}

    impl StepperMotorGlobalParameters {
        pub const LAST_STEPPER_MOTOR_DRIVER: Field = Field::new("LSMD", 0, 1);
        pub const CHIP_SELECT_POLARITY: Field = Field::bit("NSCS_S", 2);
        pub const CLOCK_POLARITY: Field = Field::bit("SCK_S", 3);
        pub const PHASE_POLARITY: Field = Field::bit("PH_AB", 4);
        pub const FAST_DECAY_POLARITY: Field = Field::bit("FD_AB", 5);
        pub const DAC_POLARITY: Field = Field::bit("DAC_AB", 6);
        pub const COMMON_CHIP_SELECT: Field = Field::bit("CS_COM_IND", 7);
        pub const CLOCK_DIVIDER: Field = Field::new("CLK2_DIV", 8, 15);
        pub const CONTINUOUS_UPDATE: Field = Field::bit("CONT_UPDATE", 16);
        pub const REFERENCE_MULTIPLEX: Field = Field::bit("REF_MUX", 20);
        pub const MOTOR_1_RIGHT: Field = Field::bit("MOT1R", 21);
    }

    impl ControlerRegisterKind for StepperMotorGlobalParameters {
        const NAME: &'static str = "STEPPER_MOTOR_GLOBAL_PARAMETERS";
        const SUB_INDEX: u8 = CommonRegister::GlobalParameters as u8;
        const FIELDS: &'static [Field] = &[
            Self::LAST_STEPPER_MOTOR_DRIVER,
            Self::CHIP_SELECT_POLARITY,
            Self::CLOCK_POLARITY,
            Self::PHASE_POLARITY,
            Self::FAST_DECAY_POLARITY,
            Self::DAC_POLARITY,
            Self::COMMON_CHIP_SELECT,
            Self::CLOCK_DIVIDER,
            Self::CONTINUOUS_UPDATE,
            Self::REFERENCE_MULTIPLEX,
            Self::MOTOR_1_RIGHT,
        ];
    }
}

/// 带固定子索引的控制器寄存器
///
/// 子索引在构造时写入；选择器（目标电机或公共）在构造时由调用者决定
/// （[`ControlerRegister::for_motor`]、[`ControlerRegister::common`]、[`ControlerRegister::from_payload`]），
/// 之后地址不可改写。发送前可以在 [`ControlerRegister::input_word`] 上改选择器。
pub struct ControlerRegister<K: ControlerRegisterKind> {
    word: ControlerInputWord,
    _kind: PhantomData<K>,
}

pub type AccelerationThresholdData = ControlerRegister<kind::AccelerationThreshold>;
pub type ProportionalityFactorData = ControlerRegister<kind::ProportionalityFactors>;
pub type ReferenceConfigAndRampModeData = ControlerRegister<kind::ReferenceConfigAndRampMode>;
pub type InterruptData = ControlerRegister<kind::Interrupt>;
pub type DividersAndMicroStepResolutionData = ControlerRegister<kind::DividersAndMicroStepResolution>;
pub type InterfaceConfiguration = ControlerRegister<kind::InterfaceConfiguration>;
pub type StepperMotorGlobalParameters = ControlerRegister<kind::StepperMotorGlobalParameters>;

impl<K: ControlerRegisterKind> ControlerRegister<K> {
    fn with_selector(selector: Selector) -> Self {
        let mut word = DataWord::default();
        word.set_truncated(SELECTOR, selector.value());
        word.set_truncated(SUB_INDEX, u32::from(K::SUB_INDEX));
        Self {
            word: ControlerInputWord(word),
            _kind: PhantomData,
        }
    }

    /// 目标为指定电机
    pub fn for_motor(motor: u8) -> Result<Self, ProtocolError> {
        Ok(Self::with_selector(Selector::motor(motor)?))
    }

    /// 目标为公共寄存器
    pub fn common() -> Self {
        Self::with_selector(Selector::Common)
    }

    /// 由选择器与有效负载创建
    pub fn from_payload(selector: Selector, payload: u32) -> Result<Self, ProtocolError> {
        let mut register = Self::with_selector(selector);
        register.set_payload(payload)?;
        Ok(register)
    }

    /// 要写入控制器的完整输入字
    pub fn input_word(&self) -> ControlerInputWord {
        self.word
    }

    pub fn selector(&self) -> Selector {
        self.word.selector()
    }

    pub fn sub_index(&self) -> u8 {
        K::SUB_INDEX
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }
}

impl<K: ControlerRegisterKind> RegisterWord for ControlerRegister<K> {
    const ADDRESS: Field = ADDRESS;
    const PAYLOAD: Field = DATA;

    fn data_word(&self) -> DataWord {
        self.word.0
    }

    fn data_word_mut(&mut self) -> &mut DataWord {
        &mut self.word.0
    }
}

impl<K: ControlerRegisterKind> Clone for ControlerRegister<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ControlerRegisterKind> Copy for ControlerRegister<K> {}

impl<K: ControlerRegisterKind> PartialEq for ControlerRegister<K> {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word
    }
}

impl<K: ControlerRegisterKind> Eq for ControlerRegister<K> {}

impl<K: ControlerRegisterKind> fmt::Debug for ControlerRegister<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(K::NAME);
        s.field("selector", &self.selector());
        for field in K::FIELDS {
            s.field(field.name, &self.word.0.get(*field));
        }
        s.finish()
    }
}

impl ReferenceConfigAndRampModeData {
    pub fn ramp_mode(&self) -> RampMode {
        // 2 位字段，四个取值都有定义
        RampMode::try_from(self.field(kind::ReferenceConfigAndRampMode::RAMP_MODE) as u8)
            .unwrap_or_default()
    }

    pub fn set_ramp_mode(&mut self, mode: RampMode) {
        self.word
            .0
            .set_truncated(kind::ReferenceConfigAndRampMode::RAMP_MODE, u32::from(u8::from(mode)));
    }

    /// 负方向（左）开关是否停止电机
    pub fn negative_switch_enabled(&self) -> bool {
        !self.word.0.get_bool(kind::ReferenceConfigAndRampMode::DISABLE_STOP_LEFT)
    }

    pub fn set_negative_switch_enabled(&mut self, enabled: bool) {
        self.word
            .0
            .set_bool(kind::ReferenceConfigAndRampMode::DISABLE_STOP_LEFT, !enabled);
    }

    /// 正方向（右）开关是否停止电机
    pub fn positive_switch_enabled(&self) -> bool {
        !self.word.0.get_bool(kind::ReferenceConfigAndRampMode::DISABLE_STOP_RIGHT)
    }

    pub fn set_positive_switch_enabled(&mut self, enabled: bool) {
        self.word
            .0
            .set_bool(kind::ReferenceConfigAndRampMode::DISABLE_STOP_RIGHT, !enabled);
    }

    pub fn soft_stop(&self) -> bool {
        self.word.0.get_bool(kind::ReferenceConfigAndRampMode::SOFT_STOP)
    }
}

impl DividersAndMicroStepResolutionData {
    pub fn pulse_divider(&self) -> u32 {
        self.field(kind::DividersAndMicroStepResolution::PULSE_DIVIDER)
    }

    pub fn ramp_divider(&self) -> u32 {
        self.field(kind::DividersAndMicroStepResolution::RAMP_DIVIDER)
    }

    pub fn micro_step_resolution(&self) -> u32 {
        self.field(kind::DividersAndMicroStepResolution::MICRO_STEP_RESOLUTION)
    }
}

impl ProportionalityFactorData {
    pub fn pmul(&self) -> u32 {
        self.field(kind::ProportionalityFactors::PMUL)
    }

    pub fn pdiv(&self) -> u32 {
        self.field(kind::ProportionalityFactors::PDIV)
    }
}
