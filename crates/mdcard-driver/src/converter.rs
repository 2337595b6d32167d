//! 单位换算
//!
//! - [`SignedIntConverter`]: 窄位宽有符号数（读时符号扩展，写时截断）
//! - [`SpeedConverter`]: TMC429 速度寄存器值 ↔ 微步/秒
//! - [`CurrentConverter`]: TMC260 电流缩放 CS ↔ 安培

/// 窄位宽有符号整数编解码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedIntConverter {
    width: u32,
}

/// 24 位位置（X_TARGET / X_ACTUAL / X_LATCHED）
pub const POSITION: SignedIntConverter = SignedIntConverter::new(24);
/// 12 位速度（V_TARGET / V_ACTUAL）
pub const VELOCITY: SignedIntConverter = SignedIntConverter::new(12);
/// 12 位加速度（A_ACTUAL）
pub const ACCELERATION: SignedIntConverter = SignedIntConverter::new(12);

impl SignedIntConverter {
    pub const fn new(width: u32) -> Self {
        assert!(width >= 1 && width <= 32, "invalid width");
        Self { width }
    }

    pub const fn width(self) -> u32 {
        self.width
    }

    /// 原始字段值 → 有符号值（符号扩展）
    pub const fn to_signed(self, raw: u32) -> i32 {
        let shift = 32 - self.width;
        ((raw << shift) as i32) >> shift
    }

    /// 有符号值 → 原始字段值（截断，不检查范围）
    pub const fn to_raw(self, value: i32) -> u32 {
        let mask = if self.width == 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        (value as u32) & mask
    }

    pub const fn min(self) -> i32 {
        self.to_signed(1 << (self.width - 1))
    }

    pub const fn max(self) -> i32 {
        (self.to_raw(-1) >> 1) as i32
    }
}

/// TMC429 速度寄存器的最大值（11 位无符号）
pub const MAX_VELOCITY_REGISTER: u32 = 2047;

/// 速度换算
///
/// `v[µsteps/s] = f_clk · v_reg / (2^pulse_div · 2048 · 32)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedConverter {
    system_clock_hz: u32,
    pulse_divider: u32,
}

impl SpeedConverter {
    pub fn new(system_clock_hz: u32, pulse_divider: u32) -> Self {
        Self {
            system_clock_hz,
            pulse_divider,
        }
    }

    fn scale(&self) -> f64 {
        f64::from(self.system_clock_hz) / ((1u64 << self.pulse_divider) as f64 * 2048.0 * 32.0)
    }

    pub fn to_usteps_per_second(&self, register: u32) -> f64 {
        f64::from(register) * self.scale()
    }

    /// 微步/秒 → 寄存器值（向下取整，限制在 0..=2047）
    pub fn to_register(&self, usteps_per_second: f64) -> u32 {
        if !usteps_per_second.is_finite() || usteps_per_second <= 0.0 {
            return 0;
        }
        let register = (usteps_per_second / self.scale()).floor();
        if register >= f64::from(MAX_VELOCITY_REGISTER) {
            MAX_VELOCITY_REGISTER
        } else {
            register as u32
        }
    }
}

/// TMC260 电流缩放的最大值（5 位）
pub const MAX_CURRENT_SCALE: u32 = 31;

/// 电流换算
///
/// `I = (CS + 1) / 32 · I_max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentConverter {
    max_current_amps: f64,
}

impl CurrentConverter {
    pub fn new(max_current_amps: f64) -> Self {
        Self { max_current_amps }
    }

    pub fn to_amps(&self, current_scale: u32) -> f64 {
        f64::from(current_scale.min(MAX_CURRENT_SCALE) + 1) / 32.0 * self.max_current_amps
    }

    /// 安培 → CS（向下取整，限制在 0..=31）
    pub fn to_current_scale(&self, amps: f64) -> u32 {
        if !amps.is_finite() || self.max_current_amps <= 0.0 {
            return 0;
        }
        let scale = (amps / self.max_current_amps * 32.0).floor() - 1.0;
        if scale <= 0.0 {
            0
        } else if scale >= f64::from(MAX_CURRENT_SCALE) {
            MAX_CURRENT_SCALE
        } else {
            scale as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sign_extension() {
        assert_eq!(POSITION.to_signed(0x00_0001), 1);
        assert_eq!(POSITION.to_signed(0xFF_FFFF), -1);
        assert_eq!(POSITION.to_signed(0x80_0000), -8_388_608);
        assert_eq!(VELOCITY.to_signed(0x800), -2048);
        assert_eq!(VELOCITY.to_signed(0x7FF), 2047);
    }

    #[test]
    fn test_truncating_encode() {
        assert_eq!(POSITION.to_raw(-1), 0xFF_FFFF);
        assert_eq!(VELOCITY.to_raw(-2048), 0x800);
        // 超出范围的值不报错，只截断
        assert_eq!(VELOCITY.to_raw(4096 + 5), 5);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(VELOCITY.min(), -2048);
        assert_eq!(VELOCITY.max(), 2047);
        assert_eq!(SignedIntConverter::new(32).min(), i32::MIN);
        assert_eq!(SignedIntConverter::new(32).max(), i32::MAX);
    }

    #[test]
    fn test_speed_conversion() {
        // 32 MHz, pulse_div = 7: scale = 32e6 / (128 * 65536)
        let converter = SpeedConverter::new(32_000_000, 7);
        let speed = converter.to_usteps_per_second(1000);
        assert!((speed - 3814.697265625).abs() < 1e-9);
        assert_eq!(converter.to_register(speed), 1000);
        assert_eq!(converter.to_register(1e12), MAX_VELOCITY_REGISTER);
        assert_eq!(converter.to_register(-5.0), 0);
    }

    #[test]
    fn test_current_conversion() {
        let converter = CurrentConverter::new(1.8);
        assert!((converter.to_amps(31) - 1.8).abs() < 1e-12);
        assert!((converter.to_amps(15) - 0.9).abs() < 1e-12);
        assert_eq!(converter.to_current_scale(0.9), 15);
        assert_eq!(converter.to_current_scale(10.0), 31);
        assert_eq!(converter.to_current_scale(0.0), 0);
    }

    fn width_and_value() -> impl Strategy<Value = (u32, i32)> {
        (1u32..=32).prop_flat_map(|width| {
            let converter = SignedIntConverter::new(width);
            (Just(width), converter.min()..=converter.max())
        })
    }

    proptest! {
        /// 编码后解码为恒等映射
        #[test]
        fn encode_decode_identity((width, value) in width_and_value()) {
            let converter = SignedIntConverter::new(width);
            prop_assert_eq!(converter.to_signed(converter.to_raw(value)), value);
        }

        /// 最高位置位的原始值解码为负数
        #[test]
        fn top_bit_decodes_negative(width in 1u32..=32, raw in any::<u32>()) {
            let converter = SignedIntConverter::new(width);
            let raw = converter.to_raw(raw as i32) | (1u32 << (width - 1));
            prop_assert!(converter.to_signed(raw) < 0);
        }

        /// 寄存器值换算为速度后再换算回来不变
        #[test]
        fn speed_register_roundtrip(register in 0u32..=MAX_VELOCITY_REGISTER, pulse_div in 0u32..=13) {
            let converter = SpeedConverter::new(32_000_000, pulse_div);
            prop_assert_eq!(converter.to_register(converter.to_usteps_per_second(register)), register);
        }
    }
}
