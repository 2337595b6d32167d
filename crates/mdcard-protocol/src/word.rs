//! 32 位数据字与位段访问
//!
//! 寄存器布局以 [`Field`] 常量表的形式声明（数据而非代码），
//! 所有读写都经过 [`DataWord::get`] / [`DataWord::set`] 这一组通用访问函数。
//!
//! # 写入策略
//!
//! - [`DataWord::set`]：值超出位段宽度时返回 [`ProtocolError::OutOfRange`]，数据字保持不变
//! - [`DataWord::set_truncated`]：静默截断到位段宽度（仅用于热路径或有符号数编码）
//!
//! 两种策略都必须在调用点显式选择。

use crate::ProtocolError;

/// 闭区间位段 `[first, last]`（0..=31）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitRange {
    first: u8,
    last: u8,
}

impl BitRange {
    /// 创建位段
    ///
    /// 在常量上下文中使用时，非法区间会导致编译失败。
    pub const fn new(first: u8, last: u8) -> Self {
        assert!(first <= last && last < 32, "invalid bit range");
        Self { first, last }
    }

    /// 最低位
    pub const fn first(self) -> u8 {
        self.first
    }

    /// 最高位
    pub const fn last(self) -> u8 {
        self.last
    }

    /// 位宽
    pub const fn width(self) -> u32 {
        (self.last - self.first) as u32 + 1
    }

    /// 输入掩码：未移位的、位宽个 1
    pub const fn input_mask(self) -> u32 {
        if self.width() == 32 {
            u32::MAX
        } else {
            (1u32 << self.width()) - 1
        }
    }

    /// 输出掩码：位段在数据字中占用的位
    pub const fn output_mask(self) -> u32 {
        self.input_mask() << self.first
    }

    /// 两个位段是否有公共位
    pub const fn overlaps(self, other: BitRange) -> bool {
        self.output_mask() & other.output_mask() != 0
    }
}

/// 命名位段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    /// 字段名（用于错误信息）
    pub name: &'static str,
    /// 位段
    pub range: BitRange,
}

impl Field {
    /// 多位字段
    pub const fn new(name: &'static str, first: u8, last: u8) -> Self {
        Self {
            name,
            range: BitRange::new(first, last),
        }
    }

    /// 单位字段
    pub const fn bit(name: &'static str, bit: u8) -> Self {
        Self::new(name, bit, bit)
    }

    pub const fn width(self) -> u32 {
        self.range.width()
    }

    pub const fn input_mask(self) -> u32 {
        self.range.input_mask()
    }

    pub const fn output_mask(self) -> u32 {
        self.range.output_mask()
    }

    /// 值是否能无损放入该字段
    pub const fn accepts(self, value: u32) -> bool {
        value & !self.input_mask() == 0
    }
}

/// 32 位数据字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataWord(u32);

impl DataWord {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// 原始值
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn set_raw(&mut self, raw: u32) {
        self.0 = raw;
    }

    /// 读取字段（移位 + 掩码），不会观察到字段以外的位
    pub const fn get(self, field: Field) -> u32 {
        (self.0 & field.output_mask()) >> field.range.first
    }

    /// 读取单位字段
    pub const fn get_bool(self, field: Field) -> bool {
        self.get(field) != 0
    }

    /// 写入字段（检查范围）
    ///
    /// # 错误
    ///
    /// - `ProtocolError::OutOfRange`: 值在字段位宽之外有置位，数据字不被修改
    pub fn set(&mut self, field: Field, value: u32) -> Result<(), ProtocolError> {
        if !field.accepts(value) {
            return Err(ProtocolError::OutOfRange {
                field: field.name,
                value,
                width: field.width(),
            });
        }
        self.set_truncated(field, value);
        Ok(())
    }

    /// 写入字段（截断，不检查范围）
    ///
    /// 只修改字段输出掩码覆盖的位。
    pub fn set_truncated(&mut self, field: Field, value: u32) {
        let mask = field.output_mask();
        self.0 = (self.0 & !mask) | ((value << field.range.first) & mask);
    }

    /// 写入单位字段
    pub fn set_bool(&mut self, field: Field, value: bool) {
        self.set_truncated(field, u32::from(value));
    }

    /// 链式写入（检查范围）
    pub fn with(mut self, field: Field, value: u32) -> Result<Self, ProtocolError> {
        self.set(field, value)?;
        Ok(self)
    }
}

impl From<u32> for DataWord {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<DataWord> for u32 {
    fn from(word: DataWord) -> Self {
        word.0
    }
}

/// 由一对 getter/setter 推导输出掩码
///
/// 从全 1 数据字读出字段值，再写入全 0 数据字，得到的原始值即为该访问器对实际占用的位。
/// 用于交叉验证布局表，而不是定义布局。
pub fn output_mask_of<G, S>(get: G, set: S) -> u32
where
    G: Fn(&DataWord) -> u32,
    S: Fn(&mut DataWord, u32),
{
    let ones = DataWord::new(u32::MAX);
    let mut word = DataWord::default();
    set(&mut word, get(&ones));
    word.raw()
}

/// 找出字段表中意外重叠的字段对
pub fn overlapping_fields(fields: &[Field]) -> Vec<(&'static str, &'static str)> {
    let mut overlaps = Vec::new();
    for (i, a) in fields.iter().enumerate() {
        for b in &fields[i + 1..] {
            if a.range.overlaps(b.range) {
                overlaps.push((a.name, b.name));
            }
        }
    }
    overlaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range_strategy() -> impl Strategy<Value = (u8, u8)> {
        (0u8..32).prop_flat_map(|first| (Just(first), first..32u8))
    }

    #[test]
    fn test_masks_for_all_ranges() {
        for first in 0..32u8 {
            for last in first..32u8 {
                let range = BitRange::new(first, last);
                let expected_width = (last - first + 1) as u32;
                assert_eq!(range.width(), expected_width);
                assert_eq!(range.input_mask().count_ones(), expected_width);
                assert_eq!(range.output_mask().count_ones(), expected_width);
                assert_eq!(range.output_mask().trailing_zeros(), first as u32);
                assert_eq!(range.output_mask().leading_zeros(), 31 - last as u32);
            }
        }
    }

    #[test]
    fn test_full_word_range() {
        let field = Field::new("ALL", 0, 31);
        assert_eq!(field.input_mask(), u32::MAX);
        assert_eq!(field.output_mask(), u32::MAX);

        let mut word = DataWord::default();
        word.set(field, 0xDEAD_BEEF).unwrap();
        assert_eq!(word.get(field), 0xDEAD_BEEF);
    }

    #[test]
    fn test_out_of_range_leaves_word_untouched() {
        let field = Field::new("THRESHOLD", 8, 14);
        let mut word = DataWord::new(0x1234_5678);

        let err = word.set(field, 0x80).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::OutOfRange {
                field: "THRESHOLD",
                value: 0x80,
                width: 7
            }
        );
        assert_eq!(word.raw(), 0x1234_5678);
    }

    #[test]
    fn test_truncating_write() {
        let field = Field::new("CS", 0, 4);
        let mut word = DataWord::new(0xFFFF_FF00);
        word.set_truncated(field, 0xFF);
        assert_eq!(word.raw(), 0xFFFF_FF1F);
    }

    #[test]
    fn test_output_mask_of_accessor_pair() {
        let field = Field::new("SGT", 8, 14);
        let mask = output_mask_of(|w| w.get(field), |w, v| w.set_truncated(field, v));
        assert_eq!(mask, 0x7F00);
    }

    #[test]
    fn test_overlapping_fields() {
        let fields = [
            Field::new("A", 0, 3),
            Field::new("B", 4, 7),
            Field::new("C", 7, 9),
        ];
        assert_eq!(overlapping_fields(&fields), vec![("B", "C")]);
    }

    proptest! {
        /// 往返 + 隔离：写入后读回原值，且字段以外的位不变
        #[test]
        fn set_get_roundtrip_and_isolation(
            (first, last) in range_strategy(),
            initial in any::<u32>(),
            value in any::<u32>(),
        ) {
            let field = Field::new("F", first, last);
            let value = value & field.input_mask();
            let mut word = DataWord::new(initial);

            word.set(field, value).unwrap();

            prop_assert_eq!(word.get(field), value);
            prop_assert_eq!(word.raw() & !field.output_mask(), initial & !field.output_mask());
        }

        /// 超宽值被拒绝，数据字不变
        #[test]
        fn set_rejects_wide_values(
            (first, last) in range_strategy(),
            initial in any::<u32>(),
            value in any::<u32>(),
        ) {
            let field = Field::new("F", first, last);
            prop_assume!(!field.accepts(value));
            let mut word = DataWord::new(initial);

            let is_out_of_range = matches!(word.set(field, value), Err(ProtocolError::OutOfRange { .. }));
            prop_assert!(is_out_of_range);
            prop_assert_eq!(word.raw(), initial);
        }

        /// 截断写入同样不触碰字段以外的位
        #[test]
        fn truncated_write_isolation(
            (first, last) in range_strategy(),
            initial in any::<u32>(),
            value in any::<u32>(),
        ) {
            let field = Field::new("F", first, last);
            let mut word = DataWord::new(initial);
            word.set_truncated(field, value);

            prop_assert_eq!(word.get(field), value & field.input_mask());
            prop_assert_eq!(word.raw() & !field.output_mask(), initial & !field.output_mask());
        }
    }
}
