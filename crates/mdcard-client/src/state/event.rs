//! 状态机事件

use std::borrow::Cow;
use std::fmt;

/// 具名事件
///
/// 以名称比较，全序，可以作为转换表的键。预定义事件是 `const`，
/// 运行时拼出的事件用 [`Event::from_string`]。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event(Cow<'static, str>);

impl Event {
    /// 内部事件（由内部回调产生）
    pub const INTERNAL: Event = Event::new("internal");

    /// 未定义事件
    pub const UNDEFINED: Event = Event::new("undefined");

    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn from_string(name: String) -> Self {
        Self(Cow::Owned(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Event {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_event_identity_is_the_name() {
        assert_eq!(Event::new("stop"), Event::from_string("stop".to_string()));
        assert_ne!(Event::new("stop"), Event::new("move"));
        assert_eq!(Event::default(), Event::UNDEFINED);
        assert_eq!(Event::INTERNAL.to_string(), "internal");
    }

    #[test]
    fn test_event_as_map_key() {
        let mut table = BTreeMap::new();
        table.insert(Event::new("stop"), 1);
        table.insert(Event::new("move"), 2);
        assert_eq!(table.get(&Event::from_string("stop".to_string())), Some(&1));
        assert_eq!(table.keys().next().map(Event::name), Some("move"));
    }
}
