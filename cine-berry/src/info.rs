//! 运行信息.
//!
//! 记录阈值, 方法, 采样率, 心率, 初始相位, 信号质量等, 以有序的键值对形式保存为 JSON.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一条记录的值.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum InfoValue {
    /// 布尔值.
    Bool(bool),
    /// 整数.
    Int(i64),
    /// 浮点数.
    Float(f64),
    /// 字符串.
    Text(String),
    /// 浮点数组.
    List(Vec<f64>),
}

impl From<bool> for InfoValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<usize> for InfoValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for InfoValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for InfoValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for InfoValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<f64>> for InfoValue {
    fn from(v: Vec<f64>) -> Self {
        Self::List(v)
    }
}

/// 按键排序的运行信息.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RunInfo {
    entries: BTreeMap<String, InfoValue>,
}

impl RunInfo {
    /// 空记录.
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条记录, 覆盖同名旧值.
    pub fn insert<K: Into<String>, V: Into<InfoValue>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    /// 读取.
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries.get(key)
    }

    /// 读取浮点数. 整数也会被转换.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            InfoValue::Float(v) => Some(*v),
            InfoValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// 记录条数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按键的字典序遍历.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 合并 `other`, 同名键以 `other` 为准.
    pub fn extend(&mut self, other: RunInfo) {
        self.entries.extend(other.entries);
    }

    /// 保存为 JSON.
    #[cfg(feature = "serde")]
    pub fn to_json_file<P: AsRef<std::path::Path>>(&self, path: P) -> crate::PipelineResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_order() {
        let mut info = RunInfo::new();
        info.insert("b", 2.5);
        info.insert("a", 3usize);
        info.insert("c", "mad");
        info.insert("a", 4usize);
        assert_eq!(info.len(), 3);
        assert_eq!(info.get_f64("a"), Some(4.0));
        assert_eq!(info.get_f64("c"), None);
        let keys: Vec<&str> = info.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json() {
        let mut info = RunInfo::new();
        info.insert("hr", 72.0);
        info.insert("method", "fracval");
        info.insert("flip", true);
        let text = serde_json::to_string(&info).unwrap();
        assert_eq!(text, r#"{"flip":true,"hr":72.0,"method":"fracval"}"#);
        let back: RunInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(back, info);
    }
}
