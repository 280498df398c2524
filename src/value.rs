//! 替换值模型
//!
//! 调用方传入的数据统一表示为 `Value`,支持点号路径查找和
//! 写入单元格前的文本化(日期转 Excel 序列号等)。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// 一个替换值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    DateTime(DateTime<Utc>),
    /// 图片等二进制负载
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// 1899-12-30 到 1970-01-01 的天数
const EXCEL_EPOCH_OFFSET_DAYS: f64 = 25569.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

impl Value {
    /// 按 `a.b[0].c` 形式的路径查找。路径不存在返回 None
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for seg in path.split('.') {
            if let Some(bracket) = seg.find('[') {
                let prop = &seg[..bracket];
                let idx: usize = seg[bracket + 1..].trim_end_matches(']').parse().ok()?;
                if !prop.is_empty() {
                    cur = cur.get_key(prop)?;
                }
                cur = cur.get_index(idx)?;
            } else {
                cur = cur.get_key(seg)?;
            }
        }
        Some(cur)
    }

    pub fn get_key(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(items) => items.get(index),
            _ => None,
        }
    }

    pub fn is_null_or_empty(&self) -> bool {
        matches!(self, Value::Null) || matches!(self, Value::String(s) if s.is_empty())
    }

    /// 写入单元格前的文本化:
    /// 日期 → Excel 序列号,布尔 → "1"/"0",数字 → 十进制,其余类型 → 空串
    pub fn stringify(&self) -> String {
        match self {
            Value::DateTime(dt) => {
                let serial = dt.timestamp_millis() as f64 / MILLIS_PER_DAY + EXCEL_EPOCH_OFFSET_DAYS;
                format_number(serial)
            }
            Value::Bool(b) => {
                if *b {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            _ => String::new(),
        }
    }
}

/// 整数值不带小数点输出,其余走最短往返表示
fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, val)| (k, Value::from(val)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_get_path() {
        let v: Value = serde_json::json!({
            "a": { "b": [ { "c": 42 }, { "c": 43 } ] },
            "name": ["first", "second"],
        })
        .into();
        assert_eq!(v.get_path("a.b[0].c"), Some(&Value::Number(42.0)));
        assert_eq!(v.get_path("a.b[1].c"), Some(&Value::Number(43.0)));
        assert_eq!(
            v.get_path("name[1]"),
            Some(&Value::String("second".to_string()))
        );
        assert_eq!(v.get_path("a.missing"), None);
        assert_eq!(v.get_path("a.b[9].c"), None);
        assert_eq!(v.get_path("name.b"), None);
    }

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(Value::from("foo").stringify(), "foo");
        assert_eq!(Value::Number(10.0).stringify(), "10");
        assert_eq!(Value::Number(3.5).stringify(), "3.5");
        assert_eq!(Value::Bool(true).stringify(), "1");
        assert_eq!(Value::Bool(false).stringify(), "0");
        assert_eq!(Value::Null.stringify(), "");
        assert_eq!(Value::Array(vec![]).stringify(), "");
    }

    #[test]
    fn test_stringify_date() {
        // 2013-01-01 是 Excel 序列号 41275
        let dt = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Value::DateTime(dt).stringify(), "41275");
        // 带时间的日期得到小数部分
        let dt = Utc.with_ymd_and_hms(2013, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(Value::DateTime(dt).stringify(), "41275.5");
    }

    #[test]
    fn test_json_conversion() {
        let v: Value = serde_json::json!({"n": 1.5, "b": false, "s": "x", "z": null}).into();
        assert_eq!(v.get_path("n"), Some(&Value::Number(1.5)));
        assert_eq!(v.get_path("b"), Some(&Value::Bool(false)));
        assert_eq!(v.get_path("z"), Some(&Value::Null));
    }
}
