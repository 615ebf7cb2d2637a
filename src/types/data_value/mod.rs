use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 数据库返回的一行数据，键为列名（连接查询时为 `路径__列名`）
pub type Row = HashMap<String, DataValue>;

/// 通用数据值类型 - 支持跨数据库的数据表示
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    /// 空值
    Null,
    /// 布尔值
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮点数
    Float(f64),
    /// 字符串
    String(String),
    /// 字节数组
    Bytes(Vec<u8>),
    /// 日期时间
    DateTime(DateTime<FixedOffset>),
    /// 日期
    Date(NaiveDate),
    /// UUID
    Uuid(Uuid),
    /// JSON 值
    Json(serde_json::Value),
    /// 数组（用于 `__in` 查找）
    Array(Vec<DataValue>),
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::Null => write!(f, "null"),
            DataValue::Bool(b) => write!(f, "{}", b),
            DataValue::Int(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::String(s) => write!(f, "{}", s),
            DataValue::Bytes(bytes) => write!(f, "[{} bytes]", bytes.len()),
            DataValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            DataValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            DataValue::Uuid(uuid) => write!(f, "{}", uuid),
            DataValue::Json(json) => write!(f, "{}", json),
            DataValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

impl std::fmt::Debug for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Debug 和 Display 保持一致，字符串额外加引号
        match self {
            DataValue::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl DataValue {
    /// 获取数据类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::Null => "null",
            DataValue::Bool(_) => "boolean",
            DataValue::Int(_) => "integer",
            DataValue::Float(_) => "float",
            DataValue::String(_) => "string",
            DataValue::Bytes(_) => "bytes",
            DataValue::DateTime(_) => "datetime",
            DataValue::Date(_) => "date",
            DataValue::Uuid(_) => "uuid",
            DataValue::Json(_) => "json",
            DataValue::Array(_) => "array",
        }
    }

    /// 判断是否为空值
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Int(i) => Some(*i),
            DataValue::Bool(b) => Some(*b as i64),
            DataValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            DataValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Float(f) => Some(*f),
            DataValue::Int(i) => Some(*i as f64),
            DataValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            DataValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// 分组键，用于预取结果按外键归并
    ///
    /// 整数与整数形式的字符串视为同一个键。
    pub fn group_key(&self) -> String {
        match self {
            DataValue::Int(i) => i.to_string(),
            DataValue::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
            DataValue::Uuid(u) => u.to_string(),
            DataValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// 转换为 JSON 值
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            DataValue::Null => serde_json::Value::Null,
            DataValue::Bool(b) => serde_json::Value::Bool(*b),
            DataValue::Int(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            DataValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            DataValue::String(s) => serde_json::Value::String(s.clone()),
            DataValue::Bytes(b) => {
                // 将字节数组转换为 base64 字符串
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            DataValue::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            DataValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            DataValue::Uuid(u) => serde_json::Value::String(u.to_string()),
            DataValue::Json(j) => j.clone(),
            DataValue::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(|v| v.to_json_value()).collect())
            }
        }
    }

    /// 从无类型标签的 JSON 值解析
    pub fn from_json_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DataValue::Null,
            serde_json::Value::Bool(b) => DataValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => DataValue::Int(i),
                None => DataValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => DataValue::String(s),
            serde_json::Value::Array(arr) => {
                DataValue::Array(arr.into_iter().map(DataValue::from_json_value).collect())
            }
            obj @ serde_json::Value::Object(_) => DataValue::Json(obj),
        }
    }

    /// 转换为 SQL 绑定时使用的文本形式（SQLite 以文本存储日期与 JSON）
    pub fn to_storage_string(&self) -> Option<String> {
        match self {
            DataValue::DateTime(dt) => Some(dt.to_rfc3339()),
            DataValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            DataValue::Uuid(u) => Some(u.to_string()),
            DataValue::Json(j) => Some(j.to_string()),
            DataValue::Array(_) => Some(self.to_json_value().to_string()),
            _ => None,
        }
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Int(value as i64)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Int(value)
    }
}

impl From<u32> for DataValue {
    fn from(value: u32) -> Self {
        DataValue::Int(value as i64)
    }
}

impl From<usize> for DataValue {
    fn from(value: usize) -> Self {
        DataValue::Int(value as i64)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::String(value)
    }
}

impl From<&String> for DataValue {
    fn from(value: &String) -> Self {
        DataValue::String(value.clone())
    }
}

impl From<Uuid> for DataValue {
    fn from(value: Uuid) -> Self {
        DataValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for DataValue {
    fn from(value: DateTime<Utc>) -> Self {
        DataValue::DateTime(value.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for DataValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        DataValue::DateTime(value)
    }
}

impl From<NaiveDate> for DataValue {
    fn from(value: NaiveDate) -> Self {
        DataValue::Date(value)
    }
}

impl From<serde_json::Value> for DataValue {
    fn from(value: serde_json::Value) -> Self {
        DataValue::Json(value)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DataValue::Null,
        }
    }
}

impl<T: Into<DataValue>> From<Vec<T>> for DataValue {
    fn from(value: Vec<T>) -> Self {
        DataValue::Array(value.into_iter().map(Into::into).collect())
    }
}
