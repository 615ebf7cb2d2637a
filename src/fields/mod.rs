//! 字段定义模块
//!
//! 定义模型字段的类型、约束、默认值以及关系字段描述

pub mod convenience;
pub mod validation;

pub use convenience::*;
pub use validation::{DefaultSchemaValidator, SchemaValidator, ValidationMode};

use crate::error::FieldError;
use crate::model::ModelClass;
use crate::types::DataValue;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// 外键引用动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// 关系字段的目标模型
///
/// 可以直接持有模型类，也可以按名称前向引用（目标模型稍后注册）
#[derive(Clone)]
pub enum ModelRef {
    Name(String),
    Class(Arc<ModelClass>),
}

impl ModelRef {
    /// 目标模型名
    pub fn name(&self) -> &str {
        match self {
            ModelRef::Name(name) => name,
            ModelRef::Class(class) => class.name(),
        }
    }
}

impl std::fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelRef({})", self.name())
    }
}

impl From<&str> for ModelRef {
    fn from(value: &str) -> Self {
        ModelRef::Name(value.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(value: String) -> Self {
        ModelRef::Name(value)
    }
}

impl From<Arc<ModelClass>> for ModelRef {
    fn from(value: Arc<ModelClass>) -> Self {
        ModelRef::Class(value)
    }
}

impl From<&Arc<ModelClass>> for ModelRef {
    fn from(value: &Arc<ModelClass>) -> Self {
        ModelRef::Class(value.clone())
    }
}

/// 外键/一对一字段描述
#[derive(Debug, Clone)]
pub struct ForeignKeyInfo {
    pub target: ModelRef,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub related_name: Option<String>,
    /// 一对一（外键 + 唯一）
    pub one_to_one: bool,
}

/// 多对多字段描述
#[derive(Debug, Clone)]
pub struct ManyToManyInfo {
    pub target: ModelRef,
    /// 显式指定的中间模型，未指定时自动生成
    pub through: Option<ModelRef>,
    pub related_name: Option<String>,
}

/// 字段类型枚举
#[derive(Debug, Clone)]
pub enum FieldType {
    /// 定长上限字符串
    Char {
        max_length: usize,
        min_length: Option<usize>,
        regex: Option<String>,
    },
    /// 文本类型
    Text,
    /// 邮箱（字符串 + 格式校验）
    Email { max_length: usize },
    /// 整数类型
    Integer {
        min_value: Option<i64>,
        max_value: Option<i64>,
    },
    /// 大整数类型
    BigInteger {
        min_value: Option<i64>,
        max_value: Option<i64>,
    },
    /// 浮点数类型
    Float {
        min_value: Option<f64>,
        max_value: Option<f64>,
    },
    /// 十进制类型
    Decimal { max_digits: u8, decimal_places: u8 },
    /// 布尔类型
    Boolean,
    /// 日期类型
    Date { auto_now: bool, auto_now_add: bool },
    /// 日期时间类型
    DateTime { auto_now: bool, auto_now_add: bool },
    /// UUID类型
    Uuid,
    /// JSON类型
    Json,
    /// 二进制类型
    Binary { max_length: Option<usize> },
    /// 外键 / 一对一
    ForeignKey(ForeignKeyInfo),
    /// 多对多（不占用列）
    ManyToMany(ManyToManyInfo),
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Char { .. } => "char",
            FieldType::Text => "text",
            FieldType::Email { .. } => "email",
            FieldType::Integer { .. } => "integer",
            FieldType::BigInteger { .. } => "big_integer",
            FieldType::Float { .. } => "float",
            FieldType::Decimal { .. } => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Date { .. } => "date",
            FieldType::DateTime { .. } => "datetime",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
            FieldType::Binary { .. } => "binary",
            FieldType::ForeignKey(info) if info.one_to_one => "one_to_one",
            FieldType::ForeignKey(_) => "foreign_key",
            FieldType::ManyToMany(_) => "many_to_many",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Integer { .. } | FieldType::BigInteger { .. })
    }
}

/// 默认值：静态值或零参数工厂
#[derive(Clone)]
pub enum FieldDefault {
    Value(DataValue),
    Factory(Arc<dyn Fn() -> DataValue + Send + Sync>),
}

impl FieldDefault {
    pub fn produce(&self) -> DataValue {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Factory(f) => f(),
        }
    }
}

impl std::fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldDefault::Value(v) => write!(f, "Value({:?})", v),
            FieldDefault::Factory(_) => write!(f, "Factory(..)"),
        }
    }
}

/// 字段定义
#[derive(Debug, Clone)]
pub struct Field {
    /// 字段名，由模型构建器赋值
    pub name: String,
    /// 字段类型
    pub field_type: FieldType,
    /// 是否允许为空
    pub null: bool,
    /// 是否唯一
    pub unique: bool,
    /// 是否建立索引
    pub index: bool,
    /// 是否为主键
    pub primary_key: bool,
    /// 是否自增（仅整数主键）
    pub autoincrement: bool,
    /// 只读字段不能通过 update 修改
    pub read_only: bool,
    /// 敏感字段，`exclude_secrets()` 时不加载
    pub secret: bool,
    /// 默认值
    pub default: Option<FieldDefault>,
    /// 数据库端默认值（原样写入 DDL）
    pub server_default: Option<String>,
    /// 列注释
    pub comment: Option<String>,
    /// 所属模型名（元类处理时赋值）
    pub owner: Option<String>,
}

impl Field {
    /// 创建新的字段定义
    pub fn new(field_type: FieldType) -> Self {
        Self {
            name: String::new(),
            field_type,
            null: false,
            unique: false,
            index: false,
            primary_key: false,
            autoincrement: false,
            read_only: false,
            secret: false,
            default: None,
            server_default: None,
            comment: None,
            owner: None,
        }
    }

    /// 自动生成的 `id` 主键
    pub(crate) fn auto_id() -> Self {
        let mut field = Field::new(FieldType::BigInteger {
            min_value: None,
            max_value: None,
        });
        field.name = "id".to_string();
        field.primary_key = true;
        field.autoincrement = true;
        field.read_only = true;
        field
    }

    /// 允许为空
    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    /// 设置为唯一字段
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// 设置为索引字段
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    /// 设置为主键，整数主键默认自增
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        if self.field_type.is_integer() && self.default.is_none() {
            self.autoincrement = true;
        }
        self
    }

    /// 设置为只读
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// 设置为敏感字段
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// 设置默认值
    pub fn default(mut self, value: impl Into<DataValue>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self.autoincrement = false;
        self
    }

    /// 设置默认值工厂
    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> DataValue + Send + Sync + 'static,
    {
        self.default = Some(FieldDefault::Factory(Arc::new(factory)));
        self.autoincrement = false;
        self
    }

    /// 设置数据库端默认值
    pub fn server_default(mut self, expr: &str) -> Self {
        self.server_default = Some(expr.to_string());
        self
    }

    /// 设置列注释
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// 设置最大长度（字符串/二进制）
    pub fn max_length(mut self, length: usize) -> Self {
        match &mut self.field_type {
            FieldType::Char { max_length, .. } | FieldType::Email { max_length } => {
                *max_length = length
            }
            FieldType::Binary { max_length } => *max_length = Some(length),
            _ => {}
        }
        self
    }

    /// 设置最小长度
    pub fn min_length(mut self, length: usize) -> Self {
        if let FieldType::Char { min_length, .. } = &mut self.field_type {
            *min_length = Some(length);
        }
        self
    }

    /// 设置正则校验
    pub fn regex(mut self, pattern: &str) -> Self {
        if let FieldType::Char { regex, .. } = &mut self.field_type {
            *regex = Some(pattern.to_string());
        }
        self
    }

    /// 设置最小值（数值字段）
    pub fn min_value(mut self, value: f64) -> Self {
        match &mut self.field_type {
            FieldType::Integer { min_value, .. } | FieldType::BigInteger { min_value, .. } => {
                *min_value = Some(value as i64)
            }
            FieldType::Float { min_value, .. } => *min_value = Some(value),
            _ => {}
        }
        self
    }

    /// 设置最大值（数值字段）
    pub fn max_value(mut self, value: f64) -> Self {
        match &mut self.field_type {
            FieldType::Integer { max_value, .. } | FieldType::BigInteger { max_value, .. } => {
                *max_value = Some(value as i64)
            }
            FieldType::Float { max_value, .. } => *max_value = Some(value),
            _ => {}
        }
        self
    }

    /// 每次保存时刷新为当前时间
    pub fn auto_now(mut self) -> Self {
        match &mut self.field_type {
            FieldType::Date { auto_now, .. } | FieldType::DateTime { auto_now, .. } => {
                *auto_now = true
            }
            _ => {}
        }
        self
    }

    /// 创建时写入当前时间
    pub fn auto_now_add(mut self) -> Self {
        match &mut self.field_type {
            FieldType::Date { auto_now_add, .. } | FieldType::DateTime { auto_now_add, .. } => {
                *auto_now_add = true
            }
            _ => {}
        }
        self
    }

    /// 设置反向关联名
    pub fn related_name(mut self, name: &str) -> Self {
        match &mut self.field_type {
            FieldType::ForeignKey(info) => info.related_name = Some(name.to_string()),
            FieldType::ManyToMany(info) => info.related_name = Some(name.to_string()),
            _ => {}
        }
        self
    }

    /// 设置删除动作
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let FieldType::ForeignKey(info) = &mut self.field_type {
            info.on_delete = action;
            if action == ReferentialAction::SetNull {
                self.null = true;
            }
        }
        self
    }

    /// 设置更新动作
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        if let FieldType::ForeignKey(info) = &mut self.field_type {
            info.on_update = action;
        }
        self
    }

    /// 为多对多字段指定中间模型
    pub fn through(mut self, model: impl Into<ModelRef>) -> Self {
        if let FieldType::ManyToMany(info) = &mut self.field_type {
            info.through = Some(model.into());
        }
        self
    }

    pub fn foreign_key_info(&self) -> Option<&ForeignKeyInfo> {
        match &self.field_type {
            FieldType::ForeignKey(info) => Some(info),
            _ => None,
        }
    }

    pub fn many_to_many_info(&self) -> Option<&ManyToManyInfo> {
        match &self.field_type {
            FieldType::ManyToMany(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(&self.field_type, FieldType::ForeignKey(info) if !info.one_to_one)
    }

    pub fn is_one_to_one(&self) -> bool {
        matches!(&self.field_type, FieldType::ForeignKey(info) if info.one_to_one)
    }

    pub fn is_many_to_many(&self) -> bool {
        matches!(self.field_type, FieldType::ManyToMany(_))
    }

    /// 是否对应一个实际列（多对多字段不占列）
    pub fn is_column(&self) -> bool {
        !self.is_many_to_many()
    }

    /// 是否在插入时由数据库生成
    pub fn is_generated(&self) -> bool {
        self.autoincrement || (self.server_default.is_some() && self.default.is_none())
    }

    /// 生成默认值（包括 auto_now/auto_now_add 时间戳）
    pub fn default_value(&self) -> Option<DataValue> {
        if let Some(default) = &self.default {
            return Some(default.produce());
        }
        match &self.field_type {
            FieldType::DateTime {
                auto_now,
                auto_now_add,
            } if *auto_now || *auto_now_add => Some(DataValue::DateTime(Utc::now().fixed_offset())),
            FieldType::Date {
                auto_now,
                auto_now_add,
            } if *auto_now || *auto_now_add => Some(DataValue::Date(Utc::now().date_naive())),
            _ => None,
        }
    }

    /// 是否为每次保存都刷新的时间字段
    pub fn is_auto_now(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::DateTime { auto_now: true, .. } | FieldType::Date { auto_now: true, .. }
        )
    }

    /// 将数据库读出的值转换为字段类型对应的值
    ///
    /// SQLite 以整数存布尔、以文本存日期/UUID/JSON，这里统一还原
    pub fn from_db_value(&self, value: DataValue) -> DataValue {
        if value.is_null() {
            return value;
        }
        match (&self.field_type, value) {
            (FieldType::Boolean, DataValue::Int(i)) => DataValue::Bool(i != 0),
            (FieldType::Float { .. } | FieldType::Decimal { .. }, DataValue::Int(i)) => {
                DataValue::Float(i as f64)
            }
            (FieldType::DateTime { .. }, DataValue::String(s)) => parse_datetime(&s)
                .map(DataValue::DateTime)
                .unwrap_or(DataValue::String(s)),
            (FieldType::Date { .. }, DataValue::String(s)) => {
                match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                    Ok(d) => DataValue::Date(d),
                    Err(_) => DataValue::String(s),
                }
            }
            (FieldType::Uuid, DataValue::String(s)) => match uuid::Uuid::parse_str(&s) {
                Ok(u) => DataValue::Uuid(u),
                Err(_) => DataValue::String(s),
            },
            (FieldType::Json, DataValue::String(s)) => match serde_json::from_str(&s) {
                Ok(v) => DataValue::Json(v),
                Err(_) => DataValue::String(s),
            },
            (_, other) => other,
        }
    }

    /// 校验并转换输入值
    ///
    /// 外键字段只做标量检查，目标主键类型由数据库约束保证
    pub fn clean(&self, value: DataValue) -> Result<DataValue, FieldError> {
        let err = |message: String| FieldError::new(self.name.clone(), message);

        if value.is_null() {
            if self.null || (self.primary_key && self.autoincrement) {
                return Ok(DataValue::Null);
            }
            return Err(err("字段不能为空".to_string()));
        }

        match &self.field_type {
            FieldType::Char {
                max_length,
                min_length,
                regex,
            } => {
                let s = expect_string(value).map_err(|_| err("期望字符串类型".to_string()))?;
                let length = s.chars().count();
                if length > *max_length {
                    return Err(err(format!("字符串长度不能超过{}", max_length)));
                }
                if let Some(min_len) = min_length {
                    if length < *min_len {
                        return Err(err(format!("字符串长度不能少于{}", min_len)));
                    }
                }
                if let Some(pattern) = regex {
                    let regex = regex::Regex::new(pattern)
                        .map_err(|e| err(format!("正则表达式无效: {}", e)))?;
                    if !regex.is_match(&s) {
                        return Err(err("字符串不匹配正则表达式".to_string()));
                    }
                }
                Ok(DataValue::String(s))
            }
            FieldType::Text => expect_string(value)
                .map(DataValue::String)
                .map_err(|_| err("期望字符串类型".to_string())),
            FieldType::Email { max_length } => {
                let s = expect_string(value).map_err(|_| err("期望字符串类型".to_string()))?;
                if s.chars().count() > *max_length {
                    return Err(err(format!("字符串长度不能超过{}", max_length)));
                }
                if !validation::EMAIL_RE.is_match(&s) {
                    return Err(err(format!("无效的邮箱地址: '{}'", s)));
                }
                Ok(DataValue::String(s))
            }
            FieldType::Integer {
                min_value,
                max_value,
            }
            | FieldType::BigInteger {
                min_value,
                max_value,
            } => {
                let i = match &value {
                    DataValue::Int(i) => *i,
                    DataValue::Bool(_) => return Err(err("期望整数类型".to_string())),
                    other => other
                        .as_i64()
                        .ok_or_else(|| err("期望整数类型".to_string()))?,
                };
                if let Some(min_val) = min_value {
                    if i < *min_val {
                        return Err(err(format!("整数值不能小于{}", min_val)));
                    }
                }
                if let Some(max_val) = max_value {
                    if i > *max_val {
                        return Err(err(format!("整数值不能大于{}", max_val)));
                    }
                }
                Ok(DataValue::Int(i))
            }
            FieldType::Float {
                min_value,
                max_value,
            } => {
                let f = value
                    .as_f64()
                    .ok_or_else(|| err("期望浮点数类型".to_string()))?;
                if let Some(min_val) = min_value {
                    if f < *min_val {
                        return Err(err(format!("浮点数值不能小于{}", min_val)));
                    }
                }
                if let Some(max_val) = max_value {
                    if f > *max_val {
                        return Err(err(format!("浮点数值不能大于{}", max_val)));
                    }
                }
                Ok(DataValue::Float(f))
            }
            FieldType::Decimal {
                max_digits,
                decimal_places,
            } => {
                let f = value
                    .as_f64()
                    .ok_or_else(|| err("期望数值类型".to_string()))?;
                let integer_digits = (f.abs().trunc() as u64).to_string().len();
                let allowed = max_digits.saturating_sub(*decimal_places) as usize;
                if integer_digits > allowed {
                    return Err(err(format!("数值整数部分不能超过{}位", allowed)));
                }
                let factor = 10f64.powi(*decimal_places as i32);
                Ok(DataValue::Float((f * factor).round() / factor))
            }
            FieldType::Boolean => value
                .as_bool()
                .map(DataValue::Bool)
                .ok_or_else(|| err("期望布尔类型".to_string())),
            FieldType::Date { .. } => match value {
                DataValue::Date(d) => Ok(DataValue::Date(d)),
                DataValue::DateTime(dt) => Ok(DataValue::Date(dt.date_naive())),
                DataValue::String(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map(DataValue::Date)
                    .map_err(|_| err(format!("无效的日期格式: '{}'", s))),
                _ => Err(err("期望日期类型".to_string())),
            },
            FieldType::DateTime { .. } => match value {
                DataValue::DateTime(dt) => Ok(DataValue::DateTime(dt)),
                DataValue::String(s) => parse_datetime(&s)
                    .map(DataValue::DateTime)
                    .ok_or_else(|| err(format!("无效的日期时间格式: '{}'", s))),
                _ => Err(err("期望日期时间类型".to_string())),
            },
            FieldType::Uuid => match value {
                DataValue::Uuid(u) => Ok(DataValue::Uuid(u)),
                DataValue::String(s) => uuid::Uuid::parse_str(&s)
                    .map(DataValue::Uuid)
                    .map_err(|_| err(format!("无效的UUID格式: '{}'", s))),
                _ => Err(err("期望UUID类型".to_string())),
            },
            FieldType::Json => match value {
                DataValue::Json(v) => Ok(DataValue::Json(v)),
                other => Ok(DataValue::Json(other.to_json_value())),
            },
            FieldType::Binary { max_length } => match value {
                DataValue::Bytes(b) => {
                    if let Some(max_len) = max_length {
                        if b.len() > *max_len {
                            return Err(err(format!("二进制长度不能超过{}", max_len)));
                        }
                    }
                    Ok(DataValue::Bytes(b))
                }
                _ => Err(err("期望二进制类型".to_string())),
            },
            FieldType::ForeignKey(_) => match value {
                v @ (DataValue::Int(_) | DataValue::String(_) | DataValue::Uuid(_)) => Ok(v),
                _ => Err(err("外键值必须是目标模型的主键".to_string())),
            },
            FieldType::ManyToMany(_) => Err(err("多对多字段不能直接赋值".to_string())),
        }
    }
}

fn expect_string(value: DataValue) -> Result<String, DataValue> {
    match value {
        DataValue::String(s) => Ok(s),
        other => Err(other),
    }
}

/// 解析 RFC3339 或 `YYYY-MM-DD HH:MM:SS` 形式的时间（后者按 UTC 处理）
pub(crate) fn parse_datetime(s: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(field: Field, name: &str) -> Field {
        let mut field = field;
        field.name = name.to_string();
        field
    }

    #[test]
    fn test_char_validation() {
        let field = named(char_field(5).min_length(2), "code");
        assert!(field.clean(DataValue::from("abc")).is_ok());
        assert!(field.clean(DataValue::from("abcdef")).is_err());
        assert!(field.clean(DataValue::from("a")).is_err());
        assert!(field.clean(DataValue::Int(1)).is_err());
        assert!(field.clean(DataValue::Null).is_err());
    }

    #[test]
    fn test_integer_range_and_coercion() {
        let field = named(integer_field().min_value(0.0).max_value(10.0), "n");
        assert_eq!(field.clean(DataValue::from("7")).unwrap(), DataValue::Int(7));
        assert!(field.clean(DataValue::Int(11)).is_err());
        assert!(field.clean(DataValue::Bool(true)).is_err());
    }

    #[test]
    fn test_email_validation() {
        let field = named(email_field(), "email");
        assert!(field.clean(DataValue::from("adam@x.io")).is_ok());
        assert!(field.clean(DataValue::from("not-an-email")).is_err());
    }

    #[test]
    fn test_from_db_value_restores_types() {
        let field = named(boolean_field(), "flag");
        assert_eq!(field.from_db_value(DataValue::Int(1)), DataValue::Bool(true));

        let field = named(uuid_field(), "token");
        let u = uuid::Uuid::new_v4();
        assert_eq!(field.from_db_value(DataValue::String(u.to_string())), DataValue::Uuid(u));

        let field = named(date_field(), "day");
        assert_eq!(
            field.from_db_value(DataValue::from("2024-02-03")),
            DataValue::Date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap())
        );
    }

    #[test]
    fn test_integer_primary_key_is_autoincrement() {
        let field = integer_field().primary_key();
        assert!(field.autoincrement);
        let field = uuid_field().default_factory(|| DataValue::Uuid(uuid::Uuid::new_v4())).primary_key();
        assert!(!field.autoincrement);
    }

    #[test]
    fn test_decimal_rounding() {
        let field = named(decimal_field(6, 2), "price");
        assert_eq!(field.clean(DataValue::Float(12.345)).unwrap(), DataValue::Float(12.35));
        assert!(field.clean(DataValue::Float(123456.0)).is_err());
    }
}
