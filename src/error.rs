//! 错误类型定义
//!
//! ORM 的统一错误类型。配置错误在模型构建期同步抛出，
//! 查找/验证/关系错误在查询执行期抛出，两者类型可区分。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单个字段的验证失败信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// 字段名
    pub field: String,
    /// 失败原因
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// ORM错误类型
#[derive(Debug, Error)]
pub enum OrmError {
    /// 模型配置错误（多个主键、缺少注册表、关联名冲突等）
    #[error("配置错误: {message}")]
    ConfigError { message: String },

    /// 期望恰好一行但没有匹配
    #[error("未找到对象: {model} - {message}")]
    ObjectNotFound { model: String, message: String },

    /// 期望恰好一行但匹配到多行
    #[error("返回了多个对象: {model} - {message}")]
    MultipleObjectsReturned { model: String, message: String },

    /// 单个字段验证失败
    #[error("模型验证失败: {field} - {message}")]
    ValidationError { field: String, message: String },

    /// 数据载荷验证失败，列出所有出错字段
    #[error("数据验证失败: {}", format_field_errors(.errors))]
    ValidationErrors { errors: Vec<FieldError> },

    /// 关系/预取错误
    #[error("关系错误: {message}")]
    RelationshipError { message: String },

    /// 多租户错误
    #[error("租户错误: {message}")]
    TenantError { message: String },

    /// 查询构建或执行错误
    #[error("查询执行失败: {message}")]
    QueryError { message: String },

    /// 数据库连接错误
    #[error("数据库连接失败: {message}")]
    ConnectionError { message: String },

    /// 数据库别名不存在
    #[error("数据库别名 '{alias}' 未找到")]
    AliasNotFound { alias: String },

    /// 模型未注册
    #[error("模型 '{name}' 未在注册表中注册")]
    ModelNotRegistered { name: String },

    /// 序列化错误
    #[error("数据序列化失败: {message}")]
    SerializationError { message: String },

    /// 不支持的数据库类型
    #[error("不支持的数据库类型: {db_type}")]
    UnsupportedDatabase { db_type: String },

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 其他错误（信号处理器等用户代码返回的错误）
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// ORM结果类型
pub type OrmResult<T> = Result<T, OrmError>;

impl OrmError {
    /// 是否为配置错误
    pub fn is_config(&self) -> bool {
        matches!(self, OrmError::ConfigError { .. })
    }

    /// 是否为"未找到"错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrmError::ObjectNotFound { .. })
    }

    /// 是否为"多行"错误
    pub fn is_multiple(&self) -> bool {
        matches!(self, OrmError::MultipleObjectsReturned { .. })
    }

    /// 使用当前语言渲染错误消息
    pub fn localized(&self) -> String {
        use crate::i18n::tf;
        match self {
            OrmError::ConfigError { message } => tf("error.config", &[("message", message)]),
            OrmError::ObjectNotFound { model, message } => {
                tf("error.not_found", &[("model", model), ("message", message)])
            }
            OrmError::MultipleObjectsReturned { model, message } => {
                tf("error.multiple_objects", &[("model", model), ("message", message)])
            }
            OrmError::ValidationError { field, message } => {
                tf("error.validation", &[("field", field), ("message", message)])
            }
            OrmError::ValidationErrors { errors } => {
                let joined = format_field_errors(errors);
                tf("error.validation_errors", &[("message", &joined)])
            }
            OrmError::RelationshipError { message } => {
                tf("error.relationship", &[("message", message)])
            }
            OrmError::TenantError { message } => tf("error.tenant", &[("message", message)]),
            OrmError::QueryError { message } => tf("error.query", &[("message", message)]),
            OrmError::ConnectionError { message } => {
                tf("error.connection", &[("message", message)])
            }
            OrmError::AliasNotFound { alias } => tf("error.alias_not_found", &[("alias", alias)]),
            OrmError::ModelNotRegistered { name } => {
                tf("error.model_not_registered", &[("name", name)])
            }
            OrmError::SerializationError { message } => {
                tf("error.serialization", &[("message", message)])
            }
            OrmError::UnsupportedDatabase { db_type } => {
                tf("error.unsupported_database", &[("db_type", db_type)])
            }
            OrmError::IoError(e) => e.to_string(),
            OrmError::Other(e) => e.to_string(),
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(e: serde_json::Error) -> Self {
        OrmError::SerializationError {
            message: e.to_string(),
        }
    }
}

#[cfg(any(feature = "sqlite-support", feature = "postgres-support"))]
impl From<sqlx::Error> for OrmError {
    fn from(e: sqlx::Error) -> Self {
        OrmError::QueryError {
            message: e.to_string(),
        }
    }
}

/// 便捷错误构造宏
#[macro_export]
macro_rules! orm_error {
    (config, $msg:expr) => {
        $crate::error::OrmError::ConfigError {
            message: $msg.to_string(),
        }
    };
    (query, $msg:expr) => {
        $crate::error::OrmError::QueryError {
            message: $msg.to_string(),
        }
    };
    (connection, $msg:expr) => {
        $crate::error::OrmError::ConnectionError {
            message: $msg.to_string(),
        }
    };
    (validation, $field:expr, $msg:expr) => {
        $crate::error::OrmError::ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
        }
    };
    (relationship, $msg:expr) => {
        $crate::error::OrmError::RelationshipError {
            message: $msg.to_string(),
        }
    };
    (tenant, $msg:expr) => {
        $crate::error::OrmError::TenantError {
            message: $msg.to_string(),
        }
    };
    (serialization, $msg:expr) => {
        $crate::error::OrmError::SerializationError {
            message: $msg.to_string(),
        }
    };
    (not_found, $model:expr, $msg:expr) => {
        $crate::error::OrmError::ObjectNotFound {
            model: $model.to_string(),
            message: $msg.to_string(),
        }
    };
    (multiple, $model:expr, $msg:expr) => {
        $crate::error::OrmError::MultipleObjectsReturned {
            model: $model.to_string(),
            message: $msg.to_string(),
        }
    };
    (alias_not_found, $alias:expr) => {
        $crate::error::OrmError::AliasNotFound {
            alias: $alias.to_string(),
        }
    };
    (unsupported_db, $db_type:expr) => {
        $crate::error::OrmError::UnsupportedDatabase {
            db_type: $db_type.to_string(),
        }
    };
}
