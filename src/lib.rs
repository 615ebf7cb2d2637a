//! rat_quickorm - 异步ORM库
//!
//! 声明式模型定义、按 schema 惰性构建的表结构、链式 QuerySet 查询、
//! 关系预取以及基于 schema 的多租户。数据库访问基于 sqlx，
//! 默认启用 SQLite，PostgreSQL 通过 `postgres-support` 特性启用

pub mod config;
pub mod database;
pub mod error;
pub mod fields;
pub mod i18n;
pub mod model;
pub mod query;
pub mod registry;
pub mod security;
pub mod table;
pub mod tenancy;
pub mod types;

pub use config::{
    postgres_config, sqlite_config, sqlite_memory_config, DatabaseConfigBuilder, GlobalConfig,
    GlobalConfigBuilder, LogLevel, LoggingConfig, LoggingConfigBuilder,
};
pub use database::{force_rollback, transaction, Database, ExecuteResult, Statement};
#[cfg(feature = "postgres-support")]
pub use database::PostgresDatabase;
#[cfg(feature = "sqlite-support")]
pub use database::SqliteDatabase;
pub use error::{FieldError, OrmError, OrmResult};
pub use fields::{
    DefaultSchemaValidator, Field, FieldType, ModelRef, ReferentialAction, SchemaValidator,
    ValidationMode,
};
pub use model::{
    Index, ManyToManyManager, MetaInfo, ModelBuilder, ModelClass, ModelInstance, RelationCell,
    UniqueTogether,
};
pub use query::{Manager, Prefetch, QuerySet, Q};
pub use registry::Registry;
pub use tenancy::{TenantContext, TenantRegistry};
pub use types::{ConnectionConfig, DataValue, DatabaseConfig, DatabaseType, Row};

// 条件编译调试宏 - 只有在 debug 模式下才输出调试信息
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        rat_logger::debug!($($arg)*);
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// 初始化多语言错误消息
///
/// 日志系统由调用者自行初始化，本库不安装日志器
pub fn init() {
    i18n::ErrorMessageI18n::init();
}

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}
