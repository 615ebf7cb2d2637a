//! # 便利配置函数模块
//!
//! 常用数据库配置的简写，内部仍走 `DatabaseConfig::builder()` 校验

use crate::error::OrmResult;
use crate::types::{ConnectionConfig, DatabaseConfig, DatabaseType};

/// SQLite 文件数据库配置
pub fn sqlite_config<S: Into<String>, P: Into<String>>(alias: S, path: P) -> OrmResult<DatabaseConfig> {
    DatabaseConfig::builder()
        .db_type(DatabaseType::SQLite)
        .connection(ConnectionConfig::SQLite {
            path: path.into(),
            create_if_missing: true,
        })
        .alias(alias)
        .build()
}

/// SQLite 内存数据库配置
pub fn sqlite_memory_config<S: Into<String>>(alias: S) -> OrmResult<DatabaseConfig> {
    sqlite_config(alias, ":memory:")
}

/// PostgreSQL 数据库配置
pub fn postgres_config<S: Into<String>>(
    alias: S,
    host: S,
    port: u16,
    database: S,
    username: S,
    password: S,
) -> OrmResult<DatabaseConfig> {
    DatabaseConfig::builder()
        .db_type(DatabaseType::PostgreSQL)
        .connection(ConnectionConfig::PostgreSQL {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            ssl_mode: Some("prefer".to_string()),
        })
        .alias(alias)
        .build()
}
