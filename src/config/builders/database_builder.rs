//! # 数据库配置构建器模块

use crate::error::OrmResult;
use crate::types::{ConnectionConfig, DatabaseConfig, DatabaseType};
use rat_logger::info;

/// 数据库配置构建器
///
/// 类型、连接与别名都必须显式设置
#[derive(Debug, Default)]
pub struct DatabaseConfigBuilder {
    db_type: Option<DatabaseType>,
    connection: Option<ConnectionConfig>,
    alias: Option<String>,
}

impl DatabaseConfig {
    /// 创建数据库配置构建器
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new()
    }
}

impl DatabaseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn db_type(mut self, db_type: DatabaseType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn alias<S: Into<String>>(mut self, alias: S) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// 构建数据库配置
    ///
    /// # 错误
    ///
    /// 缺少必填项，或类型与连接配置不一致时返回配置错误
    pub fn build(self) -> OrmResult<DatabaseConfig> {
        let db_type = self
            .db_type
            .ok_or_else(|| crate::orm_error!(config, "数据库类型必须设置"))?;

        let connection = self
            .connection
            .ok_or_else(|| crate::orm_error!(config, "连接配置必须设置"))?;

        let alias = self
            .alias
            .ok_or_else(|| crate::orm_error!(config, "数据库别名必须设置"))?;

        let config = DatabaseConfig {
            db_type,
            connection,
            alias,
        };
        config.validate()?;

        info!("创建数据库配置: 别名={}, 类型={:?}", config.alias, config.db_type);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_rejected() {
        let err = DatabaseConfig::builder()
            .db_type(DatabaseType::SQLite)
            .alias("default")
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_mismatched_connection_rejected() {
        let err = DatabaseConfig::builder()
            .db_type(DatabaseType::PostgreSQL)
            .connection(ConnectionConfig::SQLite {
                path: "app.db".to_string(),
                create_if_missing: true,
            })
            .alias("default")
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }
}
