//! # 全局配置构建器模块

use crate::config::core::{GlobalConfig, LoggingConfig};
use crate::error::OrmResult;
use crate::types::DatabaseConfig;
use rat_logger::info;
use std::collections::HashMap;

/// 全局配置构建器
#[derive(Debug, Default)]
pub struct GlobalConfigBuilder {
    databases: HashMap<String, DatabaseConfig>,
    default_database: Option<String>,
    logging: Option<LoggingConfig>,
    language: Option<String>,
}

impl GlobalConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加数据库配置，同一别名后者覆盖前者
    pub fn add_database(mut self, config: DatabaseConfig) -> Self {
        self.databases.insert(config.alias.clone(), config);
        self
    }

    pub fn default_database<S: Into<String>>(mut self, alias: S) -> Self {
        self.default_database = Some(alias.into());
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    /// 构建全局配置
    ///
    /// # 错误
    ///
    /// 没有数据库、缺少日志配置或默认别名不存在时返回配置错误
    pub fn build(self) -> OrmResult<GlobalConfig> {
        let logging = self
            .logging
            .ok_or_else(|| crate::orm_error!(config, "日志配置必须设置"))?;

        let config = GlobalConfig {
            databases: self.databases,
            default_database: self.default_database,
            logging,
            language: self.language,
        };
        config.validate()?;

        info!(
            "创建全局配置: 数据库数量={}, 默认数据库={:?}",
            config.databases.len(),
            config.default_database
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{sqlite_memory_config, LogLevel};

    fn logging() -> LoggingConfig {
        LoggingConfig::builder()
            .level(LogLevel::Info)
            .console(true)
            .log_sql(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_requires_database() {
        let err = GlobalConfigBuilder::new().logging(logging()).build().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unknown_default_rejected() {
        let err = GlobalConfigBuilder::new()
            .add_database(sqlite_memory_config("default").unwrap())
            .default_database("other")
            .logging(logging())
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_build() {
        let config = GlobalConfigBuilder::new()
            .add_database(sqlite_memory_config("default").unwrap())
            .add_database(sqlite_memory_config("reports").unwrap())
            .default_database("default")
            .logging(logging())
            .language("en-US")
            .build()
            .unwrap();
        assert_eq!(config.default_alias().unwrap(), "default");
        assert_eq!(config.databases.len(), 2);
    }
}
