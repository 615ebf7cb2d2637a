//! # 配置管理模块 - 核心配置类型
//!
//! 全局配置包含所有数据库连接、默认别名、日志与语言设置，可从 TOML/JSON 文件加载

use crate::error::{OrmError, OrmResult};
use crate::types::DatabaseConfig;
use rat_logger::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 全局配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// 数据库配置映射 (别名 -> 配置)
    pub databases: HashMap<String, DatabaseConfig>,
    /// 默认数据库别名
    #[serde(default)]
    pub default_database: Option<String>,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 错误消息语言，例如 "zh-CN"
    #[serde(default)]
    pub language: Option<String>,
}

/// 日志配置
///
/// 库本身不安装日志器，调用方按此配置自行初始化 rat_logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否输出到控制台
    pub console: bool,
    /// 日志文件路径
    pub file_path: Option<PathBuf>,
    /// 是否输出编译后的 SQL
    pub log_sql: bool,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// 对应的 rat_logger 过滤级别
    pub fn level_filter(&self) -> rat_logger::LevelFilter {
        match self {
            LogLevel::Error => rat_logger::LevelFilter::Error,
            LogLevel::Warn => rat_logger::LevelFilter::Warn,
            LogLevel::Info => rat_logger::LevelFilter::Info,
            LogLevel::Debug => rat_logger::LevelFilter::Debug,
            LogLevel::Trace => rat_logger::LevelFilter::Trace,
        }
    }
}

impl LoggingConfig {
    pub fn builder() -> super::builders::LoggingConfigBuilder {
        super::builders::LoggingConfigBuilder::new()
    }

    pub fn level_filter(&self) -> rat_logger::LevelFilter {
        self.level.level_filter()
    }
}

enum FileFormat {
    Toml,
    Json,
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    }
}

impl GlobalConfig {
    /// 创建全局配置构建器
    pub fn builder() -> super::builders::GlobalConfigBuilder {
        super::builders::GlobalConfigBuilder::new()
    }

    /// 从配置文件加载，`.toml` 之外的扩展名按 JSON 解析
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> OrmResult<Self> {
        let path = config_path.as_ref();
        let content = std::fs::read_to_string(path).map_err(OrmError::IoError)?;

        let config: GlobalConfig = match file_format(path) {
            FileFormat::Toml => toml::from_str(&content)
                .map_err(|e| crate::orm_error!(config, format!("解析TOML配置文件失败: {}", e)))?,
            FileFormat::Json => serde_json::from_str(&content)
                .map_err(|e| crate::orm_error!(config, format!("解析JSON配置文件失败: {}", e)))?,
        };
        config.validate()?;

        info!("从文件加载配置: {:?}", path);
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, config_path: P) -> OrmResult<()> {
        let path = config_path.as_ref();
        let content = match file_format(path) {
            FileFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| crate::orm_error!(config, format!("序列化TOML配置失败: {}", e)))?,
            FileFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| crate::orm_error!(config, format!("序列化JSON配置失败: {}", e)))?,
        };

        std::fs::write(path, content).map_err(OrmError::IoError)?;

        info!("保存配置到文件: {:?}", path);
        Ok(())
    }

    /// 检查数据库配置与默认别名
    pub fn validate(&self) -> OrmResult<()> {
        if self.databases.is_empty() {
            return Err(crate::orm_error!(config, "至少需要配置一个数据库"));
        }
        for (alias, db) in &self.databases {
            if alias != &db.alias {
                return Err(crate::orm_error!(
                    config,
                    format!("数据库配置键 '{}' 与别名 '{}' 不一致", alias, db.alias)
                ));
            }
            db.validate()?;
        }
        self.default_alias().map(|_| ())
    }

    /// 默认数据库别名
    ///
    /// 未显式设置时只有一个数据库则取该数据库，否则取 "default"
    pub fn default_alias(&self) -> OrmResult<&str> {
        let alias = match &self.default_database {
            Some(alias) => alias.as_str(),
            None if self.databases.len() == 1 => self
                .databases
                .keys()
                .next()
                .map(String::as_str)
                .unwrap_or("default"),
            None => "default",
        };
        if self.databases.contains_key(alias) {
            Ok(alias)
        } else {
            Err(crate::orm_error!(
                config,
                format!("找不到默认数据库配置: {}", alias)
            ))
        }
    }

    /// 获取指定别名的数据库配置
    pub fn get_database(&self, alias: &str) -> OrmResult<&DatabaseConfig> {
        self.databases
            .get(alias)
            .ok_or_else(|| crate::orm_error!(alias_not_found, alias))
    }

    /// 按配置切换错误消息语言
    pub fn apply_language(&self) {
        if let Some(lang) = &self.language {
            crate::i18n::set_language(&rat_embed_lang::normalize_language_code(lang));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sqlite_memory_config;

    fn logging() -> LoggingConfig {
        LoggingConfig {
            level: LogLevel::Info,
            console: true,
            file_path: None,
            log_sql: false,
        }
    }

    #[test]
    fn test_single_database_is_default() {
        let mut databases = HashMap::new();
        databases.insert("main_db".to_string(), sqlite_memory_config("main_db").unwrap());
        let config = GlobalConfig {
            databases,
            default_database: None,
            logging: logging(),
            language: None,
        };
        assert_eq!(config.default_alias().unwrap(), "main_db");
    }

    #[test]
    fn test_missing_default_alias() {
        let mut databases = HashMap::new();
        databases.insert("a".to_string(), sqlite_memory_config("a").unwrap());
        databases.insert("b".to_string(), sqlite_memory_config("b").unwrap());
        let config = GlobalConfig {
            databases,
            default_database: None,
            logging: logging(),
            language: None,
        };
        assert!(config.default_alias().unwrap_err().is_config());
        assert!(config.get_database("c").is_err());
    }
}
