//! # 日志配置构建器模块

use crate::config::core::{LogLevel, LoggingConfig};
use crate::error::OrmResult;
use std::path::PathBuf;

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggingConfigBuilder {
    level: Option<LogLevel>,
    console: Option<bool>,
    file_path: Option<PathBuf>,
    log_sql: Option<bool>,
}

impl LoggingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn console(mut self, console: bool) -> Self {
        self.console = Some(console);
        self
    }

    /// 日志文件路径，None 表示不写文件
    pub fn file_path<P: Into<PathBuf>>(mut self, file_path: Option<P>) -> Self {
        self.file_path = file_path.map(|p| p.into());
        self
    }

    pub fn log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = Some(log_sql);
        self
    }

    /// 构建日志配置
    ///
    /// # 错误
    ///
    /// 级别、控制台选项与 SQL 日志选项必须设置
    pub fn build(self) -> OrmResult<LoggingConfig> {
        let level = self
            .level
            .ok_or_else(|| crate::orm_error!(config, "日志级别必须设置"))?;

        let console = self
            .console
            .ok_or_else(|| crate::orm_error!(config, "控制台输出选项必须设置"))?;

        let log_sql = self
            .log_sql
            .ok_or_else(|| crate::orm_error!(config, "SQL日志选项必须设置"))?;

        if !console && self.file_path.is_none() {
            return Err(crate::orm_error!(config, "控制台与日志文件至少启用一个"));
        }

        Ok(LoggingConfig {
            level,
            console,
            file_path: self.file_path,
            log_sql,
        })
    }
}
