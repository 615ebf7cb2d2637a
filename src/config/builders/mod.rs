//! # 配置构建器模块
//!
//! 所有必填项必须显式设置，缺失时 `build()` 返回配置错误

pub mod database_builder;
pub mod global_builder;
pub mod logging_builder;

pub use database_builder::DatabaseConfigBuilder;
pub use global_builder::GlobalConfigBuilder;
pub use logging_builder::LoggingConfigBuilder;
