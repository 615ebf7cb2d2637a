//! # 配置管理模块
//!
//! 构建器模式的全局配置，支持 TOML/JSON 文件加载与保存

pub mod builders;
pub mod convenience;
pub mod core;

pub use builders::{DatabaseConfigBuilder, GlobalConfigBuilder, LoggingConfigBuilder};
pub use convenience::{postgres_config, sqlite_config, sqlite_memory_config};
pub use core::{GlobalConfig, LogLevel, LoggingConfig};
