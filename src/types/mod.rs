//! 数据库类型定义和配置
//!
//! 定义支持的数据库类型、连接配置和通用数据类型

pub mod data_value;
pub mod database_config;
pub mod query;

pub use data_value::{DataValue, Row};
pub use database_config::{ConnectionConfig, DatabaseConfig, DatabaseType};
pub use query::{LogicalOperator, LookupOperator, OrderBy, SortDirection};
