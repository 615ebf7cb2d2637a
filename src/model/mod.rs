//! 模型定义模块
//!
//! `ModelBuilder` 描述模型，构建流程完成字段收集、主键分配、关系装配与注册，
//! 产出可查询的 `ModelClass`；`ModelInstance` 是单行数据

pub mod builder;
pub mod class;
pub mod instance;
pub mod meta;
mod metaclass;
pub mod relation;
pub mod signals;

pub use builder::ModelBuilder;
pub use class::ModelClass;
pub use instance::ModelInstance;
pub use meta::{default_related_name, default_table_name, Index, MetaInfo, UniqueTogether};
pub use relation::{
    resolve_hop, Hop, ManyToManyManager, RelatedField, RelatedKind, RelationCell, ThroughInfo,
};
pub use signals::{Signal, SignalContext, Signals};
