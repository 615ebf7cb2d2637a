//! 查询模块
//!
//! `QuerySet` 负责链式构建与执行，`compiler` 把查询状态渲染为带参数的 SQL，
//! `prefetch` 在结果返回后批量加载关系

mod compiler;
pub mod expression;
mod join;
pub mod lookup;
pub mod manager;
pub mod prefetch;
pub mod queryset;

pub use expression::Q;
pub use lookup::{contains_pattern, escape_like, parse_lookup, Lookup};
pub use manager::Manager;
pub use prefetch::Prefetch;
pub use queryset::QuerySet;
