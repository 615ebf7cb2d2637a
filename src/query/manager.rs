//! 自定义管理器

use super::queryset::QuerySet;

/// 管理器为模型提供基础查询集
///
/// ```ignore
/// struct Active;
/// impl Manager for Active {
///     fn get_queryset(&self, base: QuerySet) -> QuerySet {
///         base.filter(kwargs!(is_active = true))
///     }
/// }
/// ```
pub trait Manager: Send + Sync {
    fn get_queryset(&self, base: QuerySet) -> QuerySet;
}

impl<F> Manager for F
where
    F: Fn(QuerySet) -> QuerySet + Send + Sync,
{
    fn get_queryset(&self, base: QuerySet) -> QuerySet {
        self(base)
    }
}
