use serde::{Deserialize, Serialize};

/// 查找操作符
///
/// 对应过滤关键字的最后一段，例如 `name__icontains`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupOperator {
    /// 等于
    Exact,
    /// 忽略大小写等于
    IExact,
    /// 包含（区分大小写）
    Contains,
    /// 包含（忽略大小写）
    IContains,
    /// 在列表中
    In,
    /// 大于
    Gt,
    /// 大于等于
    Gte,
    /// 小于
    Lt,
    /// 小于等于
    Lte,
}

impl LookupOperator {
    /// 所有已知的操作符后缀
    pub const ALL: [LookupOperator; 9] = [
        LookupOperator::Exact,
        LookupOperator::IExact,
        LookupOperator::Contains,
        LookupOperator::IContains,
        LookupOperator::In,
        LookupOperator::Gt,
        LookupOperator::Gte,
        LookupOperator::Lt,
        LookupOperator::Lte,
    ];

    /// 从关键字后缀解析操作符
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == suffix)
    }

    /// 关键字后缀
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOperator::Exact => "exact",
            LookupOperator::IExact => "iexact",
            LookupOperator::Contains => "contains",
            LookupOperator::IContains => "icontains",
            LookupOperator::In => "in",
            LookupOperator::Gt => "gt",
            LookupOperator::Gte => "gte",
            LookupOperator::Lt => "lt",
            LookupOperator::Lte => "lte",
        }
    }

    /// 是否为子串匹配（需要转义通配符）
    pub fn is_pattern(&self) -> bool {
        matches!(self, LookupOperator::Contains | LookupOperator::IContains)
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    /// AND 逻辑
    And,
    /// OR 逻辑
    Or,
}

impl LogicalOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicalOperator::And => " AND ",
            LogicalOperator::Or => " OR ",
        }
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// 升序
    Asc,
    /// 降序
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// 排序项，字段可以是跨关系路径（`author__name`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// 字段路径
    pub field: String,
    /// 排序方向
    pub direction: SortDirection,
}

impl OrderBy {
    /// 解析 `"-field"` 形式的排序声明
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                direction: SortDirection::Desc,
            },
            None => Self {
                field: spec.trim_start_matches('+').to_string(),
                direction: SortDirection::Asc,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_suffix() {
        assert_eq!(LookupOperator::from_suffix("icontains"), Some(LookupOperator::IContains));
        assert_eq!(LookupOperator::from_suffix("gte"), Some(LookupOperator::Gte));
        assert_eq!(LookupOperator::from_suffix("name"), None);
    }

    #[test]
    fn test_order_by_parse() {
        let desc = OrderBy::parse("-created");
        assert_eq!(desc.field, "created");
        assert_eq!(desc.direction, SortDirection::Desc);
        let asc = OrderBy::parse("name");
        assert_eq!(asc.direction, SortDirection::Asc);
    }
}
