//! 查找键解析
//!
//! `author__profile__name__icontains` 从右向左拆分：末段是已知操作符时作为操作符，
//! 其前一段是字段名，其余各段是关系路径

use crate::error::OrmResult;
use crate::types::LookupOperator;

/// 解析后的查找键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// 关系路径
    pub path: Vec<String>,
    /// 字段名（`pk` 尚未改写）
    pub field: String,
    pub operator: LookupOperator,
}

/// 解析查找键
pub fn parse_lookup(key: &str) -> OrmResult<Lookup> {
    let mut segments: Vec<String> = key.split("__").map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(crate::orm_error!(query, format!("无效的查找键: '{}'", key)));
    }

    let operator = match segments.last().and_then(|s| LookupOperator::from_suffix(s)) {
        Some(op) if segments.len() > 1 => {
            segments.pop();
            op
        }
        _ => LookupOperator::Exact,
    };
    let field = segments
        .pop()
        .ok_or_else(|| crate::orm_error!(query, format!("无效的查找键: '{}'", key)))?;
    Ok(Lookup {
        path: segments,
        field,
        operator,
    })
}

/// 转义 LIKE 模式中的通配符，转义字符为反斜杠
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// 子串匹配模式
pub fn contains_pattern(value: &str) -> String {
    format!("%{}%", escape_like(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_field() {
        let lookup = parse_lookup("name").unwrap();
        assert!(lookup.path.is_empty());
        assert_eq!(lookup.field, "name");
        assert_eq!(lookup.operator, LookupOperator::Exact);
    }

    #[test]
    fn test_operator_suffix() {
        let lookup = parse_lookup("age__gte").unwrap();
        assert_eq!(lookup.field, "age");
        assert_eq!(lookup.operator, LookupOperator::Gte);
    }

    #[test]
    fn test_relation_path() {
        let lookup = parse_lookup("author__profile__name__icontains").unwrap();
        assert_eq!(lookup.path, vec!["author".to_string(), "profile".to_string()]);
        assert_eq!(lookup.field, "name");
        assert_eq!(lookup.operator, LookupOperator::IContains);

        let lookup = parse_lookup("author__name").unwrap();
        assert_eq!(lookup.path, vec!["author".to_string()]);
        assert_eq!(lookup.field, "name");
        assert_eq!(lookup.operator, LookupOperator::Exact);
    }

    #[test]
    fn test_field_named_like_operator() {
        // 单段时即使与操作符同名也是字段
        let lookup = parse_lookup("in").unwrap();
        assert_eq!(lookup.field, "in");
        assert_eq!(lookup.operator, LookupOperator::Exact);
    }

    #[test]
    fn test_malformed_key() {
        assert!(parse_lookup("name__").is_err());
        assert!(parse_lookup("__name").is_err());
        assert!(parse_lookup("").is_err());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%-Cotton"), "100\\%-Cotton");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("c:\\dir"), "c:\\\\dir");
        assert_eq!(contains_pattern("50%"), "%50\\%%");
    }
}
