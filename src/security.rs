//! 数据库安全验证工具
//!
//! 校验表名、列名、schema 名等标识符，并按方言加引号，
//! 所有拼接进 SQL 的标识符都必须经过这里

use crate::error::{OrmError, OrmResult};
use crate::types::DatabaseType;
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|_| unreachable!())
});

/// 标识符最大长度（PostgreSQL 上限为 63）
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// 数据库安全验证器
#[derive(Debug, Clone, Copy)]
pub struct DatabaseSecurityValidator {
    db_type: DatabaseType,
}

impl DatabaseSecurityValidator {
    /// 创建新的安全验证器
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// 验证标识符（表名、列名、schema 名）
    ///
    /// `kind` 只用于错误消息
    pub fn validate_identifier(&self, kind: &str, name: &str) -> OrmResult<()> {
        validate_identifier(kind, name)
    }

    /// 获取安全的标识符（已加引号）
    pub fn quote(&self, name: &str) -> OrmResult<String> {
        validate_identifier("identifier", name)?;
        Ok(quote_identifier(name))
    }

    /// 获取安全的表标识符，可带 schema 前缀
    pub fn qualified_table(&self, schema: Option<&str>, table: &str) -> OrmResult<String> {
        validate_identifier("table_name", table)?;
        match schema {
            Some(schema) => {
                validate_identifier("schema_name", schema)?;
                Ok(format!("{}.{}", quote_identifier(schema), quote_identifier(table)))
            }
            None => Ok(quote_identifier(table)),
        }
    }
}

/// 验证标识符的安全性
pub fn validate_identifier(kind: &str, name: &str) -> OrmResult<()> {
    if name.is_empty() {
        return Err(OrmError::ValidationError {
            field: kind.to_string(),
            message: "标识符不能为空".to_string(),
        });
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(OrmError::ValidationError {
            field: name.to_string(),
            message: format!("标识符长度不能超过{}个字符", MAX_IDENTIFIER_LEN),
        });
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(OrmError::ValidationError {
            field: name.to_string(),
            message: "标识符只能包含字母、数字和下划线，且不能以数字开头".to_string(),
        });
    }

    Ok(())
}

/// 加双引号（SQLite 与 PostgreSQL 一致）
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("table", "users").is_ok());
        assert!(validate_identifier("table", "_users_2").is_ok());
        assert!(validate_identifier("table", "2users").is_err());
        assert!(validate_identifier("table", "users; DROP TABLE x").is_err());
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", &"a".repeat(64)).is_err());
    }

    #[test]
    fn test_safe_identifier_generation() {
        let validator = DatabaseSecurityValidator::new(DatabaseType::PostgreSQL);
        assert_eq!(validator.quote("name").unwrap(), "\"name\"");
        assert_eq!(
            validator.qualified_table(Some("tenant_a"), "users").unwrap(),
            "\"tenant_a\".\"users\""
        );
        assert!(validator.qualified_table(Some("a-b"), "users").is_err());
    }
}
