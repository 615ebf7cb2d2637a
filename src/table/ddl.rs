//! DDL 生成
//!
//! 按方言把 `TableSchema` 渲染为建表、建索引、删表语句

use super::schema::{ColumnDefinition, ColumnType, ConstraintType, TableSchema};
use crate::error::OrmResult;
use crate::security::{quote_identifier, validate_identifier, MAX_IDENTIFIER_LEN};
use crate::types::{DataValue, DatabaseType};

/// 约束/索引名超长时截断（PostgreSQL 会静默截断，这里保持一致）
pub fn constraint_name(raw: &str) -> String {
    raw.chars().take(MAX_IDENTIFIER_LEN).collect()
}

/// 带 schema 前缀的表名
pub fn qualified_name(table: &TableSchema) -> OrmResult<String> {
    validate_identifier("table_name", &table.name)?;
    match &table.schema {
        Some(schema) => {
            validate_identifier("schema_name", schema)?;
            Ok(format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(&table.name)
            ))
        }
        None => Ok(quote_identifier(&table.name)),
    }
}

/// 列类型对应的 SQL 类型
pub fn column_type_sql(column: &ColumnDefinition, dialect: DatabaseType) -> String {
    match dialect {
        DatabaseType::SQLite => match &column.column_type {
            ColumnType::Varchar { max_length } => format!("VARCHAR({})", max_length),
            ColumnType::Text => "TEXT".to_string(),
            // SQLite 的自增主键必须是 INTEGER
            ColumnType::Integer | ColumnType::BigInteger if column.auto_increment => {
                "INTEGER".to_string()
            }
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Double | ColumnType::Decimal { .. } => "REAL".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Uuid => "VARCHAR(36)".to_string(),
            ColumnType::Json => "TEXT".to_string(),
            ColumnType::Binary => "BLOB".to_string(),
        },
        DatabaseType::PostgreSQL => match &column.column_type {
            ColumnType::Varchar { max_length } => format!("VARCHAR({})", max_length),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer if column.auto_increment => "SERIAL".to_string(),
            ColumnType::BigInteger if column.auto_increment => "BIGSERIAL".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            // 数值统一以 f64 读写，定点数按双精度存储
            ColumnType::Double | ColumnType::Decimal { .. } => "DOUBLE PRECISION".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "TIMESTAMPTZ".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Binary => "BYTEA".to_string(),
        },
    }
}

/// DDL 中的字面量
pub fn literal_sql(value: &DataValue, dialect: DatabaseType) -> String {
    match value {
        DataValue::Null => "NULL".to_string(),
        DataValue::Bool(b) => match dialect {
            DatabaseType::SQLite => if *b { "1" } else { "0" }.to_string(),
            DatabaseType::PostgreSQL => if *b { "TRUE" } else { "FALSE" }.to_string(),
        },
        DataValue::Int(i) => i.to_string(),
        DataValue::Float(f) => f.to_string(),
        DataValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => {
            let text = other
                .to_storage_string()
                .unwrap_or_else(|| other.to_string());
            format!("'{}'", text.replace('\'', "''"))
        }
    }
}

fn column_sql(column: &ColumnDefinition, dialect: DatabaseType) -> OrmResult<String> {
    validate_identifier("column_name", &column.name)?;
    let mut sql = format!(
        "{} {}",
        quote_identifier(&column.name),
        column_type_sql(column, dialect)
    );
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
        if column.auto_increment && dialect == DatabaseType::SQLite {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    // SQLite 的非整数主键默认允许 NULL，需显式声明
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(expr) = &column.server_default {
        sql.push_str(&format!(" DEFAULT {}", expr));
    } else if let Some(value) = &column.default_value {
        sql.push_str(&format!(" DEFAULT {}", literal_sql(value, dialect)));
    }
    Ok(sql)
}

/// 建表语句
pub fn create_table_sql(table: &TableSchema, dialect: DatabaseType) -> OrmResult<String> {
    let mut parts = Vec::new();
    for column in &table.columns {
        parts.push(column_sql(column, dialect)?);
    }

    for constraint in &table.constraints {
        let columns = quote_columns(&constraint.columns)?;
        match constraint.constraint_type {
            ConstraintType::Unique => parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote_identifier(&constraint_name(&constraint.name)),
                columns
            )),
        }
    }

    for fk in &table.foreign_keys {
        validate_identifier("table_name", &fk.target_table)?;
        // SQLite 附加库中的表无法引用其他库的共享表，此类约束不生成
        if dialect == DatabaseType::SQLite && table.schema.is_some() && fk.target_schema.is_none() {
            continue;
        }
        // SQLite 的外键只能引用同一数据库内的表，不能带 schema 前缀
        let target = match (&fk.target_schema, dialect) {
            (Some(schema), DatabaseType::PostgreSQL) => {
                validate_identifier("schema_name", schema)?;
                format!(
                    "{}.{}",
                    quote_identifier(schema),
                    quote_identifier(&fk.target_table)
                )
            }
            _ => quote_identifier(&fk.target_table),
        };
        parts.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_identifier(&constraint_name(&fk.name)),
            quote_identifier(&fk.column),
            target,
            quote_identifier(&fk.target_column),
            fk.on_delete,
            fk.on_update
        ));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_name(table)?,
        parts.join(", ")
    ))
}

/// 建表后需要执行的语句：索引与列注释
pub fn post_create_sqls(table: &TableSchema, dialect: DatabaseType) -> OrmResult<Vec<String>> {
    let mut sqls = Vec::new();
    for index in &table.indexes {
        let columns = quote_columns(&index.columns)?;
        let unique = if index.unique { "UNIQUE " } else { "" };
        let name = quote_identifier(&constraint_name(&index.name));
        let sql = match (&table.schema, dialect) {
            // SQLite 把 schema 前缀写在索引名上，表名不带前缀
            (Some(schema), DatabaseType::SQLite) => format!(
                "CREATE {}INDEX IF NOT EXISTS {}.{} ON {} ({})",
                unique,
                quote_identifier(schema),
                name,
                quote_identifier(&table.name),
                columns
            ),
            _ => format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                unique,
                name,
                qualified_name(table)?,
                columns
            ),
        };
        sqls.push(sql);
    }

    if dialect == DatabaseType::PostgreSQL {
        for column in &table.columns {
            if let Some(comment) = &column.comment {
                sqls.push(format!(
                    "COMMENT ON COLUMN {}.{} IS '{}'",
                    qualified_name(table)?,
                    quote_identifier(&column.name),
                    comment.replace('\'', "''")
                ));
            }
        }
    }
    Ok(sqls)
}

/// 删表语句
pub fn drop_table_sql(table: &TableSchema, dialect: DatabaseType) -> OrmResult<String> {
    let cascade = match dialect {
        DatabaseType::PostgreSQL => " CASCADE",
        DatabaseType::SQLite => "",
    };
    Ok(format!(
        "DROP TABLE IF EXISTS {}{}",
        qualified_name(table)?,
        cascade
    ))
}

fn quote_columns(columns: &[String]) -> OrmResult<String> {
    let mut quoted = Vec::with_capacity(columns.len());
    for column in columns {
        validate_identifier("column_name", column)?;
        quoted.push(quote_identifier(column));
    }
    Ok(quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::schema::{ConstraintDefinition, ForeignKeyDefinition, IndexDefinition};

    fn column(name: &str, column_type: ColumnType) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            column_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            index: false,
            default_value: None,
            server_default: None,
            comment: None,
        }
    }

    fn sample(schema: Option<&str>) -> TableSchema {
        let mut table = TableSchema::new("posts", schema.map(str::to_string));
        let mut id = column("id", ColumnType::BigInteger);
        id.primary_key = true;
        id.auto_increment = true;
        table.columns.push(id);
        table.columns.push(column("title", ColumnType::Varchar { max_length: 100 }));
        table.columns.push(column("author", ColumnType::BigInteger));
        table.foreign_keys.push(ForeignKeyDefinition {
            name: "fk_posts_users_id_author".to_string(),
            column: "author".to_string(),
            target_table: "users".to_string(),
            target_schema: schema.map(str::to_string),
            target_column: "id".to_string(),
            on_delete: "CASCADE".to_string(),
            on_update: "CASCADE".to_string(),
        });
        table.constraints.push(ConstraintDefinition {
            name: "uc_posts_title_author".to_string(),
            constraint_type: ConstraintType::Unique,
            columns: vec!["title".to_string(), "author".to_string()],
        });
        table.indexes.push(IndexDefinition {
            name: "idx_posts_title".to_string(),
            columns: vec!["title".to_string()],
            unique: false,
        });
        table
    }

    #[test]
    fn test_sqlite_create_table() {
        let sql = create_table_sql(&sample(None), DatabaseType::SQLite).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"posts\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"author\" BIGINT NOT NULL"));
        assert!(sql.contains(
            "CONSTRAINT \"fk_posts_users_id_author\" FOREIGN KEY (\"author\") REFERENCES \"users\" (\"id\")"
        ));
        assert!(sql.contains("CONSTRAINT \"uc_posts_title_author\" UNIQUE (\"title\", \"author\")"));
    }

    #[test]
    fn test_postgres_schema_qualified() {
        let table = sample(Some("tenant_a"));
        let sql = create_table_sql(&table, DatabaseType::PostgreSQL).unwrap();
        assert!(sql.contains("\"tenant_a\".\"posts\""));
        assert!(sql.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("REFERENCES \"tenant_a\".\"users\""));
        let post = post_create_sqls(&table, DatabaseType::PostgreSQL).unwrap();
        assert_eq!(
            post[0],
            "CREATE INDEX IF NOT EXISTS \"idx_posts_title\" ON \"tenant_a\".\"posts\" (\"title\")"
        );
    }

    #[test]
    fn test_sqlite_index_in_attached_schema() {
        let post = post_create_sqls(&sample(Some("tenant_a")), DatabaseType::SQLite).unwrap();
        assert_eq!(
            post[0],
            "CREATE INDEX IF NOT EXISTS \"tenant_a\".\"idx_posts_title\" ON \"posts\" (\"title\")"
        );
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(literal_sql(&DataValue::from("it's"), DatabaseType::SQLite), "'it''s'");
        assert_eq!(literal_sql(&DataValue::Bool(true), DatabaseType::PostgreSQL), "TRUE");
    }
}
