//! 表管理模块
//!
//! 从模型的字段映射推导物理表结构，并生成 DDL

pub mod ddl;
pub mod schema;

pub use ddl::{create_table_sql, drop_table_sql, post_create_sqls};
pub use schema::{
    ColumnDefinition, ColumnType, ConstraintDefinition, ConstraintType, ForeignKeyDefinition,
    IndexDefinition, TableSchema,
};

use crate::error::OrmResult;
use crate::fields::{Field, FieldDefault, FieldType};
use crate::model::{ModelClass, UniqueTogether};
use crate::registry::Registry;
use crate::debug_log;
use std::sync::Arc;

/// 非关系字段对应的列类型
pub fn scalar_column_type(field: &Field) -> Option<ColumnType> {
    let column_type = match &field.field_type {
        FieldType::Char { max_length, .. } | FieldType::Email { max_length } => {
            ColumnType::Varchar {
                max_length: *max_length,
            }
        }
        FieldType::Text => ColumnType::Text,
        FieldType::Integer { .. } => ColumnType::Integer,
        FieldType::BigInteger { .. } => ColumnType::BigInteger,
        FieldType::Float { .. } => ColumnType::Double,
        FieldType::Decimal {
            max_digits,
            decimal_places,
        } => ColumnType::Decimal {
            precision: *max_digits,
            scale: *decimal_places,
        },
        FieldType::Boolean => ColumnType::Boolean,
        FieldType::Date { .. } => ColumnType::Date,
        FieldType::DateTime { .. } => ColumnType::DateTime,
        FieldType::Uuid => ColumnType::Uuid,
        FieldType::Json => ColumnType::Json,
        FieldType::Binary { .. } => ColumnType::Binary,
        FieldType::ForeignKey(_) | FieldType::ManyToMany(_) => return None,
    };
    Some(column_type)
}

/// 根据模型元数据构建表结构
///
/// 外键列的类型取自目标模型主键列的类型
pub fn build_table(
    model: &ModelClass,
    registry: &Registry,
    schema: Option<&str>,
) -> OrmResult<TableSchema> {
    let table_name = model.table_name()?.to_string();
    let mut table = TableSchema::new(table_name.clone(), schema.map(str::to_string));

    for field in model.fields().iter().filter(|f| f.is_column()) {
        let column_type = match field.foreign_key_info() {
            Some(info) => {
                let target = registry.resolve(&info.target)?;
                let target_pk = target.pk_field()?;
                let column_type = scalar_column_type(target_pk).unwrap_or(ColumnType::BigInteger);

                let target_table = target.table_name()?.to_string();
                let target_schema = if target.meta().is_tenant {
                    schema.map(str::to_string)
                } else {
                    None
                };
                table.foreign_keys.push(ForeignKeyDefinition {
                    name: format!(
                        "fk_{}_{}_{}_{}",
                        table_name, target_table, target_pk.name, field.name
                    ),
                    column: field.name.clone(),
                    target_table,
                    target_schema,
                    target_column: target_pk.name.clone(),
                    on_delete: info.on_delete.as_sql().to_string(),
                    on_update: info.on_update.as_sql().to_string(),
                });
                column_type
            }
            None => scalar_column_type(field).unwrap_or(ColumnType::Text),
        };

        let default_value = match &field.default {
            Some(FieldDefault::Value(v)) if !v.is_null() => Some(v.clone()),
            _ => None,
        };

        table.columns.push(ColumnDefinition {
            name: field.name.clone(),
            column_type,
            nullable: field.null && !field.primary_key,
            primary_key: field.primary_key,
            auto_increment: field.autoincrement,
            unique: field.unique && !field.primary_key,
            index: field.index,
            default_value,
            server_default: field.server_default.clone(),
            comment: field.comment.clone(),
        });

        if field.index && !field.unique && !field.primary_key {
            table.indexes.push(IndexDefinition {
                name: format!("idx_{}_{}", table_name, field.name),
                columns: vec![field.name.clone()],
                unique: false,
            });
        }
    }

    for unique in &model.meta().unique_together {
        let (name, columns) = match unique {
            UniqueTogether::Field(f) => (None, vec![f.clone()]),
            UniqueTogether::Fields(fs) => (None, fs.clone()),
            UniqueTogether::Constraint { name, fields } => (Some(name.clone()), fields.clone()),
        };
        let name = name.unwrap_or_else(|| format!("uc_{}_{}", table_name, columns.join("_")));
        table.constraints.push(ConstraintDefinition {
            name,
            constraint_type: ConstraintType::Unique,
            columns,
        });
    }

    for index in &model.meta().indexes {
        let name = index
            .name
            .clone()
            .unwrap_or_else(|| format!("idx_{}_{}", table_name, index.fields.join("_")));
        table.indexes.push(IndexDefinition {
            name,
            columns: index.fields.clone(),
            unique: index.unique,
        });
    }

    debug_log!(
        "构建表结构: {} (schema: {:?}, 列数: {})",
        table.name,
        table.schema,
        table.columns.len()
    );
    Ok(table)
}

/// 按外键依赖排序（被引用的表在前），循环依赖时保持注册顺序
pub fn sort_by_dependency(
    models: Vec<Arc<ModelClass>>,
    registry: &Registry,
) -> Vec<Arc<ModelClass>> {
    let names: Vec<String> = models.iter().map(|m| m.name().to_string()).collect();
    let mut remaining = models;
    let mut ordered: Vec<Arc<ModelClass>> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let position = remaining.iter().position(|model| {
            model.fields().iter().all(|field| match field.foreign_key_info() {
                Some(info) => {
                    let target = registry
                        .resolve(&info.target)
                        .map(|t| t.name().to_string())
                        .unwrap_or_else(|_| info.target.name().to_string());
                    target == model.name()
                        || !names.contains(&target)
                        || ordered.iter().any(|m| m.name() == target)
                }
                None => true,
            })
        });
        // 循环依赖时取第一个
        let index = position.unwrap_or(0);
        ordered.push(remaining.remove(index));
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::fields::{char_field, foreign_key, integer_field, uuid_field};
    use crate::model::ModelBuilder;
    use crate::types::{DataValue, DatabaseType};

    fn registry() -> Arc<Registry> {
        Registry::new(Arc::new(SqliteDatabase::memory()))
    }

    #[test]
    fn test_foreign_key_follows_uuid_primary_key() {
        let registry = registry();
        let account = ModelBuilder::new("Account")
            .registry(&registry)
            .field(
                "key",
                uuid_field()
                    .default_factory(|| DataValue::Uuid(uuid::Uuid::new_v4()))
                    .primary_key(),
            )
            .build()
            .unwrap();
        let session = ModelBuilder::new("Session")
            .registry(&registry)
            .field("account", foreign_key(&account))
            .build()
            .unwrap();

        let table = build_table(&session, &registry, None).unwrap();
        let column = table.column("account").unwrap();
        assert_eq!(column.column_type, ColumnType::Uuid);
        assert!(!column.nullable);
        assert_eq!(table.foreign_keys[0].target_column, "key");
    }

    #[test]
    fn test_foreign_key_follows_integer_primary_key() {
        let registry = registry();
        let user = ModelBuilder::new("User")
            .registry(&registry)
            .field("name", char_field(50))
            .build()
            .unwrap();
        let team = ModelBuilder::new("Team")
            .registry(&registry)
            .field("code", integer_field().primary_key())
            .build()
            .unwrap();
        let member = ModelBuilder::new("Member")
            .registry(&registry)
            .field("user", foreign_key(&user))
            .field("team", foreign_key(&team).null())
            .build()
            .unwrap();

        let table = build_table(&member, &registry, None).unwrap();
        let user_column = table.column("user").unwrap();
        assert_eq!(user_column.column_type, ColumnType::BigInteger);
        assert!(!user_column.auto_increment);
        let team_column = table.column("team").unwrap();
        assert_eq!(team_column.column_type, ColumnType::Integer);
        assert!(team_column.nullable);
    }

    #[test]
    fn test_nullable_primary_key_stays_not_null() {
        let registry = registry();
        let token = ModelBuilder::new("Token")
            .registry(&registry)
            .field(
                "value",
                char_field(32)
                    .default("unset")
                    .primary_key()
                    .null(),
            )
            .build()
            .unwrap();

        let table = build_table(&token, &registry, None).unwrap();
        let pk = table.primary_key().unwrap();
        assert_eq!(pk.name, "value");
        assert!(!pk.nullable);
        let sql = create_table_sql(&table, DatabaseType::SQLite).unwrap();
        assert!(sql.contains("\"value\" VARCHAR(32) PRIMARY KEY NOT NULL"));
        let sql = create_table_sql(&table, DatabaseType::PostgreSQL).unwrap();
        assert!(sql.contains("\"value\" VARCHAR(32) PRIMARY KEY NOT NULL"));
    }
}
