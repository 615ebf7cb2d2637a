//! 关系路径的 JOIN 规划
//!
//! 每条路径逐段解析为 `Hop`，按路径前缀去重后生成 LEFT JOIN。
//! 反向关联携带具体的外键列，同一目标上的多个外键因此不会混淆

use crate::error::OrmResult;
use crate::model::{resolve_hop, Hop, ModelClass};
use crate::registry::Registry;
use crate::security::quote_identifier;
use crate::table::ddl::qualified_name;
use std::sync::Arc;

/// 已加入查询的表
#[derive(Clone)]
pub(crate) struct JoinedTable {
    /// 关系路径，`author__profile`
    pub path: String,
    pub alias: String,
    pub model: Arc<ModelClass>,
    /// 路径上是否存在一对多或多对多
    pub many: bool,
}

pub(crate) struct JoinPlan<'a> {
    registry: &'a Registry,
    root: Arc<ModelClass>,
    root_alias: String,
    schema: Option<String>,
    joined: Vec<JoinedTable>,
    clauses: Vec<String>,
}

impl<'a> JoinPlan<'a> {
    pub fn new(registry: &'a Registry, root: Arc<ModelClass>, schema: Option<String>) -> OrmResult<Self> {
        let root_alias = root.table_name()?.to_string();
        Ok(Self {
            registry,
            root,
            root_alias,
            schema,
            joined: Vec::new(),
            clauses: Vec::new(),
        })
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn root(&self) -> &Arc<ModelClass> {
        &self.root
    }

    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// 根表（带 schema）
    pub fn root_table_sql(&self) -> OrmResult<String> {
        let table = self.registry.table_for(&self.root, self.schema.as_deref())?;
        qualified_name(&table)
    }

    /// 关联模型所在的 schema：租户根模型关联的共享模型留在默认 schema
    pub fn schema_for(&self, model: &ModelClass) -> Option<&str> {
        if model.meta().is_tenant || !self.root.meta().is_tenant {
            self.schema.as_deref()
        } else {
            None
        }
    }

    fn table_sql(&self, model: &ModelClass) -> OrmResult<String> {
        let table = self.registry.table_for(model, self.schema_for(model))?;
        qualified_name(&table)
    }

    pub fn has_joins(&self) -> bool {
        !self.clauses.is_empty()
    }

    /// 确保路径已加入查询，返回路径末端的表
    pub fn ensure(&mut self, path: &[String]) -> OrmResult<JoinedTable> {
        let mut current = JoinedTable {
            path: String::new(),
            alias: self.root_alias.clone(),
            model: self.root.clone(),
            many: false,
        };
        for segment in path {
            let full_path = if current.path.is_empty() {
                segment.clone()
            } else {
                format!("{}__{}", current.path, segment)
            };
            if let Some(existing) = self.joined.iter().find(|j| j.path == full_path) {
                current = existing.clone();
                continue;
            }

            let hop = resolve_hop(&current.model, self.registry, segment)?;
            let next = JoinedTable {
                alias: full_path.clone(),
                path: full_path,
                model: hop.target().clone(),
                many: current.many || hop.is_many(),
            };
            self.add_join(&current, &hop, &next)?;
            self.joined.push(next.clone());
            current = next;
        }
        Ok(current)
    }

    fn add_join(&mut self, parent: &JoinedTable, hop: &Hop, next: &JoinedTable) -> OrmResult<()> {
        let parent_alias = quote_identifier(&parent.alias);
        let alias = quote_identifier(&next.alias);
        match hop {
            Hop::Forward { field, target } => {
                let clause = format!(
                    "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                    self.table_sql(target)?,
                    alias,
                    alias,
                    quote_identifier(target.pk_name()?),
                    parent_alias,
                    quote_identifier(field)
                );
                self.clauses.push(clause);
            }
            Hop::Reverse { source, field, .. } => {
                let clause = format!(
                    "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                    self.table_sql(source)?,
                    alias,
                    alias,
                    quote_identifier(field),
                    parent_alias,
                    quote_identifier(parent.model.pk_name()?)
                );
                self.clauses.push(clause);
            }
            Hop::ManyToMany {
                through,
                near_column,
                far_column,
                target,
            } => {
                let through_alias = quote_identifier(&format!("{}__through", next.alias));
                self.clauses.push(format!(
                    "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                    self.table_sql(through)?,
                    through_alias,
                    through_alias,
                    quote_identifier(near_column),
                    parent_alias,
                    quote_identifier(parent.model.pk_name()?)
                ));
                self.clauses.push(format!(
                    "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                    self.table_sql(target)?,
                    alias,
                    alias,
                    quote_identifier(target.pk_name()?),
                    through_alias,
                    quote_identifier(far_column)
                ));
            }
        }
        Ok(())
    }

    /// 渲染全部 JOIN 子句（带前导空格）
    pub fn joins_sql(&self) -> String {
        self.clauses
            .iter()
            .map(|c| format!(" {}", c))
            .collect::<String>()
    }
}
