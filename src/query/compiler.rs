//! SQL 编译
//!
//! 先解析所有查找键与关系路径（确定 JOIN），再用同一个 `SqlWriter` 按方言渲染，
//! 保证 PostgreSQL 的 `$n` 占位符编号与参数顺序一致

use super::expression::Q;
use super::join::{JoinPlan, JoinedTable};
use super::lookup::{contains_pattern, parse_lookup};
use crate::database::Statement;
use crate::error::OrmResult;
use crate::fields::Field;
use crate::model::{resolve_hop, ModelClass};
use crate::registry::Registry;
use crate::security::quote_identifier;
use crate::types::{
    DataValue, DatabaseType, LogicalOperator, LookupOperator, OrderBy, Row, SortDirection,
};
use std::sync::Arc;

/// 查询集累积的状态
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    pub filters: Vec<Q>,
    pub or_filters: Vec<Q>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub select_related: Vec<String>,
    /// `Some(空)` 为 DISTINCT，`Some(列)` 为按列去重
    pub distinct: Option<Vec<String>>,
    pub group_by: Vec<String>,
    pub only: Option<Vec<String>>,
    pub defer: Vec<String>,
    pub exclude_secrets: bool,
}

/// 按方言追加 SQL 与参数
pub(crate) struct SqlWriter {
    dialect: DatabaseType,
    sql: String,
    params: Vec<DataValue>,
}

impl SqlWriter {
    pub fn new(dialect: DatabaseType) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// 绑定参数，空值直接渲染为 NULL
    pub fn bind(&mut self, value: DataValue) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        self.params.push(value);
        match self.dialect {
            DatabaseType::SQLite => self.sql.push('?'),
            DatabaseType::PostgreSQL => {
                let placeholder = format!("${}", self.params.len());
                self.sql.push_str(&placeholder);
            }
        }
    }

    pub fn finish(self) -> Statement {
        Statement::new(self.sql, self.params)
    }
}

/// 解析后的条件
#[derive(Debug, Clone)]
enum Cond {
    Compare {
        column: String,
        operator: LookupOperator,
        value: DataValue,
    },
    And(Vec<Cond>),
    Or(Vec<Cond>),
    Not(Box<Cond>),
}

/// 解析后的选择列
struct Selected {
    expr: String,
    alias: String,
}

pub(crate) struct Compiler<'a> {
    plan: JoinPlan<'a>,
    dialect: DatabaseType,
    /// 过滤条件经过了一对多路径，结果需要去重
    many_filter: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(
        registry: &'a Registry,
        model: Arc<ModelClass>,
        schema: Option<String>,
        dialect: DatabaseType,
    ) -> OrmResult<Self> {
        Ok(Self {
            plan: JoinPlan::new(registry, model, schema)?,
            dialect,
            many_filter: false,
        })
    }

    fn model(&self) -> Arc<ModelClass> {
        self.plan.root().clone()
    }

    /// 解析路径 + 字段为带别名的列
    fn resolve_field(&mut self, path: Vec<String>, field: String) -> OrmResult<(String, JoinedTable)> {
        let mut path = path;
        let mut table = self.plan.ensure(&path)?;
        let mut field = if field == "pk" {
            table.model.pk_name()?.to_string()
        } else {
            field
        };

        let is_column = table.model.field(&field).map(Field::is_column).unwrap_or(false);
        if !is_column {
            // 以关系名结尾时比较目标主键
            let registry = self.plan_registry();
            if resolve_hop(&table.model, registry, &field).is_err() {
                return Err(crate::orm_error!(
                    query,
                    format!("模型 {} 上不存在字段 '{}'", table.model.name(), field)
                ));
            }
            path.push(field);
            table = self.plan.ensure(&path)?;
            field = table.model.pk_name()?.to_string();
        }
        let column = format!("{}.{}", quote_identifier(&table.alias), quote_identifier(&field));
        Ok((column, table))
    }

    fn plan_registry(&self) -> &'a Registry {
        self.plan.registry()
    }

    /// 解析不带操作符的字段键（排序、分组、values）
    fn column(&mut self, key: &str) -> OrmResult<(String, JoinedTable)> {
        let mut segments: Vec<String> = key.split("__").map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(crate::orm_error!(query, format!("无效的字段路径: '{}'", key)));
        }
        let field = segments
            .pop()
            .ok_or_else(|| crate::orm_error!(query, format!("无效的字段路径: '{}'", key)))?;
        self.resolve_field(segments, field)
    }

    fn condition(&mut self, q: &Q) -> OrmResult<Cond> {
        match q {
            Q::Lookup(key, value) => {
                let lookup = parse_lookup(key)?;
                let (column, table) = self.resolve_field(lookup.path, lookup.field)?;
                if table.many {
                    self.many_filter = true;
                }
                Ok(Cond::Compare {
                    column,
                    operator: lookup.operator,
                    value: value.clone(),
                })
            }
            Q::And(children) => Ok(Cond::And(
                children
                    .iter()
                    .map(|c| self.condition(c))
                    .collect::<OrmResult<Vec<_>>>()?,
            )),
            Q::Or(children) => Ok(Cond::Or(
                children
                    .iter()
                    .map(|c| self.condition(c))
                    .collect::<OrmResult<Vec<_>>>()?,
            )),
            Q::Not(inner) => Ok(Cond::Not(Box::new(self.condition(inner)?))),
        }
    }

    /// 过滤条件：所有 filter 合取，or_ 组整体析取后再合取
    fn where_cond(&mut self, state: &QueryState) -> OrmResult<Option<Cond>> {
        let mut parts = Vec::new();
        for q in state.filters.iter().filter(|q| !q.is_empty()) {
            parts.push(self.condition(q)?);
        }
        let disjuncts: Vec<&Q> = state.or_filters.iter().filter(|q| !q.is_empty()).collect();
        if !disjuncts.is_empty() {
            let mut any = Vec::new();
            for q in disjuncts {
                any.push(self.condition(q)?);
            }
            parts.push(Cond::Or(any));
        }
        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Cond::And(parts)),
        })
    }

    fn render_cond(&self, cond: &Cond, w: &mut SqlWriter) -> OrmResult<()> {
        match cond {
            Cond::And(children) | Cond::Or(children) if children.is_empty() => {
                w.push("1 = 1");
            }
            Cond::And(children) | Cond::Or(children) if children.len() == 1 => {
                self.render_cond(&children[0], w)?;
            }
            Cond::And(children) | Cond::Or(children) => {
                let joiner = if matches!(cond, Cond::And(_)) {
                    LogicalOperator::And
                } else {
                    LogicalOperator::Or
                }
                .as_sql();
                w.push("(");
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        w.push(joiner);
                    }
                    self.render_cond(child, w)?;
                }
                w.push(")");
            }
            Cond::Not(inner) => {
                w.push("NOT (");
                self.render_cond(inner, w)?;
                w.push(")");
            }
            Cond::Compare {
                column,
                operator,
                value,
            } => self.render_compare(column, *operator, value, w)?,
        }
        Ok(())
    }

    fn render_compare(
        &self,
        column: &str,
        operator: LookupOperator,
        value: &DataValue,
        w: &mut SqlWriter,
    ) -> OrmResult<()> {
        match operator {
            LookupOperator::Exact | LookupOperator::IExact if value.is_null() => {
                w.push(&format!("{} IS NULL", column));
            }
            LookupOperator::Exact => {
                w.push(&format!("{} = ", column));
                w.bind(value.clone());
            }
            LookupOperator::IExact => {
                w.push(&format!("LOWER({}) = LOWER(", column));
                w.bind(value.clone());
                w.push(")");
            }
            LookupOperator::Contains | LookupOperator::IContains => {
                let text = match value {
                    DataValue::String(s) => s.clone(),
                    other => other.to_storage_string().ok_or_else(|| {
                        crate::orm_error!(
                            query,
                            format!("{} 查找不支持 {} 类型的值", operator.as_str(), other.type_name())
                        )
                    })?,
                };
                let pattern = DataValue::String(contains_pattern(&text));
                match (operator, self.dialect) {
                    (LookupOperator::Contains, _) => {
                        w.push(&format!("{} LIKE ", column));
                        w.bind(pattern);
                    }
                    (_, DatabaseType::PostgreSQL) => {
                        w.push(&format!("{} ILIKE ", column));
                        w.bind(pattern);
                    }
                    (_, DatabaseType::SQLite) => {
                        w.push(&format!("LOWER({}) LIKE LOWER(", column));
                        w.bind(pattern);
                        w.push(")");
                    }
                }
                w.push(" ESCAPE '\\'");
            }
            LookupOperator::In => {
                let items = match value {
                    DataValue::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                if items.is_empty() {
                    w.push("1 = 0");
                    return Ok(());
                }
                w.push(&format!("{} IN (", column));
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.bind(item);
                }
                w.push(")");
            }
            LookupOperator::Gt | LookupOperator::Gte | LookupOperator::Lt | LookupOperator::Lte => {
                let symbol = match operator {
                    LookupOperator::Gt => ">",
                    LookupOperator::Gte => ">=",
                    LookupOperator::Lt => "<",
                    _ => "<=",
                };
                w.push(&format!("{} {} ", column, symbol));
                w.bind(value.clone());
            }
        }
        Ok(())
    }

    /// 实例查询的选择列：根模型列 + select_related 路径上各模型的列
    fn instance_columns(&mut self, state: &QueryState) -> OrmResult<Vec<Selected>> {
        let model = self.model();
        let root_alias = quote_identifier(self.plan.root_alias());
        let pk_name = model.pk_name()?.to_string();
        let mut selected = Vec::new();
        for field in model.column_fields() {
            let wanted = field.name == pk_name
                || (state
                    .only
                    .as_ref()
                    .map(|only| only.contains(&field.name))
                    .unwrap_or(true)
                    && !state.defer.contains(&field.name)
                    && !(state.exclude_secrets && field.secret));
            if wanted {
                selected.push(Selected {
                    expr: format!("{}.{}", root_alias, quote_identifier(&field.name)),
                    alias: field.name.clone(),
                });
            }
        }

        let mut prefixes: Vec<Vec<String>> = Vec::new();
        for path in &state.select_related {
            let segments: Vec<String> = path.split("__").map(str::to_string).collect();
            for end in 1..=segments.len() {
                let prefix = segments[..end].to_vec();
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
            }
        }
        for prefix in prefixes {
            let table = self.plan.ensure(&prefix)?;
            if table.many {
                return Err(crate::orm_error!(
                    relationship,
                    format!("select_related 不支持多值关系 '{}'，请使用 prefetch_related", table.path)
                ));
            }
            let alias = quote_identifier(&table.alias);
            for field in table.model.column_fields() {
                if state.exclude_secrets && field.secret {
                    continue;
                }
                selected.push(Selected {
                    expr: format!("{}.{}", alias, quote_identifier(&field.name)),
                    alias: format!("{}__{}", table.path, field.name),
                });
            }
        }
        Ok(selected)
    }

    fn order_columns(&mut self, order_by: &[OrderBy]) -> OrmResult<Vec<(String, SortDirection)>> {
        let mut out = Vec::new();
        for order in order_by {
            let (column, _) = self.column(&order.field)?;
            out.push((column, order.direction));
        }
        Ok(out)
    }

    fn columns(&mut self, keys: &[String]) -> OrmResult<Vec<String>> {
        keys.iter().map(|k| self.column(k).map(|(c, _)| c)).collect()
    }

    /// 渲染 SELECT 主体
    #[allow(clippy::too_many_arguments)]
    fn render_select(
        &self,
        w: &mut SqlWriter,
        state: &QueryState,
        selected: &[Selected],
        cond: Option<&Cond>,
        distinct_on: &[String],
        group_by: &[String],
        order: &[(String, SortDirection)],
        auto_distinct: bool,
    ) -> OrmResult<()> {
        w.push("SELECT ");
        match &state.distinct {
            Some(_) if !distinct_on.is_empty() && self.dialect == DatabaseType::PostgreSQL => {
                w.push(&format!("DISTINCT ON ({}) ", distinct_on.join(", ")));
            }
            Some(cols) if cols.is_empty() => w.push("DISTINCT "),
            None if auto_distinct && self.many_filter => w.push("DISTINCT "),
            _ => {}
        }
        let columns: Vec<String> = selected
            .iter()
            .map(|s| format!("{} AS {}", s.expr, quote_identifier(&s.alias)))
            .collect();
        w.push(&columns.join(", "));
        w.push(&format!(
            " FROM {} AS {}",
            self.plan.root_table_sql()?,
            quote_identifier(self.plan.root_alias())
        ));
        w.push(&self.plan.joins_sql());
        if let Some(cond) = cond {
            w.push(" WHERE ");
            self.render_cond(cond, w)?;
        }

        // SQLite 没有 DISTINCT ON，按列分组取每组一行
        let mut groups: Vec<String> = group_by.to_vec();
        if groups.is_empty() && self.dialect == DatabaseType::SQLite {
            groups = distinct_on.to_vec();
        }
        if !groups.is_empty() {
            w.push(&format!(" GROUP BY {}", groups.join(", ")));
        }
        if !order.is_empty() {
            let parts: Vec<String> = order
                .iter()
                .map(|(c, d)| format!("{} {}", c, d.as_sql()))
                .collect();
            w.push(&format!(" ORDER BY {}", parts.join(", ")));
        }
        self.render_limit(w, state.limit, state.offset);
        Ok(())
    }

    fn render_limit(&self, w: &mut SqlWriter, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset) {
            (Some(limit), _) => w.push(&format!(" LIMIT {}", limit)),
            (None, Some(_)) if self.dialect == DatabaseType::SQLite => w.push(" LIMIT -1"),
            _ => {}
        }
        if let Some(offset) = offset {
            w.push(&format!(" OFFSET {}", offset));
        }
    }

    fn prepare(
        &mut self,
        state: &QueryState,
    ) -> OrmResult<(Option<Cond>, Vec<String>, Vec<String>, Vec<(String, SortDirection)>)> {
        let cond = self.where_cond(state)?;
        let distinct_on = match &state.distinct {
            Some(cols) => self.columns(cols)?,
            None => Vec::new(),
        };
        let group_by = self.columns(&state.group_by)?;
        let order = self.order_columns(&state.order_by)?;
        Ok((cond, distinct_on, group_by, order))
    }

    /// 实例查询
    pub fn select(mut self, state: &QueryState) -> OrmResult<Statement> {
        let (cond, distinct_on, group_by, order) = self.prepare(state)?;
        let selected = self.instance_columns(state)?;
        let mut w = SqlWriter::new(self.dialect);
        self.render_select(
            &mut w,
            state,
            &selected,
            cond.as_ref(),
            &distinct_on,
            &group_by,
            &order,
            true,
        )?;
        Ok(w.finish())
    }

    /// `SELECT COUNT(*) FROM (子查询)`
    pub fn count(mut self, state: &QueryState) -> OrmResult<Statement> {
        let (cond, distinct_on, group_by, _) = self.prepare(state)?;
        let selected = self.instance_columns(state)?;
        let mut w = SqlWriter::new(self.dialect);
        w.push("SELECT COUNT(*) FROM (");
        self.render_select(
            &mut w,
            state,
            &selected,
            cond.as_ref(),
            &distinct_on,
            &group_by,
            &[],
            true,
        )?;
        w.push(") AS \"subquery\"");
        Ok(w.finish())
    }

    /// `SELECT EXISTS(子查询)`
    pub fn exists(mut self, state: &QueryState) -> OrmResult<Statement> {
        let (cond, distinct_on, group_by, _) = self.prepare(state)?;
        let model = self.model();
        let pk = model.pk_name()?.to_string();
        let selected = vec![Selected {
            expr: format!(
                "{}.{}",
                quote_identifier(self.plan.root_alias()),
                quote_identifier(&pk)
            ),
            alias: pk,
        }];
        let mut w = SqlWriter::new(self.dialect);
        w.push("SELECT EXISTS(");
        self.render_select(
            &mut w,
            state,
            &selected,
            cond.as_ref(),
            &distinct_on,
            &group_by,
            &[],
            false,
        )?;
        w.push(")");
        Ok(w.finish())
    }

    /// 聚合：在去重后的 (主键, 值) 子查询上计算
    pub fn aggregate(mut self, state: &QueryState, function: &str, field: &str) -> OrmResult<Statement> {
        let (cond, distinct_on, group_by, order) = self.prepare(state)?;
        let (column, _) = self.column(field)?;
        let model = self.model();
        let selected = vec![
            Selected {
                expr: format!(
                    "{}.{}",
                    quote_identifier(self.plan.root_alias()),
                    quote_identifier(model.pk_name()?)
                ),
                alias: "__pk".to_string(),
            },
            Selected {
                expr: column,
                alias: "value".to_string(),
            },
        ];
        let order = if state.limit.is_some() || state.offset.is_some() {
            order
        } else {
            Vec::new()
        };
        let mut w = SqlWriter::new(self.dialect);
        w.push(&format!("SELECT {}(\"subquery\".\"value\") FROM (", function));
        self.render_select(
            &mut w,
            state,
            &selected,
            cond.as_ref(),
            &distinct_on,
            &group_by,
            &order,
            true,
        )?;
        w.push(") AS \"subquery\"");
        Ok(w.finish())
    }

    /// values 查询，返回语句与 (结果键, 字段) 列表
    pub fn values(
        mut self,
        state: &QueryState,
        keys: &[String],
    ) -> OrmResult<(Statement, Vec<(String, Option<Field>)>)> {
        let (cond, distinct_on, group_by, order) = self.prepare(state)?;
        let model = self.model();
        let keys: Vec<String> = if keys.is_empty() {
            model.column_fields().map(|f| f.name.clone()).collect()
        } else {
            keys.to_vec()
        };
        let mut selected = Vec::new();
        let mut described = Vec::new();
        for key in keys {
            let (expr, table) = self.column(&key)?;
            let field_name = key.rsplit("__").next().unwrap_or(&key).to_string();
            let field = if field_name == "pk" {
                table.model.pk_field().ok().cloned()
            } else {
                table.model.field(&field_name).cloned()
            };
            selected.push(Selected {
                expr,
                alias: key.clone(),
            });
            described.push((key, field));
        }
        let mut w = SqlWriter::new(self.dialect);
        self.render_select(
            &mut w,
            state,
            &selected,
            cond.as_ref(),
            &distinct_on,
            &group_by,
            &order,
            false,
        )?;
        Ok((w.finish(), described))
    }

    /// 主键子查询条件，用于带 JOIN 或分页的 UPDATE/DELETE
    fn render_target(&mut self, state: &QueryState, w: &mut SqlWriter) -> OrmResult<()> {
        let (cond, distinct_on, group_by, order) = self.prepare(state)?;
        let model = self.model();
        let pk = quote_identifier(model.pk_name()?);
        let direct = !self.plan.has_joins()
            && state.limit.is_none()
            && state.offset.is_none()
            && state.distinct.is_none()
            && group_by.is_empty();
        if direct {
            if let Some(cond) = cond {
                w.push(" WHERE ");
                self.render_cond(&cond, w)?;
            }
            return Ok(());
        }
        let selected = vec![Selected {
            expr: format!("{}.{}", quote_identifier(self.plan.root_alias()), pk),
            alias: model.pk_name()?.to_string(),
        }];
        w.push(&format!(" WHERE {} IN (SELECT {} FROM (", pk, pk));
        self.render_select(
            w,
            state,
            &selected,
            cond.as_ref(),
            &distinct_on,
            &group_by,
            &order,
            false,
        )?;
        w.push(") AS \"subquery\")");
        Ok(())
    }

    /// `UPDATE ... SET ... WHERE ...`
    pub fn update(mut self, state: &QueryState, values: &[(String, DataValue)]) -> OrmResult<Statement> {
        if values.is_empty() {
            return Err(crate::orm_error!(query, "更新值不能为空"));
        }
        let mut w = SqlWriter::new(self.dialect);
        w.push(&format!("UPDATE {} SET ", self.plan.root_table_sql()?));
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(&format!("{} = ", quote_identifier(column)));
            w.bind(value.clone());
        }
        self.render_target(state, &mut w)?;
        Ok(w.finish())
    }

    /// `DELETE FROM ... WHERE ...`
    pub fn delete(mut self, state: &QueryState) -> OrmResult<Statement> {
        let mut w = SqlWriter::new(self.dialect);
        w.push(&format!("DELETE FROM {}", self.plan.root_table_sql()?));
        self.render_target(state, &mut w)?;
        Ok(w.finish())
    }
}

/// 单行插入，返回主键
pub(crate) fn insert_statement(
    table_sql: &str,
    pk_name: &str,
    row: &[(String, DataValue)],
    dialect: DatabaseType,
) -> Statement {
    let mut w = SqlWriter::new(dialect);
    if row.is_empty() {
        w.push(&format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            table_sql,
            quote_identifier(pk_name)
        ));
        return w.finish();
    }
    let columns: Vec<String> = row.iter().map(|(c, _)| quote_identifier(c)).collect();
    w.push(&format!("INSERT INTO {} ({}) VALUES (", table_sql, columns.join(", ")));
    for (i, (_, value)) in row.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.bind(value.clone());
    }
    w.push(&format!(") RETURNING {}", quote_identifier(pk_name)));
    w.finish()
}

/// 多行插入，缺失的列在 SQLite 中为 NULL、在 PostgreSQL 中为 DEFAULT
pub(crate) fn bulk_insert_statement(
    table_sql: &str,
    pk_name: &str,
    columns: &[String],
    rows: &[Row],
    dialect: DatabaseType,
) -> Statement {
    let mut w = SqlWriter::new(dialect);
    let quoted: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    w.push(&format!("INSERT INTO {} ({}) VALUES ", table_sql, quoted.join(", ")));
    for (r, row) in rows.iter().enumerate() {
        if r > 0 {
            w.push(", ");
        }
        w.push("(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            match (row.get(column), dialect) {
                (Some(value), _) => w.bind(value.clone()),
                (None, DatabaseType::PostgreSQL) => w.push("DEFAULT"),
                (None, DatabaseType::SQLite) => w.push("NULL"),
            }
        }
        w.push(")");
    }
    w.push(&format!(" RETURNING {}", quote_identifier(pk_name)));
    w.finish()
}

/// 按主键的多行更新：`SET col = CASE pk WHEN ? THEN ? ... ELSE col END`
pub(crate) fn bulk_update_statement(
    table_sql: &str,
    pk_name: &str,
    columns: &[String],
    rows: &[(DataValue, Row)],
    dialect: DatabaseType,
) -> Statement {
    let pk = quote_identifier(pk_name);
    let mut w = SqlWriter::new(dialect);
    w.push(&format!("UPDATE {} SET ", table_sql));
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        let quoted = quote_identifier(column);
        w.push(&format!("{} = CASE {}", quoted, pk));
        for (pk_value, values) in rows {
            if let Some(value) = values.get(column) {
                w.push(" WHEN ");
                w.bind(pk_value.clone());
                w.push(" THEN ");
                w.bind(value.clone());
            }
        }
        w.push(&format!(" ELSE {} END", quoted));
    }
    w.push(&format!(" WHERE {} IN (", pk));
    for (i, (pk_value, _)) in rows.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.bind(pk_value.clone());
    }
    w.push(")");
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::fields::{char_field, foreign_key, integer_field};
    use crate::model::ModelBuilder;

    struct Fixture {
        registry: Arc<Registry>,
        user: Arc<ModelClass>,
        message: Arc<ModelClass>,
    }

    fn fixture() -> Fixture {
        let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
        let user = ModelBuilder::new("User")
            .registry(&registry)
            .field("name", char_field(50))
            .field("age", integer_field().null())
            .build()
            .unwrap();
        let message = ModelBuilder::new("Message")
            .registry(&registry)
            .field("sender", foreign_key(&user).related_name("sent"))
            .field("receiver", foreign_key(&user).related_name("received"))
            .field("body", char_field(200))
            .build()
            .unwrap();
        Fixture {
            registry,
            user,
            message,
        }
    }

    fn compiler<'a>(
        f: &'a Fixture,
        model: &Arc<ModelClass>,
        dialect: DatabaseType,
    ) -> Compiler<'a> {
        Compiler::new(&f.registry, model.clone(), None, dialect).unwrap()
    }

    #[test]
    fn test_simple_select() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::all(crate::kwargs!(name = "Adam")));
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).select(&state).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"users\".\"id\" AS \"id\", \"users\".\"name\" AS \"name\", \"users\".\"age\" AS \"age\" \
             FROM \"users\" AS \"users\" WHERE \"users\".\"name\" = ?"
        );
        assert_eq!(stmt.params, vec![DataValue::from("Adam")]);
    }

    #[test]
    fn test_postgres_placeholders_follow_order() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::all(crate::kwargs!(name = "Adam", age__gte = 18)));
        let stmt = compiler(&f, &f.user, DatabaseType::PostgreSQL)
            .update(&state, &[("age".to_string(), DataValue::Int(20))])
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"age\" = $1 WHERE (\"users\".\"name\" = $2 AND \"users\".\"age\" >= $3)"
        );
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_contains_is_escaped() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::new("name__contains", "100%-Cotton"));
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).count(&state).unwrap();
        assert!(stmt.sql.starts_with("SELECT COUNT(*) FROM (SELECT"));
        assert!(stmt.sql.contains("\"users\".\"name\" LIKE ? ESCAPE '\\'"));
        assert_eq!(stmt.params, vec![DataValue::from("%100\\%-Cotton%")]);

        let mut state = QueryState::default();
        state.filters.push(Q::new("name__icontains", "a_b"));
        let stmt = compiler(&f, &f.user, DatabaseType::PostgreSQL).exists(&state).unwrap();
        assert!(stmt.sql.contains("\"users\".\"name\" ILIKE $1 ESCAPE '\\'"));
    }

    #[test]
    fn test_null_and_empty_in() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::new("age", DataValue::Null));
        state.filters.push(Q::new("id__in", Vec::<i64>::new()));
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).delete(&state).unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"users\" WHERE (\"users\".\"age\" IS NULL AND 1 = 0)"
        );
    }

    #[test]
    fn test_exclude_negates_only_its_clause() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::all(crate::kwargs!(age = 3)));
        state.filters.push(!Q::all(crate::kwargs!(name = "Eve", age__lt = 1)));
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).exists(&state).unwrap();
        assert!(stmt.sql.contains(
            "WHERE (\"users\".\"age\" = ? AND NOT ((\"users\".\"name\" = ? AND \"users\".\"age\" < ?)))"
        ));
    }

    #[test]
    fn test_or_group() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::all(crate::kwargs!(age = 3)));
        state.or_filters.push(Q::new("name", "a"));
        state.or_filters.push(Q::new("name", "b"));
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).exists(&state).unwrap();
        assert!(stmt
            .sql
            .contains("WHERE (\"users\".\"age\" = ? AND (\"users\".\"name\" = ? OR \"users\".\"name\" = ?))"));
    }

    #[test]
    fn test_reverse_join_uses_declared_foreign_key() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::new("received__body", "hi"));
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).select(&state).unwrap();
        assert!(stmt.sql.contains(
            "LEFT JOIN \"messages\" AS \"received\" ON \"received\".\"receiver\" = \"users\".\"id\""
        ));
        assert!(!stmt.sql.contains("\"sender\""));
        // 一对多路径上的过滤自动去重
        assert!(stmt.sql.starts_with("SELECT DISTINCT "));
    }

    #[test]
    fn test_select_related_columns() {
        let f = fixture();
        let mut state = QueryState::default();
        state.select_related.push("sender".to_string());
        state.order_by.push(OrderBy::parse("-sender__name"));
        let stmt = compiler(&f, &f.message, DatabaseType::SQLite).select(&state).unwrap();
        assert!(stmt.sql.contains("\"sender\".\"name\" AS \"sender__name\""));
        assert!(stmt.sql.contains("LEFT JOIN \"users\" AS \"sender\" ON \"sender\".\"id\" = \"messages\".\"sender\""));
        assert!(stmt.sql.ends_with("ORDER BY \"sender\".\"name\" DESC"));

        let mut state = QueryState::default();
        state.select_related.push("sent".to_string());
        assert!(compiler(&f, &f.user, DatabaseType::SQLite).select(&state).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::new("nickname", "x"));
        assert!(compiler(&f, &f.user, DatabaseType::SQLite).select(&state).is_err());
    }

    #[test]
    fn test_update_with_join_uses_subquery() {
        let f = fixture();
        let mut state = QueryState::default();
        state.filters.push(Q::new("sender__name", "Adam"));
        let stmt = compiler(&f, &f.message, DatabaseType::SQLite)
            .update(&state, &[("body".to_string(), DataValue::from("x"))])
            .unwrap();
        assert!(stmt.sql.starts_with(
            "UPDATE \"messages\" SET \"body\" = ? WHERE \"id\" IN (SELECT \"id\" FROM (SELECT \"messages\".\"id\" AS \"id\""
        ));
    }

    #[test]
    fn test_bulk_statements() {
        let mut a = Row::new();
        a.insert("name".to_string(), DataValue::from("a"));
        let mut b = Row::new();
        b.insert("name".to_string(), DataValue::from("b"));
        b.insert("age".to_string(), DataValue::Int(3));
        let columns = vec!["name".to_string(), "age".to_string()];
        let stmt = bulk_insert_statement("\"users\"", "id", &columns, &[a.clone(), b.clone()], DatabaseType::PostgreSQL);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, DEFAULT), ($2, $3) RETURNING \"id\""
        );

        let stmt = bulk_update_statement(
            "\"users\"",
            "id",
            &["name".to_string()],
            &[(DataValue::Int(1), a), (DataValue::Int(2), b)],
            DatabaseType::SQLite,
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"name\" = CASE \"id\" WHEN ? THEN ? WHEN ? THEN ? ELSE \"name\" END WHERE \"id\" IN (?, ?)"
        );
        assert_eq!(stmt.params.len(), 6);
    }

    #[test]
    fn test_offset_without_limit_on_sqlite() {
        let f = fixture();
        let mut state = QueryState::default();
        state.offset = Some(5);
        let stmt = compiler(&f, &f.user, DatabaseType::SQLite).select(&state).unwrap();
        assert!(stmt.sql.ends_with(" LIMIT -1 OFFSET 5"));
    }
}
