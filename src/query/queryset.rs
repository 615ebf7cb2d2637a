//! 查询集
//!
//! 链式方法都返回新的查询集，原查询集保持不变；终结操作编译 SQL 并交给数据库执行

use super::compiler::{
    bulk_insert_statement, bulk_update_statement, insert_statement, Compiler, QueryState,
};
use super::expression::Q;
use super::prefetch::{check_prefetches, prefetch_related_objects, Prefetch};
use crate::database::{Database, Statement};
use crate::debug_log;
use crate::error::OrmResult;
use crate::fields::ValidationMode;
use crate::model::{ModelClass, ModelInstance};
use crate::registry::Registry;
use crate::table::ddl::qualified_name;
use crate::tenancy::TenantContext;
use crate::types::{DataValue, OrderBy, Row};
use std::sync::Arc;

/// 查询集
#[derive(Clone)]
pub struct QuerySet {
    model: Arc<ModelClass>,
    state: QueryState,
    prefetch: Vec<Prefetch>,
    /// 显式指定的 schema
    schema: Option<String>,
    /// 附加数据库别名
    database: Option<String>,
    /// 显式传入的租户上下文，优先于注册表上的上下文
    context: Option<TenantContext>,
}

fn collect_kwargs<I, K, V>(kwargs: I) -> Vec<(String, DataValue)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<DataValue>,
{
    kwargs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn collect_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().map(|s| s.as_ref().to_string()).collect()
}

impl QuerySet {
    pub fn new(model: Arc<ModelClass>) -> Self {
        Self {
            model,
            state: QueryState::default(),
            prefetch: Vec::new(),
            schema: None,
            database: None,
            context: None,
        }
    }

    pub fn model(&self) -> &Arc<ModelClass> {
        &self.model
    }

    fn with(&self, f: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        f(&mut next);
        next
    }

    /// 指定 schema，优先于租户上下文
    pub fn using_schema(&self, schema: &str) -> Self {
        self.with(|qs| qs.schema = Some(schema.to_string()))
    }

    /// 使用附加数据库
    pub fn using(&self, alias: &str) -> Self {
        self.with(|qs| qs.database = Some(alias.to_string()))
    }

    /// 使用显式传入的租户上下文
    pub fn with_context(&self, context: &TenantContext) -> Self {
        self.with(|qs| qs.context = Some(context.clone()))
    }

    pub fn filter<I, K, V>(&self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        self.filter_q(Q::all(collect_kwargs(kwargs)))
    }

    /// 排除：只对本次给出的条件整体取反
    pub fn exclude<I, K, V>(&self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        self.exclude_q(Q::all(collect_kwargs(kwargs)))
    }

    pub fn filter_q(&self, q: Q) -> Self {
        if q.is_empty() {
            return self.clone();
        }
        self.with(|qs| qs.state.filters.push(q))
    }

    pub fn exclude_q(&self, q: Q) -> Self {
        if q.is_empty() {
            return self.clone();
        }
        self.with(|qs| qs.state.filters.push(!q))
    }

    /// 同 `filter`
    pub fn and_<I, K, V>(&self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        self.filter(kwargs)
    }

    /// 任一条件成立，多次调用累积到同一个析取组
    pub fn or_<I, K, V>(&self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let lookups: Vec<Q> = collect_kwargs(kwargs)
            .into_iter()
            .map(|(k, v)| Q::Lookup(k, v))
            .collect();
        self.with(|qs| qs.state.or_filters.extend(lookups))
    }

    /// 排序，`-field` 为降序
    pub fn order_by<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order: Vec<OrderBy> = fields.into_iter().map(|f| OrderBy::parse(f.as_ref())).collect();
        self.with(|qs| qs.state.order_by = order)
    }

    /// 反转排序，未排序时按主键降序
    pub fn reverse(&self) -> Self {
        self.with(|qs| {
            if qs.state.order_by.is_empty() {
                qs.state.order_by.push(OrderBy::parse("-pk"));
            } else {
                for order in qs.state.order_by.iter_mut() {
                    order.direction = order.direction.reversed();
                }
            }
        })
    }

    pub fn limit(&self, limit: u64) -> Self {
        self.with(|qs| qs.state.limit = Some(limit))
    }

    pub fn offset(&self, offset: u64) -> Self {
        self.with(|qs| qs.state.offset = Some(offset))
    }

    /// 通过 JOIN 一次取回的正向关系
    pub fn select_related<I, S>(&self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = collect_names(paths);
        self.with(|qs| {
            for path in paths {
                if !qs.state.select_related.contains(&path) {
                    qs.state.select_related.push(path);
                }
            }
        })
    }

    /// 结果返回后以额外查询取回的关系
    pub fn prefetch_related<I, P>(&self, prefetches: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Prefetch>,
    {
        let prefetches: Vec<Prefetch> = prefetches.into_iter().map(Into::into).collect();
        self.with(|qs| qs.prefetch.extend(prefetches))
    }

    /// 去重，给出列时按列去重
    pub fn distinct<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = collect_names(fields);
        self.with(|qs| qs.state.distinct = Some(fields))
    }

    pub fn group_by<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = collect_names(fields);
        self.with(|qs| qs.state.group_by = fields)
    }

    /// 只加载给出的字段（主键总是加载）
    pub fn only<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = collect_names(fields);
        self.with(|qs| qs.state.only = Some(fields))
    }

    /// 不加载给出的字段
    pub fn defer<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = collect_names(fields);
        self.with(|qs| qs.state.defer.extend(fields))
    }

    /// 不加载敏感字段，结果实例属于代理模型
    pub fn exclude_secrets(&self) -> Self {
        self.with(|qs| qs.state.exclude_secrets = true)
    }

    /// 实际生效的 schema：显式指定优先，租户模型其次取上下文
    pub fn current_schema(&self) -> Option<String> {
        let registry = self.model.registry().ok();
        let raw = match &self.schema {
            Some(schema) => Some(schema.clone()),
            None if self.model.meta().is_tenant => match (&self.context, &registry) {
                (Some(context), _) => context.current(),
                (None, Some(registry)) => registry.context().current(),
                (None, None) => None,
            },
            None => None,
        };
        match registry {
            Some(registry) => registry.normalize_schema(raw.as_deref()),
            None => raw,
        }
    }

    pub fn database_alias(&self) -> Option<String> {
        self.database.clone()
    }

    /// 关联模型的查询集继承本查询集的数据库与 schema
    pub(crate) fn scoped_for(&self, other: &QuerySet) -> QuerySet {
        let mut scoped = other.clone();
        if scoped.database.is_none() {
            scoped.database = self.database.clone();
        }
        if scoped.context.is_none() {
            scoped.context = self.context.clone();
        }
        if scoped.schema.is_none()
            && (scoped.model.meta().is_tenant || !self.model.meta().is_tenant)
        {
            scoped.schema = self.current_schema();
        }
        scoped
    }

    fn env(&self) -> OrmResult<(Arc<Registry>, Arc<dyn Database>, Option<String>)> {
        let registry = self.model.registry()?;
        let db = registry.database_for(self.database.as_deref())?;
        let schema = self.current_schema();
        Ok((registry, db, schema))
    }

    fn stamp(&self, stmt: &Statement) {
        debug_log!("{} 编译SQL: {}", self.model.name(), stmt);
        self.model.set_last_raw_query(&stmt.sql);
    }

    fn table_sql(&self, registry: &Registry, schema: Option<&str>) -> OrmResult<String> {
        let table = registry.table_for(&self.model, schema)?;
        qualified_name(&table)
    }

    /// 当前查询链对应的 SELECT 语句
    pub fn sql(&self) -> OrmResult<Statement> {
        let (registry, db, schema) = self.env()?;
        Compiler::new(&registry, self.model.clone(), schema, db.dialect())?.select(&self.state)
    }

    /// 执行查询并构建实例（不做预取）
    pub(crate) async fn fetch_instances(&self) -> OrmResult<Vec<ModelInstance>> {
        let (registry, db, schema) = self.env()?;
        let stmt = Compiler::new(&registry, self.model.clone(), schema.clone(), db.dialect())?
            .select(&self.state)?;
        self.stamp(&stmt);
        let rows = db.fetch_all(&stmt).await?;
        let class = if self.state.exclude_secrets {
            self.model.proxy()
        } else {
            self.model.clone()
        };
        rows.iter()
            .map(|row| {
                let mut instance =
                    ModelInstance::from_query_result(&class, row, &self.state.select_related, "")?;
                instance.set_origin(schema.clone(), self.database.clone());
                Ok(instance)
            })
            .collect()
    }

    async fn fetch_with_prefetch(&self) -> OrmResult<Vec<ModelInstance>> {
        check_prefetches(&self.model, &self.prefetch)?;
        let mut instances = self.fetch_instances().await?;
        if !self.prefetch.is_empty() {
            prefetch_related_objects(self, &mut instances, &self.prefetch).await?;
        }
        Ok(instances)
    }

    /// 全部结果
    pub async fn all(&self) -> OrmResult<Vec<ModelInstance>> {
        self.fetch_with_prefetch().await
    }

    /// 等价于 `filter(kwargs).all()`
    pub async fn all_by<I, K, V>(&self, kwargs: I) -> OrmResult<Vec<ModelInstance>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        self.filter(kwargs).all().await
    }

    /// 恰好一行；最多取两行判断数量
    pub async fn get<I, K, V>(&self, kwargs: I) -> OrmResult<ModelInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        self.get_or_none(kwargs).await?.ok_or_else(|| {
            crate::orm_error!(not_found, self.model.name(), "没有匹配的行")
        })
    }

    /// 零行时返回 None，多行仍然报错
    pub async fn get_or_none<I, K, V>(&self, kwargs: I) -> OrmResult<Option<ModelInstance>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let mut instances = self.filter(kwargs).limit(2).fetch_with_prefetch().await?;
        if instances.len() > 1 {
            return Err(crate::orm_error!(
                multiple,
                self.model.name(),
                "匹配到多行"
            ));
        }
        Ok(instances.pop())
    }

    /// 按主键升序（或当前排序）的第一行
    pub async fn first(&self) -> OrmResult<Option<ModelInstance>> {
        let qs = if self.state.order_by.is_empty() {
            self.order_by(["pk"])
        } else {
            self.clone()
        };
        Ok(qs.limit(1).fetch_with_prefetch().await?.into_iter().next())
    }

    /// 按主键降序（或当前排序反转）的第一行
    pub async fn last(&self) -> OrmResult<Option<ModelInstance>> {
        Ok(self
            .reverse()
            .limit(1)
            .fetch_with_prefetch()
            .await?
            .into_iter()
            .next())
    }

    pub async fn exists(&self) -> OrmResult<bool> {
        let (registry, db, schema) = self.env()?;
        let stmt = Compiler::new(&registry, self.model.clone(), schema, db.dialect())?
            .exists(&self.state)?;
        self.stamp(&stmt);
        let value = db.fetch_val(&stmt).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn count(&self) -> OrmResult<u64> {
        let (registry, db, schema) = self.env()?;
        let stmt = Compiler::new(&registry, self.model.clone(), schema, db.dialect())?
            .count(&self.state)?;
        self.stamp(&stmt);
        let value = db.fetch_val(&stmt).await?;
        Ok(value.as_i64().unwrap_or(0).max(0) as u64)
    }

    /// 校验并插入一行，返回已保存的实例
    pub async fn create<I, K, V>(&self, kwargs: I) -> OrmResult<ModelInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let pk_name = self.model.pk_name()?.to_string();
        let mut instance = ModelInstance::new(self.model.clone());
        for (key, value) in collect_kwargs(kwargs) {
            let key = if key == "pk" { pk_name.clone() } else { key };
            instance.set(&key, value);
        }
        instance.save_using(self).await?;
        Ok(instance)
    }

    /// 插入已校验的一行，返回主键
    pub(crate) async fn insert_row(&self, row: Row) -> OrmResult<DataValue> {
        let (registry, db, schema) = self.env()?;
        let table_sql = self.table_sql(&registry, schema.as_deref())?;
        let values: Vec<(String, DataValue)> = self
            .model
            .column_fields()
            .filter_map(|f| row.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect();
        let pk_field = self.model.pk_field()?;
        let stmt = insert_statement(&table_sql, &pk_field.name, &values, db.dialect());
        self.stamp(&stmt);
        let pk = db.fetch_val(&stmt).await?;
        Ok(pk_field.from_db_value(pk))
    }

    /// 逐行校验后以一条多行 INSERT 插入
    pub async fn bulk_create<I, R, K, V>(&self, rows: I) -> OrmResult<Vec<ModelInstance>>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let (registry, db, schema) = self.env()?;
        let validator = registry.validator();
        let mut cleaned_rows = Vec::new();
        for row in rows {
            let mut input: Row = collect_kwargs(row).into_iter().collect();
            input.retain(|name, value| {
                !(value.is_null()
                    && self.model.field(name).map(|f| f.is_generated()).unwrap_or(false))
            });
            cleaned_rows.push(validator.validate(self.model.fields(), &input, ValidationMode::Create)?);
        }
        if cleaned_rows.is_empty() {
            return Ok(Vec::new());
        }

        let columns: Vec<String> = self
            .model
            .column_fields()
            .filter(|f| cleaned_rows.iter().any(|r| r.contains_key(&f.name)))
            .map(|f| f.name.clone())
            .collect();
        let table_sql = self.table_sql(&registry, schema.as_deref())?;
        let pk_field = self.model.pk_field()?;
        let stmt = bulk_insert_statement(&table_sql, &pk_field.name, &columns, &cleaned_rows, db.dialect());
        self.stamp(&stmt);
        let returned = db.fetch_all(&stmt).await?;

        let mut instances = Vec::with_capacity(cleaned_rows.len());
        for (values, pk_row) in cleaned_rows.into_iter().zip(returned) {
            let mut instance = ModelInstance::new(self.model.clone());
            for (name, value) in values {
                instance.set(&name, value);
            }
            if let Some(pk) = pk_row.get(&pk_field.name) {
                instance.set(&pk_field.name, pk_field.from_db_value(pk.clone()));
            }
            instance.set_origin(schema.clone(), self.database.clone());
            instance.mark_saved();
            instances.push(instance);
        }
        debug_log!("{} 批量插入 {} 行", self.model.name(), instances.len());
        Ok(instances)
    }

    /// 以一条语句按主键更新多个实例的指定字段
    pub async fn bulk_update(&self, objs: &[ModelInstance], fields: &[&str]) -> OrmResult<u64> {
        if objs.is_empty() || fields.is_empty() {
            return Ok(0);
        }
        let (registry, db, schema) = self.env()?;
        let pk_name = self.model.pk_name()?.to_string();
        let mut columns: Vec<String> = Vec::new();
        for name in fields {
            match self.model.field(name) {
                Some(f) if f.is_column() && f.name != pk_name => columns.push(f.name.clone()),
                _ => {
                    return Err(crate::orm_error!(
                        query,
                        format!("bulk_update 的字段 '{}' 不是 {} 的可更新列", name, self.model.name())
                    ));
                }
            }
        }
        for field in self.model.column_fields().filter(|f| f.is_auto_now()) {
            if !columns.contains(&field.name) {
                columns.push(field.name.clone());
            }
        }

        let validator = registry.validator();
        let mut rows = Vec::with_capacity(objs.len());
        for obj in objs {
            let pk = obj.pk();
            if pk.is_null() {
                return Err(crate::orm_error!(
                    query,
                    format!("{} 实例没有主键值，不能批量更新", self.model.name())
                ));
            }
            let input: Row = fields
                .iter()
                .map(|name| (name.to_string(), obj.value(name)))
                .collect();
            let mut cleaned = validator.validate(self.model.fields(), &input, ValidationMode::Partial)?;
            for field in self.model.column_fields().filter(|f| f.is_auto_now()) {
                if !cleaned.contains_key(&field.name) {
                    if let Some(now) = field.default_value() {
                        cleaned.insert(field.name.clone(), now);
                    }
                }
            }
            rows.push((pk, cleaned));
        }

        let table_sql = self.table_sql(&registry, schema.as_deref())?;
        let stmt = bulk_update_statement(&table_sql, &pk_name, &columns, &rows, db.dialect());
        self.stamp(&stmt);
        Ok(db.execute(&stmt).await?.rows_affected)
    }

    /// 校验后更新所有匹配行，返回受影响行数
    pub async fn update<I, K, V>(&self, kwargs: I) -> OrmResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let registry = self.model.registry()?;
        let input: Row = collect_kwargs(kwargs).into_iter().collect();
        let mut cleaned = registry
            .validator()
            .validate(self.model.fields(), &input, ValidationMode::Partial)?;
        for field in self.model.column_fields().filter(|f| f.is_auto_now()) {
            if !cleaned.contains_key(&field.name) {
                if let Some(now) = field.default_value() {
                    cleaned.insert(field.name.clone(), now);
                }
            }
        }
        self.update_rows(cleaned).await
    }

    /// 以已校验的值更新所有匹配行
    pub(crate) async fn update_rows(&self, values: Row) -> OrmResult<u64> {
        let (registry, db, schema) = self.env()?;
        let ordered: Vec<(String, DataValue)> = self
            .model
            .column_fields()
            .filter_map(|f| values.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect();
        let stmt = Compiler::new(&registry, self.model.clone(), schema, db.dialect())?
            .update(&self.state, &ordered)?;
        self.stamp(&stmt);
        Ok(db.execute(&stmt).await?.rows_affected)
    }

    /// 删除所有匹配行，返回受影响行数
    pub async fn delete(&self) -> OrmResult<u64> {
        let (registry, db, schema) = self.env()?;
        let stmt = Compiler::new(&registry, self.model.clone(), schema, db.dialect())?
            .delete(&self.state)?;
        self.stamp(&stmt);
        Ok(db.execute(&stmt).await?.rows_affected)
    }

    /// 创建时使用的字段：查找参数中的普通字段合并 defaults
    fn creation_values(
        kwargs: &[(String, DataValue)],
        defaults: &[(String, DataValue)],
    ) -> Vec<(String, DataValue)> {
        let mut values: Vec<(String, DataValue)> = kwargs
            .iter()
            .filter(|(k, _)| !k.contains("__"))
            .cloned()
            .collect();
        for (key, value) in defaults {
            values.retain(|(k, _)| k != key);
            values.push((key.clone(), value.clone()));
        }
        values
    }

    /// 查找，不存在时以 kwargs + defaults 创建；返回 (实例, 是否新建)
    pub async fn get_or_create<I, K, V, D, DK, DV>(
        &self,
        defaults: D,
        kwargs: I,
    ) -> OrmResult<(ModelInstance, bool)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
        D: IntoIterator<Item = (DK, DV)>,
        DK: Into<String>,
        DV: Into<DataValue>,
    {
        let kwargs = collect_kwargs(kwargs);
        let defaults = collect_kwargs(defaults);
        if let Some(found) = self.get_or_none(kwargs.clone()).await? {
            return Ok((found, false));
        }
        let created = self.create(Self::creation_values(&kwargs, &defaults)).await?;
        Ok((created, true))
    }

    /// 查找，存在时以 defaults 更新，否则创建；返回 (实例, 是否新建)
    pub async fn update_or_create<I, K, V, D, DK, DV>(
        &self,
        defaults: D,
        kwargs: I,
    ) -> OrmResult<(ModelInstance, bool)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
        D: IntoIterator<Item = (DK, DV)>,
        DK: Into<String>,
        DV: Into<DataValue>,
    {
        let kwargs = collect_kwargs(kwargs);
        let defaults = collect_kwargs(defaults);
        match self.get_or_none(kwargs.clone()).await? {
            Some(mut found) => {
                if !defaults.is_empty() {
                    found.update(defaults).await?;
                }
                Ok((found, false))
            }
            None => {
                let created = self.create(Self::creation_values(&kwargs, &defaults)).await?;
                Ok((created, true))
            }
        }
    }

    /// 实例的主键是否在当前结果中
    pub async fn contains(&self, instance: &ModelInstance) -> OrmResult<bool> {
        let pk = instance.pk();
        if pk.is_null() {
            return Ok(false);
        }
        self.filter([("pk", pk)]).exists().await
    }

    /// 以 `字段路径 -> 值` 映射返回结果，未给出字段时返回全部列
    pub async fn values<I, S>(&self, fields: I) -> OrmResult<Vec<Row>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = collect_names(fields);
        let (registry, db, schema) = self.env()?;
        let (stmt, described) = Compiler::new(&registry, self.model.clone(), schema, db.dialect())?
            .values(&self.state, &keys)?;
        self.stamp(&stmt);
        let rows = db.fetch_all(&stmt).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                described
                    .iter()
                    .map(|(key, field)| {
                        let raw = row.remove(key).unwrap_or(DataValue::Null);
                        let value = match field {
                            Some(field) => field.from_db_value(raw),
                            None => raw,
                        };
                        (key.clone(), value)
                    })
                    .collect()
            })
            .collect())
    }

    /// 以元组返回结果；`flat` 时只允许一个字段并直接返回其值
    pub async fn values_list<I, S>(&self, fields: I, flat: bool) -> OrmResult<Vec<DataValue>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = collect_names(fields);
        if keys.is_empty() {
            keys = self.model.column_fields().map(|f| f.name.clone()).collect();
        }
        if flat && keys.len() != 1 {
            return Err(crate::orm_error!(query, "flat 模式只能指定一个字段"));
        }
        let rows = self.values(keys.clone()).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                let mut items: Vec<DataValue> = keys
                    .iter()
                    .map(|k| row.remove(k).unwrap_or(DataValue::Null))
                    .collect();
                if flat {
                    items.pop().unwrap_or(DataValue::Null)
                } else {
                    DataValue::Array(items)
                }
            })
            .collect())
    }

    async fn aggregate(&self, function: &str, field: &str) -> OrmResult<DataValue> {
        let (registry, db, schema) = self.env()?;
        let stmt = Compiler::new(&registry, self.model.clone(), schema, db.dialect())?
            .aggregate(&self.state, function, field)?;
        self.stamp(&stmt);
        let value = db.fetch_val(&stmt).await?;
        // PostgreSQL 的 NUMERIC 以文本解码
        Ok(match value {
            DataValue::String(s) => s.parse::<f64>().map(DataValue::Float).unwrap_or(DataValue::String(s)),
            other => other,
        })
    }

    pub async fn max(&self, field: &str) -> OrmResult<DataValue> {
        self.aggregate("MAX", field).await
    }

    pub async fn min(&self, field: &str) -> OrmResult<DataValue> {
        self.aggregate("MIN", field).await
    }

    pub async fn sum(&self, field: &str) -> OrmResult<DataValue> {
        self.aggregate("SUM", field).await
    }

    pub async fn avg(&self, field: &str) -> OrmResult<DataValue> {
        self.aggregate("AVG", field).await
    }
}

impl std::fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.model.name())
            .field("state", &self.state)
            .field("prefetch", &self.prefetch.iter().map(|p| &p.relation).collect::<Vec<_>>())
            .field("schema", &self.schema)
            .field("database", &self.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::fields::char_field;
    use crate::model::ModelBuilder;
    use crate::types::SortDirection;

    fn user() -> (Arc<Registry>, Arc<ModelClass>) {
        let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
        let user = ModelBuilder::new("User")
            .registry(&registry)
            .field("name", char_field(50))
            .build()
            .unwrap();
        (registry, user)
    }

    #[test]
    fn test_chaining_does_not_mutate_base() {
        let (_registry, user) = user();
        let base = user.query();
        let first = base.filter(crate::kwargs!(name = "a"));
        let second = base.filter(crate::kwargs!(name = "b"));
        assert!(base.state.filters.is_empty());
        assert_eq!(first.state.filters.len(), 1);
        assert_eq!(second.state.filters, vec![Q::all(crate::kwargs!(name = "b"))]);
    }

    #[test]
    fn test_reverse_defaults_to_pk_desc() {
        let (_registry, user) = user();
        let reversed = user.query().reverse();
        assert_eq!(reversed.state.order_by, vec![OrderBy::parse("-pk")]);
        let twice = user.query().order_by(["name"]).reverse();
        assert_eq!(twice.state.order_by[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_explicit_schema_beats_context() {
        let (_registry, user) = user();
        let context = TenantContext::new();
        context.activate("tenant_b");
        let qs = user.query().with_context(&context).using_schema("tenant_a");
        assert_eq!(qs.current_schema().as_deref(), Some("tenant_a"));
        // 非租户模型不受上下文影响
        assert_eq!(user.query().with_context(&context).current_schema(), None);
    }

    #[test]
    fn test_sql_property() {
        let (_registry, user) = user();
        let stmt = user.query().filter(crate::kwargs!(name = "Adam")).sql().unwrap();
        assert!(stmt.sql.ends_with("WHERE \"users\".\"name\" = ?"));
    }
}
