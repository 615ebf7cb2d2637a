//! 模型实例
//!
//! 行数据的持有者，负责单行 CRUD、信号派发与关系访问

use super::class::ModelClass;
use super::relation::{resolve_hop, Hop, ManyToManyManager, RelatedKind, RelationCell};
use super::signals::SignalContext;
use crate::error::{OrmError, OrmResult};
use crate::fields::ValidationMode;
use crate::query::QuerySet;
use crate::types::{DataValue, Row};
use crate::debug_log;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// 模型实例
#[derive(Clone)]
pub struct ModelInstance {
    class: Arc<ModelClass>,
    values: Row,
    relations: HashMap<String, RelationCell>,
    prefetched: HashMap<String, Vec<ModelInstance>>,
    schema: Option<String>,
    database: Option<String>,
    persisted: bool,
}

impl ModelInstance {
    /// 空实例
    pub fn new(class: Arc<ModelClass>) -> Self {
        Self {
            class,
            values: Row::new(),
            relations: HashMap::new(),
            prefetched: HashMap::new(),
            schema: None,
            database: None,
            persisted: false,
        }
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    pub fn values(&self) -> &Row {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.values.get(name)
    }

    /// 取值，缺失时为 Null
    pub fn value(&self, name: &str) -> DataValue {
        self.values.get(name).cloned().unwrap_or(DataValue::Null)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(|v| v.as_i64())
    }

    /// 设置字段值，外键改变时关系单元回到未加载状态
    pub fn set(&mut self, name: &str, value: impl Into<DataValue>) {
        if self.relations.contains_key(name) {
            self.relations.insert(name.to_string(), RelationCell::Unloaded);
        }
        self.values.insert(name.to_string(), value.into());
    }

    /// 以关联实例设置外键
    pub fn set_related(&mut self, name: &str, related: &ModelInstance) {
        self.values.insert(name.to_string(), related.pk());
        self.relations.insert(
            name.to_string(),
            RelationCell::Loaded(Some(Box::new(related.clone()))),
        );
    }

    /// 主键值，未设置时为 Null
    pub fn pk(&self) -> DataValue {
        match self.class.pk_name() {
            Ok(pk) => self.value(pk),
            Err(_) => DataValue::Null,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_saved(&mut self) {
        self.persisted = true;
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub(crate) fn set_origin(&mut self, schema: Option<String>, database: Option<String>) {
        self.schema = schema;
        self.database = database;
    }

    /// 指定实例读写的 schema
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// 预取结果
    pub fn prefetched(&self, name: &str) -> Option<&[ModelInstance]> {
        self.prefetched.get(name).map(|v| v.as_slice())
    }

    pub(crate) fn set_prefetched(&mut self, name: &str, items: Vec<ModelInstance>) {
        self.prefetched.insert(name.to_string(), items);
    }

    pub(crate) fn set_relation(&mut self, name: &str, cell: RelationCell) {
        self.relations.insert(name.to_string(), cell);
    }

    /// 已加载的关联实例（不触发查询）
    pub fn related_cached(&self, name: &str) -> Option<&ModelInstance> {
        match self.relations.get(name) {
            Some(RelationCell::Loaded(Some(instance))) => Some(instance),
            _ => None,
        }
    }

    pub fn relation_cell(&self, name: &str) -> Option<&RelationCell> {
        self.relations.get(name)
    }

    /// 本实例所在位置的查询集
    fn base_queryset(&self) -> QuerySet {
        self.scoped(self.class.query(), true)
    }

    /// 共享模型不继承实例的 schema
    fn scoped(&self, qs: QuerySet, same_model: bool) -> QuerySet {
        let qs = match &self.schema {
            Some(schema) if same_model || qs.model().meta().is_tenant => qs.using_schema(schema),
            _ => qs,
        };
        match &self.database {
            Some(alias) => qs.using(alias),
            None => qs,
        }
    }

    fn pk_queryset(&self) -> OrmResult<QuerySet> {
        let pk = self.pk();
        if pk.is_null() {
            return Err(crate::orm_error!(
                query,
                format!("{} 实例没有主键值", self.class.name())
            ));
        }
        Ok(self.base_queryset().filter([("pk", pk)]))
    }

    fn signal_context(&self, changes: Option<Row>) -> SignalContext {
        SignalContext {
            model: self.class.clone(),
            instance: self.clone(),
            changes,
        }
    }

    /// 保存：未持久化时插入，否则更新全部字段
    pub async fn save(&mut self) -> OrmResult<()> {
        let qs = self.base_queryset();
        self.save_using(&qs).await
    }

    pub(crate) async fn save_using(&mut self, qs: &QuerySet) -> OrmResult<()> {
        if self.persisted {
            let pk_name = self.class.pk_name()?.to_string();
            let changes: Vec<(String, DataValue)> = self
                .class
                .column_fields()
                .filter(|f| f.name != pk_name && !f.read_only)
                .filter_map(|f| self.values.get(&f.name).map(|v| (f.name.clone(), v.clone())))
                .collect();
            return self.update(changes).await;
        }

        self.class
            .signals
            .pre_save
            .send(self.signal_context(None))
            .await?;

        let registry = self.class.registry()?;
        let mut input = self.values.clone();
        input.retain(|name, value| {
            !(value.is_null()
                && self
                    .class
                    .field(name)
                    .map(|f| f.is_generated())
                    .unwrap_or(false))
        });
        let cleaned = registry
            .validator()
            .validate(self.class.fields(), &input, ValidationMode::Create)?;

        let pk = qs.insert_row(cleaned.clone()).await?;
        self.values = cleaned;
        self.values.insert(self.class.pk_name()?.to_string(), pk);
        self.schema = qs.current_schema();
        self.database = qs.database_alias();
        self.persisted = true;
        debug_log!("{} 实例已保存: {:?}", self.class.name(), self.pk());

        self.class
            .signals
            .post_save
            .send(self.signal_context(None))
            .await?;
        Ok(())
    }

    /// 部分更新
    pub async fn update<I, K, V>(&mut self, kwargs: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        if !self.persisted {
            return Err(crate::orm_error!(
                query,
                format!("{} 实例尚未保存，不能更新", self.class.name())
            ));
        }
        let changes: Row = kwargs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let registry = self.class.registry()?;
        let mut cleaned = registry
            .validator()
            .validate(self.class.fields(), &changes, ValidationMode::Partial)?;
        for field in self.class.column_fields().filter(|f| f.is_auto_now()) {
            if !cleaned.contains_key(&field.name) {
                if let Some(now) = field.default_value() {
                    cleaned.insert(field.name.clone(), now);
                }
            }
        }
        if cleaned.is_empty() {
            return Ok(());
        }

        let qs = self.pk_queryset()?;
        self.class
            .signals
            .pre_update
            .send(self.signal_context(Some(cleaned.clone())))
            .await?;

        qs.update_rows(cleaned.clone()).await?;
        for (name, value) in cleaned.iter() {
            self.set(name, value.clone());
        }

        self.class
            .signals
            .post_update
            .send(self.signal_context(Some(cleaned)))
            .await?;
        Ok(())
    }

    /// 删除对应的行
    pub async fn delete(&mut self) -> OrmResult<u64> {
        let qs = self.pk_queryset()?;
        self.class
            .signals
            .pre_delete
            .send(self.signal_context(None))
            .await?;
        let deleted = qs.delete().await?;
        self.persisted = false;
        self.class
            .signals
            .post_delete
            .send(self.signal_context(None))
            .await?;
        Ok(deleted)
    }

    /// 从数据库重新加载
    pub async fn load(&mut self) -> OrmResult<()> {
        let fresh = self
            .pk_queryset()?
            .get_or_none(crate::kwargs!())
            .await?
            .ok_or_else(|| {
                crate::orm_error!(
                    not_found,
                    self.class.name(),
                    format!("主键 {:?} 对应的行不存在", self.pk())
                )
            })?;
        self.values = fresh.values;
        self.relations.clear();
        self.persisted = true;
        Ok(())
    }

    /// 访问正向外键或反向一对一关系，未加载时触发查询
    pub async fn related(&mut self, name: &str) -> OrmResult<Option<ModelInstance>> {
        if let Some(RelationCell::Loaded(loaded)) = self.relations.get(name) {
            return Ok(loaded.as_deref().cloned());
        }

        let registry = self.class.registry()?;
        let loaded = match resolve_hop(&self.class, &registry, name)? {
            Hop::Forward { field, target } => {
                let value = self.value(&field);
                if value.is_null() {
                    None
                } else {
                    self.scoped(target.query(), false)
                        .get_or_none([("pk", value)])
                        .await?
                }
            }
            Hop::Reverse {
                source,
                field,
                one_to_one: true,
            } => {
                self.scoped(source.query(), false)
                    .get_or_none([(field, self.pk())])
                    .await?
            }
            _ => {
                return Err(crate::orm_error!(
                    relationship,
                    format!("{}.{} 是多值关系，请使用 related_set 或 many_to_many", self.class.name(), name)
                ));
            }
        };
        self.relations.insert(
            name.to_string(),
            RelationCell::Loaded(loaded.clone().map(Box::new)),
        );
        Ok(loaded)
    }

    /// 反向外键关系的查询集
    pub fn related_set(&self, name: &str) -> OrmResult<QuerySet> {
        let related = self.class.related_field(name).ok_or_else(|| {
            crate::orm_error!(
                relationship,
                format!("模型 {} 上不存在反向关联 '{}'", self.class.name(), name)
            )
        })?;
        if related.kind == RelatedKind::ManyToMany {
            return Ok(self.many_to_many(name)?.queryset());
        }
        let pk = self.pk();
        if pk.is_null() {
            return Err(crate::orm_error!(
                relationship,
                format!("{} 实例尚未保存，不能访问反向关联", self.class.name())
            ));
        }
        let source = self.class.registry()?.get_model(&related.source_model)?;
        Ok(self
            .scoped(source.query(), false)
            .filter([(related.source_field, pk)]))
    }

    /// 多对多关系访问器，可用字段名或反向关联名
    pub fn many_to_many(&self, name: &str) -> OrmResult<ManyToManyManager> {
        let registry = self.class.registry()?;
        let back_path = if self.class.field(name).map(|f| f.is_many_to_many()) == Some(true) {
            self.class
                .through_info(name)
                .map(|t| t.related_name)
                .ok_or_else(|| {
                    crate::orm_error!(relationship, format!("多对多字段 {} 尚未装配", name))
                })?
        } else {
            match self.class.related_field(name) {
                Some(related) if related.kind == RelatedKind::ManyToMany => related.source_field,
                _ => {
                    return Err(crate::orm_error!(
                        relationship,
                        format!("{}.{} 不是多对多关系", self.class.name(), name)
                    ));
                }
            }
        };
        let hop = resolve_hop(&self.class, &registry, name)?;
        ManyToManyManager::new(self, hop, back_path)
    }

    /// 由查询结果行构建实例
    ///
    /// `select_related` 路径先递归构建关联实例，再填充本模型自身的列，未知列被忽略
    pub fn from_query_result(
        class: &Arc<ModelClass>,
        row: &Row,
        select_related: &[String],
        prefix: &str,
    ) -> OrmResult<Self> {
        let mut instance = ModelInstance::new(class.clone());
        instance.persisted = true;

        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for path in select_related {
            let (first, rest) = match path.split_once("__") {
                Some((first, rest)) => (first.to_string(), Some(rest.to_string())),
                None => (path.clone(), None),
            };
            match groups.iter_mut().find(|(name, _)| *name == first) {
                Some((_, rests)) => rests.extend(rest),
                None => groups.push((first, rest.into_iter().collect())),
            }
        }

        if !groups.is_empty() {
            let registry = class.registry()?;
            for (name, rests) in groups {
                let hop = resolve_hop(class, &registry, &name)?;
                let target = hop.target().clone();
                let sub_prefix = format!("{}{}__", prefix, name);
                let pk_key = format!("{}{}", sub_prefix, target.pk_name()?);
                let cell = match row.get(&pk_key) {
                    None | Some(DataValue::Null) => RelationCell::Loaded(None),
                    Some(_) => RelationCell::Loaded(Some(Box::new(Self::from_query_result(
                        &target,
                        row,
                        &rests,
                        &sub_prefix,
                    )?))),
                };
                instance.relations.insert(name, cell);
            }
        }

        for field in class.column_fields() {
            if let Some(value) = row.get(&format!("{}{}", prefix, field.name)) {
                instance
                    .values
                    .insert(field.name.clone(), field.from_db_value(value.clone()));
            }
        }
        Ok(instance)
    }

    /// 转换为 JSON 对象
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for field in self.class.column_fields() {
            if let Some(value) = self.values.get(&field.name) {
                map.insert(field.name.clone(), value.to_json_value());
            }
        }
        serde_json::Value::Object(map)
    }

    /// 反序列化为结构体
    pub fn to_struct<T: DeserializeOwned>(&self) -> OrmResult<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// 由可序列化结构体构建未保存实例，未知字段被忽略
    pub fn from_struct<T: Serialize>(class: &Arc<ModelClass>, value: &T) -> OrmResult<Self> {
        let json = serde_json::to_value(value)?;
        let object = match json {
            serde_json::Value::Object(object) => object,
            other => {
                return Err(OrmError::SerializationError {
                    message: format!("期望 JSON 对象，实际为 {}", other),
                });
            }
        };
        let mut instance = ModelInstance::new(class.clone());
        for (key, value) in object {
            if let Some(field) = class.field(&key).filter(|f| f.is_column()) {
                let value = match (&field.field_type, value) {
                    (crate::fields::FieldType::Json, v) => DataValue::Json(v),
                    (_, v) => DataValue::from_json_value(v),
                };
                instance.values.insert(key, value);
            }
        }
        Ok(instance)
    }
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.class.name())
            .field("pk", &self.pk())
            .field("values", &self.values)
            .finish()
    }
}

/// 实例作为比较值时取其主键
impl From<&ModelInstance> for DataValue {
    fn from(value: &ModelInstance) -> Self {
        value.pk()
    }
}

impl From<ModelInstance> for DataValue {
    fn from(value: ModelInstance) -> Self {
        value.pk()
    }
}
