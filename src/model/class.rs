//! 模型类

use super::meta::MetaInfo;
use super::relation::{RelatedField, ThroughInfo};
use super::signals::Signals;
use super::ModelInstance;
use crate::error::{OrmError, OrmResult};
use crate::fields::Field;
use crate::query::{Manager, QuerySet};
use crate::registry::Registry;
use crate::types::DataValue;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 由 `ModelBuilder` 构建完成的模型类
pub struct ModelClass {
    pub(crate) name: String,
    pub(crate) meta: MetaInfo,
    /// 其他模型安装在本模型上的反向关联
    pub(crate) related: RwLock<Vec<RelatedField>>,
    /// 多对多字段名 -> 中间模型信息
    pub(crate) through: RwLock<HashMap<String, ThroughInfo>>,
    pub(crate) signals: Signals,
    pub(crate) managers: Vec<(String, Arc<dyn Manager>)>,
    pub(crate) proxy: OnceCell<Arc<ModelClass>>,
    pub(crate) last_raw_query: RwLock<Option<String>>,
}

impl ModelClass {
    pub(crate) fn new(
        name: String,
        meta: MetaInfo,
        managers: Vec<(String, Arc<dyn Manager>)>,
    ) -> Self {
        Self {
            name,
            meta,
            related: RwLock::new(Vec::new()),
            through: RwLock::new(HashMap::new()),
            signals: Signals::default(),
            managers,
            proxy: OnceCell::new(),
            last_raw_query: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    pub fn fields(&self) -> &[Field] {
        &self.meta.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.meta.field(name)
    }

    /// 占列的字段
    pub fn column_fields(&self) -> impl Iterator<Item = &Field> {
        self.meta.fields.iter().filter(|f| f.is_column())
    }

    pub fn is_abstract(&self) -> bool {
        self.meta.is_abstract
    }

    pub fn is_proxy(&self) -> bool {
        self.meta.proxy_for.is_some()
    }

    /// 表名，抽象模型调用时报配置错误
    pub fn table_name(&self) -> OrmResult<&str> {
        self.meta.table_name.as_deref().ok_or_else(|| {
            crate::orm_error!(config, format!("抽象模型 {} 没有对应的表", self.name))
        })
    }

    pub fn pk_name(&self) -> OrmResult<&str> {
        self.meta.pk_name.as_deref().ok_or_else(|| {
            crate::orm_error!(config, format!("模型 {} 没有主键", self.name))
        })
    }

    pub fn pk_field(&self) -> OrmResult<&Field> {
        let pk_name = self.pk_name()?;
        self.field(pk_name).ok_or_else(|| {
            crate::orm_error!(config, format!("模型 {} 的主键字段缺失", self.name))
        })
    }

    /// 所属注册表
    pub fn registry(&self) -> OrmResult<Arc<Registry>> {
        self.meta.registry().ok_or_else(|| {
            crate::orm_error!(
                config,
                format!("模型 {} 没有可用的注册表", self.name)
            )
        })
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// 反向关联列表（代理模型取原始模型的）
    pub fn related_fields(&self) -> Vec<RelatedField> {
        if let Some(origin) = self.origin() {
            return origin.related_fields();
        }
        self.related.read().clone()
    }

    pub fn related_field(&self, name: &str) -> Option<RelatedField> {
        if let Some(origin) = self.origin() {
            return origin.related_field(name);
        }
        self.related.read().iter().find(|r| r.name == name).cloned()
    }

    pub fn through_info(&self, field: &str) -> Option<ThroughInfo> {
        if let Some(origin) = self.origin() {
            return origin.through_info(field);
        }
        self.through.read().get(field).cloned()
    }

    /// 名称是否已被字段或反向关联占用
    pub fn has_attribute(&self, name: &str) -> bool {
        self.field(name).is_some() || self.related_field(name).is_some()
    }

    /// 宽松约束的代理模型，共享同一张表
    pub fn proxy(self: &Arc<Self>) -> Arc<ModelClass> {
        self.proxy.get().cloned().unwrap_or_else(|| self.clone())
    }

    fn origin(&self) -> Option<Arc<ModelClass>> {
        let origin = self.meta.proxy_for.as_ref()?;
        self.meta.registry()?.get_model(origin).ok()
    }

    /// 默认查询集
    pub fn query(self: &Arc<Self>) -> QuerySet {
        QuerySet::new(self.clone())
    }

    /// 通过自定义管理器获取查询集
    pub fn manager(self: &Arc<Self>, name: &str) -> OrmResult<QuerySet> {
        let (_, manager) = self
            .managers
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| {
                crate::orm_error!(config, format!("模型 {} 没有管理器 '{}'", self.name, name))
            })?;
        Ok(manager.get_queryset(self.query()))
    }

    pub fn manager_names(&self) -> Vec<String> {
        self.managers.iter().map(|(n, _)| n.clone()).collect()
    }

    /// 最近一次执行的 SQL
    pub fn last_raw_query(&self) -> Option<String> {
        self.last_raw_query.read().clone()
    }

    pub(crate) fn set_last_raw_query(&self, sql: &str) {
        *self.last_raw_query.write() = Some(sql.to_string());
        if let Some(origin) = self.origin() {
            origin.set_last_raw_query(sql);
        }
    }

    /// 未保存的新实例
    pub fn instance<I, K, V>(self: &Arc<Self>, values: I) -> OrmResult<ModelInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let mut instance = ModelInstance::new(self.clone());
        for (key, value) in values {
            let key = key.into();
            if self.field(&key).map(|f| f.is_column()) != Some(true) {
                return Err(OrmError::ValidationError {
                    field: key,
                    message: format!("模型 {} 没有该字段", self.name),
                });
            }
            instance.set(&key, value);
        }
        Ok(instance)
    }
}

impl std::fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .finish()
    }
}
