//! 模型构建器
//!
//! 以声明式方式描述模型：字段、继承、Meta 选项，`build()` 完成全部校验与关系装配

use super::class::ModelClass;
use super::meta::{default_table_name, Index, MetaInfo, UniqueTogether};
use super::metaclass;
use crate::error::OrmResult;
use crate::fields::Field;
use crate::query::Manager;
use crate::registry::Registry;
use crate::security::validate_identifier;
use rat_logger::debug;
use std::sync::Arc;

enum Ancestor {
    /// 已构建的抽象模型，字段按值复制
    Model(Arc<ModelClass>),
    /// 普通字段集合
    Mixin(Vec<Field>),
}

/// 模型构建器
pub struct ModelBuilder {
    name: String,
    ancestors: Vec<Ancestor>,
    fields: Vec<Field>,
    registry: Option<Arc<Registry>>,
    table_name: Option<String>,
    is_abstract: bool,
    unique_together: Vec<UniqueTogether>,
    indexes: Vec<Index>,
    managers: Vec<(String, Arc<dyn Manager>)>,
    is_tenant: bool,
    reflected: bool,
}

impl ModelBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ancestors: Vec::new(),
            fields: Vec::new(),
            registry: None,
            table_name: None,
            is_abstract: false,
            unique_together: Vec::new(),
            indexes: Vec::new(),
            managers: Vec::new(),
            is_tenant: false,
            reflected: false,
        }
    }

    /// 指定注册表；未指定时沿继承链查找
    pub fn registry(mut self, registry: &Arc<Registry>) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// 继承抽象模型
    pub fn extends(mut self, base: &Arc<ModelClass>) -> Self {
        self.ancestors.push(Ancestor::Model(base.clone()));
        self
    }

    /// 混入一组字段
    pub fn mixin<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(name, mut field)| {
                field.name = name.into();
                field
            })
            .collect();
        self.ancestors.push(Ancestor::Mixin(fields));
        self
    }

    /// 声明字段
    pub fn field(mut self, name: &str, mut field: Field) -> Self {
        field.name = name.to_string();
        self.fields.push(field);
        self
    }

    pub fn table_name(mut self, table_name: &str) -> Self {
        self.table_name = Some(table_name.to_string());
        self
    }

    /// 标记为抽象模型：只描述字段形状，不建表
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn unique_together(mut self, constraint: impl Into<UniqueTogether>) -> Self {
        self.unique_together.push(constraint.into());
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// 注册自定义管理器
    pub fn manager(mut self, name: &str, manager: impl Manager + 'static) -> Self {
        self.managers.push((name.to_string(), Arc::new(manager)));
        self
    }

    /// 标记为租户模型
    pub fn tenant(mut self) -> Self {
        self.is_tenant = true;
        self
    }

    /// 标记为反射模型（表由外部维护）
    pub fn reflected(mut self) -> Self {
        self.reflected = true;
        self
    }

    /// 按继承顺序合并字段：祖先在前，后声明的同名字段原位覆盖
    fn collect_fields(&self) -> OrmResult<Vec<Field>> {
        let mut merged: Vec<Field> = Vec::new();
        let mut put = |field: Field| match merged.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => merged.push(field),
        };

        // 越靠前声明的祖先优先级越高，因此倒序合并
        for ancestor in self.ancestors.iter().rev() {
            match ancestor {
                Ancestor::Model(base) => {
                    if !base.is_abstract() {
                        return Err(crate::orm_error!(
                            config,
                            format!(
                                "模型 {} 只能继承抽象模型，{} 不是抽象模型",
                                self.name,
                                base.name()
                            )
                        ));
                    }
                    for field in base.fields() {
                        put(field.clone());
                    }
                }
                Ancestor::Mixin(fields) => {
                    for field in fields {
                        put(field.clone());
                    }
                }
            }
        }
        for field in &self.fields {
            put(field.clone());
        }
        Ok(merged)
    }

    fn inherited_registry(&self) -> Option<Arc<Registry>> {
        if let Some(registry) = &self.registry {
            return Some(registry.clone());
        }
        self.ancestors.iter().find_map(|ancestor| match ancestor {
            Ancestor::Model(base) => base.meta().registry(),
            Ancestor::Mixin(_) => None,
        })
    }

    fn inherited_managers(&self) -> Vec<(String, Arc<dyn Manager>)> {
        let mut managers = self.managers.clone();
        for ancestor in &self.ancestors {
            if let Ancestor::Model(base) = ancestor {
                for (name, manager) in &base.managers {
                    if !managers.iter().any(|(n, _)| n == name) {
                        managers.push((name.clone(), manager.clone()));
                    }
                }
            }
        }
        managers
    }

    fn validate_constraints(&self, fields: &[Field]) -> OrmResult<()> {
        let check = |kind: &str, names: &[String]| -> OrmResult<()> {
            if names.is_empty() {
                return Err(crate::orm_error!(
                    config,
                    format!("模型 {} 的 {} 声明不能为空", self.name, kind)
                ));
            }
            for name in names {
                match fields.iter().find(|f| &f.name == name) {
                    Some(field) if field.is_column() => {}
                    _ => {
                        return Err(crate::orm_error!(
                            config,
                            format!(
                                "模型 {} 的 {} 引用了不存在的字段 '{}'",
                                self.name, kind, name
                            )
                        ));
                    }
                }
            }
            Ok(())
        };

        for unique in &self.unique_together {
            if let UniqueTogether::Constraint { name, .. } = unique {
                validate_identifier("constraint_name", name)
                    .map_err(|e| crate::orm_error!(config, e))?;
            }
            check("unique_together", &unique.fields())?;
        }
        for index in &self.indexes {
            if let Some(name) = &index.name {
                validate_identifier("index_name", name).map_err(|e| crate::orm_error!(config, e))?;
            }
            check("indexes", &index.fields)?;
        }
        Ok(())
    }

    /// 执行完整的模型构建流程，任何一步失败都不会留下部分注册的状态
    pub fn build(self) -> OrmResult<Arc<ModelClass>> {
        if self.name.trim().is_empty() {
            return Err(crate::orm_error!(config, "模型名不能为空"));
        }

        let mut fields = self.collect_fields()?;

        let pk_count = fields.iter().filter(|f| f.primary_key).count();
        if pk_count > 1 {
            return Err(crate::orm_error!(
                config,
                format!("模型 {} 只能有一个主键，实际定义了 {} 个", self.name, pk_count)
            ));
        }

        let mut pk_name = fields.iter().find(|f| f.primary_key).map(|f| f.name.clone());
        if pk_name.is_none() && !self.is_abstract {
            if fields.iter().any(|f| f.name == "id") {
                return Err(crate::orm_error!(
                    config,
                    format!("模型 {} 的 id 字段不是主键，且没有其他主键", self.name)
                ));
            }
            fields.insert(0, Field::auto_id());
            pk_name = Some("id".to_string());
        }

        if let Some(pk) = fields.iter().find(|f| f.primary_key) {
            if pk.is_many_to_many() {
                return Err(crate::orm_error!(
                    config,
                    format!("多对多字段 {}.{} 不能作为主键", self.name, pk.name)
                ));
            }
            let generated = pk.autoincrement || pk.server_default.is_some();
            if !pk.field_type.is_integer() && !generated && pk.default.is_none() {
                return Err(crate::orm_error!(
                    config,
                    format!(
                        "模型 {} 的非整数主键 {} 必须提供默认值或默认值工厂",
                        self.name, pk.name
                    )
                ));
            }
        }

        let mut foreign_keys = Vec::new();
        let mut one_to_one = Vec::new();
        let mut many_to_many = Vec::new();
        for field in fields.iter_mut() {
            validate_identifier("column_name", &field.name)
                .map_err(|e| crate::orm_error!(config, e))?;
            field.owner = Some(self.name.clone());
            if field.is_one_to_one() {
                one_to_one.push(field.name.clone());
            } else if field.is_foreign_key() {
                foreign_keys.push(field.name.clone());
            } else if field.is_many_to_many() {
                many_to_many.push(field.name.clone());
            }
        }

        self.validate_constraints(&fields)?;

        if self.is_abstract {
            if self.managers.len() > 1 {
                return Err(crate::orm_error!(
                    config,
                    format!("抽象模型 {} 最多只能直接声明一个管理器", self.name)
                ));
            }
            if !self.unique_together.is_empty() || !self.indexes.is_empty() {
                return Err(crate::orm_error!(
                    config,
                    format!("抽象模型 {} 不能声明 unique_together 或 indexes", self.name)
                ));
            }
        }

        let registry = self.inherited_registry();
        if registry.is_none() && !self.is_abstract {
            return Err(crate::orm_error!(
                config,
                format!("模型 {} 及其继承链上都没有指定注册表", self.name)
            ));
        }

        let table_name = if self.is_abstract {
            None
        } else {
            let table_name = self
                .table_name
                .clone()
                .unwrap_or_else(|| default_table_name(&self.name));
            validate_identifier("table_name", &table_name)
                .map_err(|e| crate::orm_error!(config, e))?;
            Some(table_name)
        };

        let meta = MetaInfo {
            table_name,
            is_abstract: self.is_abstract,
            registry: registry.as_ref().map(Arc::downgrade).unwrap_or_default(),
            fields,
            pk_name,
            unique_together: self.unique_together.clone(),
            indexes: self.indexes.clone(),
            foreign_keys,
            one_to_one,
            many_to_many,
            is_tenant: self.is_tenant,
            reflected: self.reflected,
            proxy_for: None,
        };
        let managers = self.inherited_managers();

        match registry {
            Some(registry) if !self.is_abstract => {
                let class = ModelClass::new(self.name.clone(), meta, managers);
                metaclass::register(&registry, class)
            }
            _ => {
                debug!("抽象模型已构建: {}", self.name);
                Ok(Arc::new(ModelClass::new(self.name, meta, managers)))
            }
        }
    }
}
