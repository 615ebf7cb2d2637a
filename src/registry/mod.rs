//! 模型注册表
//!
//! 持有数据库连接、模型命名空间、反射表以及按 (模型, schema) 缓存的表结构，
//! 负责按依赖顺序创建和删除所有表

use crate::config::GlobalConfig;
use crate::database::{create_database, transaction, Database, Statement};
use crate::error::OrmResult;
use crate::fields::{DefaultSchemaValidator, ModelRef, SchemaValidator};
use crate::model::ModelClass;
use crate::table::{
    build_table, create_table_sql, drop_table_sql, post_create_sqls, sort_by_dependency,
    TableSchema,
};
use crate::tenancy::TenantContext;
use crate::types::DatabaseType;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rat_logger::{debug, info};
use std::sync::Arc;

/// 目标模型尚未注册的关系字段，待目标注册时装配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelation {
    /// 目标模型名
    pub target: String,
    /// 声明关系的模型名
    pub source: String,
    /// 关系字段名
    pub field: String,
}

type TableKey = (String, Option<String>);

/// 模型注册表
pub struct Registry {
    /// 默认数据库
    database: Arc<dyn Database>,
    /// 其他数据库 (别名 -> 数据库)
    extra: DashMap<String, Arc<dyn Database>>,
    /// 已注册模型 (名称 -> 模型类)
    models: DashMap<String, Arc<ModelClass>>,
    /// 注册顺序
    order: RwLock<Vec<String>>,
    /// 反射表 (表名 -> 模型类)
    reflected: DashMap<String, Arc<ModelClass>>,
    /// 表结构缓存
    tables: DashMap<TableKey, Arc<TableSchema>>,
    pending: Mutex<Vec<PendingRelation>>,
    validator: RwLock<Arc<dyn SchemaValidator>>,
    context: TenantContext,
}

impl Registry {
    /// 以默认数据库创建注册表（不会建立连接）
    pub fn new(database: Arc<dyn Database>) -> Arc<Self> {
        info!("创建模型注册表，数据库类型: {}", database.dialect().as_str());
        Arc::new(Self {
            database,
            extra: DashMap::new(),
            models: DashMap::new(),
            order: RwLock::new(Vec::new()),
            reflected: DashMap::new(),
            tables: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            validator: RwLock::new(Arc::new(DefaultSchemaValidator)),
            context: TenantContext::new(),
        })
    }

    /// 按全局配置创建注册表并连接所有数据库
    ///
    /// 默认别名对应的数据库作为主库，其余别名作为附加库
    pub async fn from_config(config: &GlobalConfig) -> OrmResult<Arc<Self>> {
        let default_alias = config.default_alias()?;
        let default_config = config.databases.get(default_alias).ok_or_else(|| {
            crate::orm_error!(alias_not_found, default_alias)
        })?;
        let registry = Self::new(create_database(default_config)?);
        for (alias, db_config) in &config.databases {
            if alias != default_alias {
                registry.add_database(alias, create_database(db_config)?);
            }
        }
        registry.connect().await?;
        Ok(registry)
    }

    /// 替换载荷验证器
    pub fn set_validator(&self, validator: Arc<dyn SchemaValidator>) {
        *self.validator.write() = validator;
    }

    pub fn validator(&self) -> Arc<dyn SchemaValidator> {
        self.validator.read().clone()
    }

    /// 默认数据库
    pub fn database(&self) -> Arc<dyn Database> {
        self.database.clone()
    }

    pub fn dialect(&self) -> DatabaseType {
        self.database.dialect()
    }

    /// 添加附加数据库
    pub fn add_database(&self, alias: &str, database: Arc<dyn Database>) {
        debug!("添加附加数据库: {} ({})", alias, database.dialect().as_str());
        self.extra.insert(alias.to_string(), database);
    }

    /// 按别名取数据库，`None` 为默认数据库
    pub fn database_for(&self, alias: Option<&str>) -> OrmResult<Arc<dyn Database>> {
        match alias {
            None => Ok(self.database.clone()),
            Some(alias) => self
                .extra
                .get(alias)
                .map(|db| db.value().clone())
                .ok_or_else(|| crate::orm_error!(alias_not_found, alias)),
        }
    }

    /// 附加数据库别名列表
    pub fn database_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.extra.iter().map(|e| e.key().clone()).collect();
        aliases.sort();
        aliases
    }

    /// 连接所有数据库
    pub async fn connect(&self) -> OrmResult<()> {
        self.database.connect().await?;
        for db in self.extra_databases() {
            db.connect().await?;
        }
        info!("注册表数据库已连接");
        Ok(())
    }

    /// 断开所有数据库
    pub async fn disconnect(&self) -> OrmResult<()> {
        for db in self.extra_databases() {
            db.disconnect().await?;
        }
        self.database.disconnect().await?;
        info!("注册表数据库已断开");
        Ok(())
    }

    fn extra_databases(&self) -> Vec<Arc<dyn Database>> {
        self.extra.iter().map(|e| e.value().clone()).collect()
    }

    /// 注册表持有的租户上下文
    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    pub fn contains_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub(crate) fn insert_model(&self, class: Arc<ModelClass>) {
        let name = class.name().to_string();
        if class.meta().reflected {
            if let Some(table) = class.meta().table_name.clone() {
                self.reflected.insert(table, class.clone());
            }
        }
        self.models.insert(name.clone(), class);
        self.order.write().push(name);
    }

    /// 按名称取模型
    pub fn get_model(&self, name: &str) -> OrmResult<Arc<ModelClass>> {
        self.models
            .get(name)
            .map(|m| m.value().clone())
            .ok_or_else(|| crate::OrmError::ModelNotRegistered {
                name: name.to_string(),
            })
    }

    /// 按注册顺序列出所有模型
    pub fn models(&self) -> Vec<Arc<ModelClass>> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.models.get(name).map(|m| m.value().clone()))
            .collect()
    }

    /// 反射表模型
    pub fn reflected_models(&self) -> Vec<Arc<ModelClass>> {
        self.reflected.iter().map(|e| e.value().clone()).collect()
    }

    /// 解析模型引用
    pub fn resolve(&self, target: &ModelRef) -> OrmResult<Arc<ModelClass>> {
        match target {
            ModelRef::Class(class) => Ok(class.clone()),
            ModelRef::Name(name) => self.get_model(name),
        }
    }

    pub(crate) fn pending_for(&self, target: &str) -> Vec<PendingRelation> {
        self.pending
            .lock()
            .iter()
            .filter(|p| p.target == target)
            .cloned()
            .collect()
    }

    pub(crate) fn add_pending(&self, relation: PendingRelation) {
        self.pending.lock().push(relation);
    }

    pub(crate) fn remove_pending(&self, target: &str) {
        self.pending.lock().retain(|p| p.target != target);
    }

    /// 仍未解析的关系
    pub fn pending_relations(&self) -> Vec<PendingRelation> {
        self.pending.lock().clone()
    }

    /// 规范化 schema：方言默认 schema 视为未指定
    pub fn normalize_schema(&self, schema: Option<&str>) -> Option<String> {
        schema
            .filter(|s| !s.is_empty() && *s != self.dialect().default_schema())
            .map(str::to_string)
    }

    /// 取模型在指定 schema 下的表结构，首次访问时构建并缓存
    pub fn table_for(&self, model: &ModelClass, schema: Option<&str>) -> OrmResult<Arc<TableSchema>> {
        let schema = self.normalize_schema(schema);
        let key = (model.name().to_string(), schema.clone());
        if let Some(table) = self.tables.get(&key) {
            return Ok(table.value().clone());
        }
        let table = Arc::new(build_table(model, self, schema.as_deref())?);
        crate::debug_log!(
            "构建表结构: {} (schema: {})",
            table.name,
            schema.as_deref().unwrap_or("-")
        );
        Ok(self.tables.entry(key).or_insert(table).value().clone())
    }

    /// 清除某个 schema 下的表结构缓存，`None` 清除全部
    pub fn invalidate_tables(&self, schema: Option<&str>) {
        match schema {
            None => self.tables.clear(),
            Some(schema) => {
                let schema = self.normalize_schema(Some(schema));
                self.tables.retain(|(_, s), _| *s != schema);
            }
        }
        debug!("表结构缓存已失效: {}", schema.unwrap_or("*"));
    }

    /// 创建 schema
    pub async fn create_schema(&self, schema: &str, if_not_exists: bool) -> OrmResult<()> {
        self.database.create_schema(schema, if_not_exists).await
    }

    /// 删除 schema
    pub async fn drop_schema(&self, schema: &str, cascade: bool, if_exists: bool) -> OrmResult<()> {
        self.database.drop_schema(schema, cascade, if_exists).await?;
        self.invalidate_tables(Some(schema));
        Ok(())
    }

    /// 需要建表的模型：排除抽象、代理与反射模型
    fn managed_models(&self) -> Vec<Arc<ModelClass>> {
        self.models()
            .into_iter()
            .filter(|m| !m.is_abstract() && !m.is_proxy() && !m.meta().reflected)
            .collect()
    }

    /// 在指定 schema 下创建所有模型的表
    pub async fn create_all(&self, schema: Option<&str>) -> OrmResult<()> {
        let models = self.managed_models();
        self.create_tables(models, schema).await?;
        info!("所有表已创建 (schema: {})", schema.unwrap_or("-"));
        Ok(())
    }

    /// 删除指定 schema 下所有模型的表
    pub async fn drop_all(&self, schema: Option<&str>) -> OrmResult<()> {
        let models = self.managed_models();
        self.drop_tables(models, schema).await?;
        info!("所有表已删除 (schema: {})", schema.unwrap_or("-"));
        Ok(())
    }

    /// 在一个事务中按外键依赖顺序创建给定模型的表
    pub async fn create_tables(
        &self,
        models: Vec<Arc<ModelClass>>,
        schema: Option<&str>,
    ) -> OrmResult<()> {
        let schema = self.normalize_schema(schema);
        if let Some(schema) = &schema {
            self.create_schema(schema, true).await?;
        }
        let dialect = self.dialect();
        let mut statements = Vec::new();
        for model in sort_by_dependency(models, self) {
            let table = self.table_for(&model, schema.as_deref())?;
            statements.push(create_table_sql(&table, dialect)?);
            statements.extend(post_create_sqls(&table, dialect)?);
        }
        self.run_ddl(statements).await
    }

    /// 在一个事务中按依赖逆序删除给定模型的表
    pub async fn drop_tables(
        &self,
        models: Vec<Arc<ModelClass>>,
        schema: Option<&str>,
    ) -> OrmResult<()> {
        let schema = self.normalize_schema(schema);
        let dialect = self.dialect();
        let mut statements = Vec::new();
        for model in sort_by_dependency(models, self).into_iter().rev() {
            let table = self.table_for(&model, schema.as_deref())?;
            statements.push(drop_table_sql(&table, dialect)?);
        }
        self.run_ddl(statements).await
    }

    async fn run_ddl(&self, statements: Vec<String>) -> OrmResult<()> {
        let db = &self.database;
        let statements = &statements;
        transaction(db, || async move {
            for sql in statements {
                crate::debug_log!("执行DDL: {}", sql);
                db.execute(&Statement::raw(sql.clone())).await?;
            }
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("dialect", &self.dialect())
            .field("models", &*self.order.read())
            .field("extra_databases", &self.database_aliases())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::fields::{char_field, foreign_key};
    use crate::model::ModelBuilder;

    fn registry() -> Arc<Registry> {
        Registry::new(Arc::new(SqliteDatabase::memory()))
    }

    #[test]
    fn test_normalize_schema() {
        let registry = registry();
        assert_eq!(registry.normalize_schema(None), None);
        assert_eq!(registry.normalize_schema(Some("main")), None);
        assert_eq!(registry.normalize_schema(Some("tenant_a")), Some("tenant_a".to_string()));
    }

    #[test]
    fn test_table_cache_is_schema_scoped() {
        let registry = registry();
        let user = ModelBuilder::new("User")
            .registry(&registry)
            .field("name", char_field(50))
            .build()
            .unwrap();
        let public = registry.table_for(&user, None).unwrap();
        let tenant = registry.table_for(&user, Some("tenant_a")).unwrap();
        assert_eq!(public.schema, None);
        assert_eq!(tenant.schema.as_deref(), Some("tenant_a"));
        assert!(Arc::ptr_eq(&public, &registry.table_for(&user, Some("main")).unwrap()));

        registry.invalidate_tables(Some("tenant_a"));
        let rebuilt = registry.table_for(&user, Some("tenant_a")).unwrap();
        assert!(!Arc::ptr_eq(&tenant, &rebuilt));
    }

    #[test]
    fn test_unknown_alias() {
        let registry = registry();
        assert!(registry.database_for(None).is_ok());
        assert!(matches!(
            registry.database_for(Some("missing")),
            Err(crate::OrmError::AliasNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_and_drop_all() {
        let registry = registry();
        registry.connect().await.unwrap();
        let user = ModelBuilder::new("User")
            .registry(&registry)
            .field("name", char_field(50))
            .build()
            .unwrap();
        ModelBuilder::new("Post")
            .registry(&registry)
            .field("author", foreign_key(&user))
            .field("title", char_field(100))
            .build()
            .unwrap();
        registry.create_all(None).await.unwrap();
        let db = registry.database();
        let tables = db
            .fetch_all(&Statement::raw(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            ))
            .await
            .unwrap();
        let names: Vec<String> = tables
            .iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        assert!(names.contains(&"users".to_string()));
        assert!(names.contains(&"posts".to_string()));

        registry.drop_all(None).await.unwrap();
        let remaining = db
            .fetch_val(&Statement::raw(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'posts')",
            ))
            .await
            .unwrap();
        assert_eq!(remaining.as_i64(), Some(0));
    }
}
