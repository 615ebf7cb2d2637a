//! 多租户
//!
//! 同一组模型定义按 schema 复用：租户模型在每个租户 schema 中各建一份表，
//! 共享模型只存在于默认 schema。当前租户由显式传递的 `TenantContext` 决定

use crate::error::OrmResult;
use crate::fields::{boolean_field, char_field, datetime_field, foreign_key, ReferentialAction};
use crate::model::{ModelBuilder, ModelClass, ModelInstance};
use crate::registry::Registry;
use crate::types::DataValue;
use parking_lot::RwLock;
use rat_logger::{info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

tokio::task_local! {
    static TENANT_FRAMES: RefCell<HashMap<u64, Option<String>>>;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 租户上下文
///
/// `scope` 内的租户是 task-local 的：并发任务互不影响，future 结束或被取消时自动恢复。
/// 在 `scope` 之外调用 `activate` 设置的是所有克隆共享的默认租户
#[derive(Debug, Clone)]
pub struct TenantContext {
    id: u64,
    default: Arc<RwLock<Option<String>>>,
}

impl Default for TenantContext {
    fn default() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            default: Arc::new(RwLock::new(None)),
        }
    }
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 激活租户 schema，在 `scope` 内只作用于当前作用域
    pub fn activate(&self, schema: &str) {
        self.set(Some(schema.to_string()));
    }

    /// 回到默认 schema
    pub fn deactivate(&self) {
        self.set(None);
    }

    fn set(&self, schema: Option<String>) {
        let scoped = TENANT_FRAMES
            .try_with(|frames| {
                frames.borrow_mut().insert(self.id, schema.clone());
            })
            .is_ok();
        if !scoped {
            *self.default.write() = schema;
        }
    }

    pub fn current(&self) -> Option<String> {
        TENANT_FRAMES
            .try_with(|frames| frames.borrow().get(&self.id).cloned())
            .ok()
            .flatten()
            .unwrap_or_else(|| self.default.read().clone())
    }

    /// 在给定 schema 下执行 future，作用域只对当前任务可见
    ///
    /// `tokio::spawn` 出去的任务不继承作用域
    pub async fn scope<F, T>(&self, schema: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut frames = TENANT_FRAMES
            .try_with(|frames| frames.borrow().clone())
            .unwrap_or_default();
        frames.insert(self.id, Some(schema.to_string()));
        TENANT_FRAMES.scope(RefCell::new(frames), fut).await
    }
}

/// 租户注册表
///
/// 租户与域名记录属于共享模型，保存在默认 schema 中
pub struct TenantRegistry {
    registry: Arc<Registry>,
    tenant: Arc<ModelClass>,
    domain: Arc<ModelClass>,
}

impl TenantRegistry {
    /// 在注册表上定义 `Tenant` 与 `Domain` 模型
    pub fn new(registry: &Arc<Registry>) -> OrmResult<Self> {
        let tenant = ModelBuilder::new("Tenant")
            .registry(registry)
            .table_name("tenants")
            .field("schema_name", char_field(63).unique())
            .field("tenant_name", char_field(100).unique())
            .field("domain_url", char_field(128).null())
            .field("on_trial", boolean_field().default(false))
            .field("is_active", boolean_field().default(true))
            .field("created_on", datetime_field().auto_now_add())
            .build()?;
        let domain = ModelBuilder::new("Domain")
            .registry(registry)
            .table_name("domains")
            .field("domain", char_field(253).unique())
            .field(
                "tenant",
                foreign_key(&tenant)
                    .related_name("domains")
                    .on_delete(ReferentialAction::Cascade),
            )
            .field("is_primary", boolean_field().default(true))
            .build()?;
        Ok(Self {
            registry: registry.clone(),
            tenant,
            domain,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tenant_model(&self) -> &Arc<ModelClass> {
        &self.tenant
    }

    pub fn domain_model(&self) -> &Arc<ModelClass> {
        &self.domain
    }

    /// 需要在每个租户 schema 中建表的模型
    pub fn tenant_models(&self) -> Vec<Arc<ModelClass>> {
        self.registry
            .models()
            .into_iter()
            .filter(|m| {
                m.meta().is_tenant && !m.is_abstract() && !m.is_proxy() && !m.meta().reflected
            })
            .collect()
    }

    /// 默认 schema 名
    pub fn public_schema(&self) -> &'static str {
        self.registry.database().default_schema()
    }

    fn is_public(&self, schema: &str) -> bool {
        self.registry.normalize_schema(Some(schema)).is_none()
    }

    /// 租户记录只能在默认 schema 或租户自己的 schema 中修改
    fn check_mutation_scope(&self, schema_name: &str) -> OrmResult<()> {
        if let Some(current) = self.registry.normalize_schema(self.registry.context().current().as_deref()) {
            if current != schema_name {
                return Err(crate::orm_error!(
                    tenant,
                    format!(
                        "不能在 schema '{}' 中修改租户 '{}'，只允许默认 schema 或租户自身的 schema",
                        current, schema_name
                    )
                ));
            }
        }
        Ok(())
    }

    fn shared(&self, model: &Arc<ModelClass>) -> crate::query::QuerySet {
        model.query().using_schema(self.public_schema())
    }

    /// 默认 schema 对应的租户记录，不创建任何 schema
    pub async fn create_public_tenant(&self, tenant_name: &str, domain_url: Option<&str>) -> OrmResult<ModelInstance> {
        let public = self.public_schema();
        self.shared(&self.tenant)
            .create([
                ("schema_name", DataValue::from(public)),
                ("tenant_name", DataValue::from(tenant_name)),
                ("domain_url", DataValue::from(domain_url)),
            ])
            .await
    }

    /// 创建租户记录，随后创建 schema 与全部租户表
    ///
    /// schema 或建表失败时删除刚插入的租户记录后返回原错误
    pub async fn create_tenant(
        &self,
        schema_name: &str,
        tenant_name: &str,
        domain_url: Option<&str>,
    ) -> OrmResult<ModelInstance> {
        if self.is_public(schema_name) {
            return Err(crate::orm_error!(
                config,
                format!("租户不能使用默认 schema '{}'", schema_name)
            ));
        }
        crate::security::validate_identifier("schema_name", schema_name)
            .map_err(|e| crate::orm_error!(config, e))?;
        self.check_mutation_scope(schema_name)?;

        let mut tenant = self
            .shared(&self.tenant)
            .create([
                ("schema_name", DataValue::from(schema_name)),
                ("tenant_name", DataValue::from(tenant_name)),
                ("domain_url", DataValue::from(domain_url)),
            ])
            .await?;

        if let Err(e) = self
            .registry
            .create_tables(self.tenant_models(), Some(schema_name))
            .await
        {
            warn!("租户 schema '{}' 创建失败，删除租户记录: {}", schema_name, e);
            if let Err(cleanup) = tenant.delete().await {
                warn!("删除租户记录失败: {}", cleanup);
            }
            return Err(e);
        }
        info!("租户已创建: {} (schema: {})", tenant_name, schema_name);
        Ok(tenant)
    }

    pub async fn get_tenant(&self, schema_name: &str) -> OrmResult<ModelInstance> {
        self.shared(&self.tenant)
            .get([("schema_name", schema_name)])
            .await
    }

    pub async fn tenants(&self) -> OrmResult<Vec<ModelInstance>> {
        self.shared(&self.tenant).order_by(["pk"]).all().await
    }

    fn schema_of(tenant: &ModelInstance) -> OrmResult<String> {
        tenant
            .get_str("schema_name")
            .map(str::to_string)
            .ok_or_else(|| crate::orm_error!(tenant, "租户记录缺少 schema_name"))
    }

    /// 保存租户记录的修改
    pub async fn save_tenant(&self, tenant: &mut ModelInstance) -> OrmResult<()> {
        let schema_name = Self::schema_of(tenant)?;
        self.check_mutation_scope(&schema_name)?;
        tenant.save().await
    }

    /// 删除租户记录，`drop_schema` 时同时删除其 schema
    pub async fn delete_tenant(&self, tenant: &mut ModelInstance, drop_schema: bool) -> OrmResult<()> {
        let schema_name = Self::schema_of(tenant)?;
        if self.is_public(&schema_name) {
            return Err(crate::orm_error!(tenant, "不能删除默认 schema 对应的租户"));
        }
        self.check_mutation_scope(&schema_name)?;
        tenant.delete().await?;
        if drop_schema {
            self.registry.drop_schema(&schema_name, true, true).await?;
        }
        info!("租户已删除: {}", schema_name);
        Ok(())
    }

    /// 为租户添加域名
    ///
    /// 新的主域名会取消该租户其他域名的主标记；租户还没有主域名时新域名自动成为主域名
    pub async fn add_domain(&self, tenant: &ModelInstance, domain: &str, is_primary: bool) -> OrmResult<ModelInstance> {
        let siblings = self.shared(&self.domain).filter([("tenant", tenant.pk())]);
        let has_primary = siblings.filter([("is_primary", true)]).exists().await?;
        let is_primary = is_primary || !has_primary;
        if is_primary && has_primary {
            siblings.update([("is_primary", false)]).await?;
        }
        self.shared(&self.domain)
            .create([
                ("domain", DataValue::from(domain)),
                ("tenant", tenant.pk()),
                ("is_primary", DataValue::from(is_primary)),
            ])
            .await
    }

    pub async fn primary_domain(&self, tenant: &ModelInstance) -> OrmResult<Option<ModelInstance>> {
        self.shared(&self.domain)
            .filter([("tenant", tenant.pk())])
            .get_or_none([("is_primary", true)])
            .await
    }

    /// 按域名查找租户
    pub async fn tenant_for_domain(&self, domain: &str) -> OrmResult<Option<ModelInstance>> {
        self.shared(&self.tenant)
            .get_or_none([("domains__domain", domain)])
            .await
    }

    /// 删除域名，默认 schema 租户的主域名不能删除
    pub async fn delete_domain(&self, domain: &mut ModelInstance) -> OrmResult<u64> {
        let owner = self
            .shared(&self.tenant)
            .get_or_none([("pk", domain.value("tenant"))])
            .await?;
        if let Some(owner) = owner {
            let public_owner = owner.get_str("schema_name").map(|s| self.is_public(s)).unwrap_or(false);
            if public_owner && domain.value("is_primary").as_bool() == Some(true) {
                return Err(crate::orm_error!(tenant, "不能删除默认 schema 的主域名"));
            }
        }
        domain.delete().await
    }

    /// 在注册表的上下文上激活租户
    pub fn activate(&self, tenant: &ModelInstance) -> OrmResult<()> {
        let schema_name = Self::schema_of(tenant)?;
        self.registry.context().activate(&schema_name);
        Ok(())
    }

    pub fn deactivate(&self) {
        self.registry.context().deactivate();
    }
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("tenant_models", &self.tenant_models().iter().map(|m| m.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_restores_previous_schema() {
        let context = TenantContext::new();
        context.activate("outer");
        let seen = context.scope("inner", async { context.current() }).await;
        assert_eq!(seen.as_deref(), Some("inner"));
        assert_eq!(context.current().as_deref(), Some("outer"));
        context.deactivate();
        assert_eq!(context.current(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let context = TenantContext::new();
        let other = context.clone();
        other.activate("tenant_a");
        assert_eq!(context.current().as_deref(), Some("tenant_a"));
    }

    #[test]
    fn test_nested_scopes() {
        let context = TenantContext::new();
        let seen = tokio_test::block_on(context.scope("tenant_a", async {
            let inner = context.scope("tenant_b", async { context.current() }).await;
            (inner, context.current())
        }));
        assert_eq!(seen.0.as_deref(), Some("tenant_b"));
        assert_eq!(seen.1.as_deref(), Some("tenant_a"));
        assert_eq!(context.current(), None);
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let context = TenantContext::new();
        let observe = |schema: &'static str, delay: u64| {
            let context = context.clone();
            async move {
                context
                    .scope(schema, async {
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                        context.current()
                    })
                    .await
            }
        };
        let (a, b) = tokio::join!(observe("tenant_a", 30), observe("tenant_b", 10));
        assert_eq!(a.as_deref(), Some("tenant_a"));
        assert_eq!(b.as_deref(), Some("tenant_b"));
        assert_eq!(context.current(), None);

        let spawned = tokio::spawn({
            let context = context.clone();
            async move { context.scope("tenant_c", async { context.current() }).await }
        });
        assert_eq!(spawned.await.unwrap().as_deref(), Some("tenant_c"));
        assert_eq!(context.current(), None);
    }

    #[tokio::test]
    async fn test_cancelled_scope_leaves_no_tenant() {
        let context = TenantContext::new();
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            context.scope("tenant_a", tokio::time::sleep(std::time::Duration::from_secs(5))),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(context.current(), None);
    }

    #[tokio::test]
    async fn test_activate_inside_scope_stays_in_scope() {
        let context = TenantContext::new();
        let other = TenantContext::new();
        other.activate("other_default");
        context
            .scope("tenant_a", async {
                context.activate("tenant_b");
                assert_eq!(context.current().as_deref(), Some("tenant_b"));
                context.deactivate();
                assert_eq!(context.current(), None);
                assert_eq!(other.current().as_deref(), Some("other_default"));
            })
            .await;
        assert_eq!(context.current(), None);
        assert_eq!(other.current().as_deref(), Some("other_default"));
    }
}
