//! 多租户测试（内存 SQLite，租户 schema 以 ATTACH 实现）

use rat_quickorm::fields::char_field;
use rat_quickorm::{
    kwargs, ModelBuilder, ModelClass, OrmError, Registry, SqliteDatabase, Statement,
    TenantContext, TenantRegistry,
};
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> (Arc<Registry>, TenantRegistry, Arc<ModelClass>) {
    let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
    registry.connect().await.unwrap();
    let tenants = TenantRegistry::new(&registry).unwrap();
    let item = ModelBuilder::new("Item")
        .registry(&registry)
        .tenant()
        .field("code", char_field(20).index())
        .build()
        .unwrap();
    registry.create_all(None).await.unwrap();
    (registry, tenants, item)
}

#[tokio::test]
async fn test_tenant_schema_isolation() {
    let (registry, tenants, item) = setup().await;
    tenants.create_tenant("tenant_a", "A", None).await.unwrap();
    assert_eq!(tenants.tenant_models().len(), 1);

    let context = TenantContext::new();
    context.activate("tenant_a");
    for i in 0..10 {
        item.query()
            .with_context(&context)
            .create(kwargs!(code = format!("a{}", i)))
            .await
            .unwrap();
    }
    for i in 0..25 {
        item.query().create(kwargs!(code = format!("p{}", i))).await.unwrap();
    }

    assert_eq!(item.query().with_context(&context).count().await.unwrap(), 10);
    assert_eq!(item.query().count().await.unwrap(), 25);
    assert_eq!(item.query().using_schema("tenant_a").count().await.unwrap(), 10);
    // 显式 schema 优先于上下文
    assert_eq!(
        item.query()
            .with_context(&context)
            .using_schema("main")
            .count()
            .await
            .unwrap(),
        25
    );

    let scoped = registry
        .context()
        .scope("tenant_a", async { item.query().count().await })
        .await
        .unwrap();
    assert_eq!(scoped, 10);
    assert_eq!(item.query().count().await.unwrap(), 25);

    // 并发的作用域各自看到自己的租户
    let context = registry.context();
    let (in_tenant, in_public) = tokio::join!(
        context.scope("tenant_a", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            item.query().count().await
        }),
        context.scope("main", async { item.query().count().await })
    );
    assert_eq!(in_tenant.unwrap(), 10);
    assert_eq!(in_public.unwrap(), 25);
    assert_eq!(context.current(), None);

    let tenant = tenants.get_tenant("tenant_a").await.unwrap();
    tenants.activate(&tenant).unwrap();
    assert_eq!(item.query().count().await.unwrap(), 10);
    tenants.deactivate();

    // 共享模型不受租户上下文影响
    context.activate("tenant_a");
    assert_eq!(tenants.tenant_model().query().with_context(&context).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_public_schema_guards() {
    let (_registry, tenants, _item) = setup().await;
    let err = tenants.create_tenant("main", "Main", None).await.unwrap_err();
    assert!(err.is_config());

    let mut public = tenants.create_public_tenant("Public", Some("example.com")).await.unwrap();
    let mut domain = tenants.add_domain(&public, "example.com", true).await.unwrap();

    let err = tenants.delete_tenant(&mut public, false).await.unwrap_err();
    assert!(matches!(err, OrmError::TenantError { .. }));
    let err = tenants.delete_domain(&mut domain).await.unwrap_err();
    assert!(matches!(err, OrmError::TenantError { .. }));
}

#[tokio::test]
async fn test_mutation_outside_own_schema_rejected() {
    let (registry, tenants, _item) = setup().await;
    let mut tenant_a = tenants.create_tenant("tenant_a", "A", None).await.unwrap();

    registry.context().activate("tenant_b");
    let err = tenants.create_tenant("tenant_c", "C", None).await.unwrap_err();
    assert!(matches!(err, OrmError::TenantError { .. }));
    tenant_a.set("on_trial", true);
    let err = tenants.save_tenant(&mut tenant_a).await.unwrap_err();
    assert!(matches!(err, OrmError::TenantError { .. }));

    registry.context().activate("tenant_a");
    tenants.save_tenant(&mut tenant_a).await.unwrap();
    registry.context().deactivate();

    let reloaded = tenants.get_tenant("tenant_a").await.unwrap();
    assert_eq!(reloaded.value("on_trial").as_bool(), Some(true));
    tenants.delete_tenant(&mut tenant_a, true).await.unwrap();
    assert!(tenants.get_tenant("tenant_a").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_single_primary_domain() {
    let (_registry, tenants, _item) = setup().await;
    let tenant = tenants.create_tenant("tenant_a", "A", None).await.unwrap();

    let first = tenants.add_domain(&tenant, "a.example.com", false).await.unwrap();
    assert_eq!(first.value("is_primary").as_bool(), Some(true));
    let second = tenants.add_domain(&tenant, "a.example.org", true).await.unwrap();

    let primary = tenants.primary_domain(&tenant).await.unwrap().unwrap();
    assert_eq!(primary.pk(), second.pk());
    let primaries = tenants
        .domain_model()
        .query()
        .filter(kwargs!(is_primary = true))
        .count()
        .await
        .unwrap();
    assert_eq!(primaries, 1);

    let found = tenants.tenant_for_domain("a.example.com").await.unwrap().unwrap();
    assert_eq!(found.get_str("schema_name"), Some("tenant_a"));
}

#[tokio::test]
async fn test_failed_schema_setup_removes_tenant_record() {
    let (registry, tenants, _item) = setup().await;
    // 预先放入同名视图：建表被 IF NOT EXISTS 跳过，建索引失败
    registry.create_schema("tenant_x", true).await.unwrap();
    registry
        .database()
        .execute(&Statement::raw(
            "CREATE VIEW \"tenant_x\".\"items\" AS SELECT 1 AS \"id\", 'x' AS \"code\"",
        ))
        .await
        .unwrap();

    let err = tenants.create_tenant("tenant_x", "X", None).await.unwrap_err();
    assert!(err.to_string().contains("views may not be indexed"), "{}", err);
    let remaining = tenants
        .tenant_model()
        .query()
        .filter(kwargs!(schema_name = "tenant_x"))
        .count()
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert_eq!(tenants.tenants().await.unwrap().len(), 0);
}
