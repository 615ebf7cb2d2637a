//! QuerySet 行为测试（内存 SQLite）

use rat_quickorm::fields::{char_field, email_field, integer_field};
use rat_quickorm::{
    kwargs, transaction, DataValue, ModelBuilder, ModelClass, OrmError, Q, Registry, SqliteDatabase,
};
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> (Arc<Registry>, Arc<ModelClass>) {
    let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
    registry.connect().await.unwrap();
    let user = ModelBuilder::new("User")
        .registry(&registry)
        .field("name", char_field(50))
        .field("email", email_field().null())
        .field("age", integer_field().null())
        .build()
        .unwrap();
    registry.create_all(None).await.unwrap();
    (registry, user)
}

#[tokio::test]
async fn test_end_to_end_user() {
    let (_registry, user) = setup().await;
    let adam = user
        .query()
        .create(kwargs!(name = "Adam", email = "adam@x.io"))
        .await
        .unwrap();
    assert!(adam.is_saved());
    assert!(!adam.pk().is_null());

    assert!(user.query().filter(kwargs!(name = "Adam")).exists().await.unwrap());
    assert!(!user.query().filter(kwargs!(name = "Eve")).exists().await.unwrap());
    assert_eq!(user.query().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_contains_matches_literal_wildcards() {
    let (_registry, user) = setup().await;
    for name in ["100%-Cotton", "100X-Cotton", "a_b", "aXb"] {
        user.query().create(kwargs!(name = name)).await.unwrap();
    }

    let found = user
        .query()
        .filter(kwargs!(name__contains = "100%-Cotton"))
        .all()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_str("name"), Some("100%-Cotton"));

    let found = user
        .query()
        .filter(kwargs!(name__icontains = "A_B"))
        .values_list(["name"], true)
        .await
        .unwrap();
    assert_eq!(found, vec![rat_quickorm::DataValue::from("a_b")]);
}

#[tokio::test]
async fn test_chaining_keeps_base_untouched() {
    let (_registry, user) = setup().await;
    user.query().create(kwargs!(name = "a", age = 1)).await.unwrap();
    user.query().create(kwargs!(name = "b", age = 2)).await.unwrap();

    let base = user.query().filter(kwargs!(age__gte = 1));
    let first = base.filter(kwargs!(age = 1));
    let second = base.filter(kwargs!(age = 2));
    assert_eq!(base.count().await.unwrap(), 2);
    assert_eq!(first.count().await.unwrap(), 1);
    let only = second.get(kwargs!()).await.unwrap();
    assert_eq!(only.get_str("name"), Some("b"));
}

#[tokio::test]
async fn test_and_or_composition() {
    let (_registry, user) = setup().await;
    user.query().create(kwargs!(name = "a", age = 1)).await.unwrap();
    user.query().create(kwargs!(name = "a", age = 2)).await.unwrap();
    user.query().create(kwargs!(name = "b", age = 3)).await.unwrap();

    let both = user.query().and_(kwargs!(name = "a", age = 2)).count().await.unwrap();
    assert_eq!(both, 1);

    let either = user.query().or_(kwargs!(name = "b", age = 1)).count().await.unwrap();
    assert_eq!(either, 2);

    let chained = user
        .query()
        .or_(kwargs!(name = "b"))
        .or_(kwargs!(age = 1))
        .count()
        .await
        .unwrap();
    assert_eq!(chained, either);

    let q = Q::new("name", "a") & !Q::new("age", 1);
    assert_eq!(user.query().filter_q(q).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_cardinality() {
    let (_registry, user) = setup().await;

    let err = user.query().get(kwargs!(name = "x")).await.unwrap_err();
    assert!(err.is_not_found());

    user.query().create(kwargs!(name = "x")).await.unwrap();
    let one = user.query().get(kwargs!(name = "x")).await.unwrap();
    assert_eq!(one.get_str("name"), Some("x"));

    user.query().create(kwargs!(name = "x")).await.unwrap();
    let err = user.query().get(kwargs!(name = "x")).await.unwrap_err();
    assert!(err.is_multiple());
    assert!(user.query().get_or_none(kwargs!(name = "y")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_delete_and_aggregates() {
    let (_registry, user) = setup().await;
    for (name, age) in [("a", 10), ("b", 20), ("c", 30)] {
        user.query().create(kwargs!(name = name, age = age)).await.unwrap();
    }

    let updated = user
        .query()
        .filter(kwargs!(age__lt = 25))
        .update(kwargs!(name = "young"))
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(user.query().filter(kwargs!(name = "young")).count().await.unwrap(), 2);

    assert_eq!(user.query().max("age").await.unwrap().as_i64(), Some(30));
    assert_eq!(user.query().sum("age").await.unwrap().as_i64(), Some(60));

    let oldest = user.query().order_by(["-age"]).first().await.unwrap().unwrap();
    assert_eq!(oldest.get_i64("age"), Some(30));

    let deleted = user.query().filter(kwargs!(age__in = vec![10, 30])).delete().await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(user.query().count().await.unwrap(), 1);
    assert!(user.last_raw_query().unwrap().starts_with("SELECT COUNT(*)"));
}

#[tokio::test]
async fn test_get_or_create_and_bulk() {
    let (_registry, user) = setup().await;
    let (first, created) = user
        .query()
        .get_or_create(kwargs!(age = 5), kwargs!(name = "z"))
        .await
        .unwrap();
    assert!(created);
    assert_eq!(first.get_i64("age"), Some(5));
    let (again, created) = user
        .query()
        .get_or_create(kwargs!(age = 6), kwargs!(name = "z"))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.pk(), first.pk());

    let created = user
        .query()
        .bulk_create(vec![kwargs!(name = "p", age = 1), kwargs!(name = "q")])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|i| !i.pk().is_null()));

    let mut objs = created.clone();
    for obj in objs.iter_mut() {
        obj.set("age", 99);
    }
    assert_eq!(user.query().bulk_update(&objs, &["age"]).await.unwrap(), 2);
    assert_eq!(user.query().filter(kwargs!(age = 99)).count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_validation_errors_are_collected() {
    let (_registry, user) = setup().await;
    let err = user
        .query()
        .create(kwargs!(email = "not-an-email", age = "x"))
        .await
        .unwrap_err();
    match err {
        rat_quickorm::OrmError::ValidationErrors { errors } => {
            let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
            assert!(fields.contains(&"name"));
            assert!(fields.contains(&"email"));
            assert!(fields.contains(&"age"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(user.query().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_transaction_keeps_concurrent_writes() {
    let (registry, user) = setup().await;
    let db = registry.database();
    let failing = transaction(&db, || async {
        user.query().create(kwargs!(name = "InTx")).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err::<(), _>(OrmError::QueryError {
            message: "abort".to_string(),
        })
    });
    let bystander = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        user.query().create(kwargs!(name = "Bystander")).await
    };
    let (failed, created) = tokio::join!(failing, bystander);
    assert!(failed.is_err());
    assert!(created.unwrap().is_saved());

    let names = user.query().values_list(["name"], true).await.unwrap();
    assert_eq!(names, vec![DataValue::from("Bystander")]);
}
