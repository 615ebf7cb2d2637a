//! 模型生命周期信号测试（内存 SQLite）

use parking_lot::Mutex;
use rat_quickorm::fields::{char_field, integer_field};
use rat_quickorm::{kwargs, DataValue, ModelBuilder, ModelClass, OrmError, Registry, SqliteDatabase};
use std::sync::Arc;

async fn setup() -> (Arc<Registry>, Arc<ModelClass>) {
    let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
    registry.connect().await.unwrap();
    let user = ModelBuilder::new("User")
        .registry(&registry)
        .field("name", char_field(50))
        .field("age", integer_field().null())
        .build()
        .unwrap();
    registry.create_all(None).await.unwrap();
    (registry, user)
}

#[tokio::test]
async fn test_receivers_run_in_subscription_order() {
    let (_registry, user) = setup().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    for (label, signal) in [
        ("pre_save:first", &user.signals().pre_save),
        ("pre_save:second", &user.signals().pre_save),
        ("post_save", &user.signals().post_save),
    ] {
        let log = log.clone();
        signal.connect(move |ctx| {
            let log = log.clone();
            async move {
                log.lock().push((label, ctx.instance.is_saved()));
                Ok(())
            }
        });
    }

    user.query().create(kwargs!(name = "Adam")).await.unwrap();
    assert_eq!(
        *log.lock(),
        vec![
            ("pre_save:first", false),
            ("pre_save:second", false),
            ("post_save", true),
        ]
    );
}

#[tokio::test]
async fn test_failing_pre_save_aborts_create() {
    let (_registry, user) = setup().await;
    let after = Arc::new(Mutex::new(0));
    user.signals()
        .pre_save
        .connect(|_| async { Err(anyhow::anyhow!("name is reserved")) });
    let counter = after.clone();
    user.signals().pre_save.connect(move |_| {
        let counter = counter.clone();
        async move {
            *counter.lock() += 1;
            Ok(())
        }
    });

    let err = user.query().create(kwargs!(name = "root")).await.unwrap_err();
    assert!(matches!(err, OrmError::Other(_)));
    assert!(err.to_string().contains("name is reserved"));
    assert_eq!(*after.lock(), 0);
    assert_eq!(user.query().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_pre_update_receives_changes() {
    let (_registry, user) = setup().await;
    let mut adam = user.query().create(kwargs!(name = "Adam")).await.unwrap();
    let seen = Arc::new(Mutex::new(None));
    let captured = seen.clone();
    user.signals().pre_update.connect(move |ctx| {
        let captured = captured.clone();
        async move {
            *captured.lock() = ctx.changes.clone();
            Ok(())
        }
    });

    adam.update(kwargs!(age = 31)).await.unwrap();
    let changes = seen.lock().clone().unwrap();
    assert_eq!(changes.get("age"), Some(&DataValue::Int(31)));
    assert!(!changes.contains_key("name"));
}

#[tokio::test]
async fn test_disconnect_stops_delivery() {
    let (_registry, user) = setup().await;
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let id = user.signals().post_save.connect(move |_| {
        let counter = counter.clone();
        async move {
            *counter.lock() += 1;
            Ok(())
        }
    });

    user.query().create(kwargs!(name = "Adam")).await.unwrap();
    assert!(user.signals().post_save.disconnect(id));
    assert!(!user.signals().post_save.disconnect(id));
    assert_eq!(user.signals().post_save.receiver_count(), 0);
    user.query().create(kwargs!(name = "Eve")).await.unwrap();
    assert_eq!(*calls.lock(), 1);
}

#[tokio::test]
async fn test_unsaved_delete_does_not_notify() {
    let (_registry, user) = setup().await;
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    user.signals().pre_delete.connect(move |_| {
        let counter = counter.clone();
        async move {
            *counter.lock() += 1;
            Ok(())
        }
    });

    let mut draft = user.instance(kwargs!(name = "Draft")).unwrap();
    assert!(draft.delete().await.is_err());
    assert_eq!(*calls.lock(), 0);

    let mut adam = user.query().create(kwargs!(name = "Adam")).await.unwrap();
    assert_eq!(adam.delete().await.unwrap(), 1);
    assert_eq!(*calls.lock(), 1);
}
