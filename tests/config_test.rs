//! 配置文件读写与按配置建立注册表

use rat_quickorm::fields::char_field;
use rat_quickorm::{
    kwargs, sqlite_config, sqlite_memory_config, GlobalConfig, LogLevel, LoggingConfig,
    ModelBuilder, Registry,
};

fn logging() -> LoggingConfig {
    LoggingConfig::builder()
        .level(LogLevel::Warn)
        .console(true)
        .log_sql(false)
        .build()
        .unwrap()
}

#[test]
fn test_toml_and_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("app.db");
    let config = GlobalConfig::builder()
        .add_database(sqlite_config("default", db_path.to_string_lossy()).unwrap())
        .add_database(sqlite_memory_config("cache").unwrap())
        .default_database("default")
        .logging(logging())
        .language("en-US")
        .build()
        .unwrap();

    for name in ["config.toml", "config.json"] {
        let path = dir.path().join(name);
        config.save_to_file(&path).unwrap();
        let loaded = GlobalConfig::from_file(&path).unwrap();
        assert_eq!(loaded.default_alias().unwrap(), "default");
        assert_eq!(loaded.databases.len(), 2);
        assert_eq!(loaded.logging, config.logging);
        assert_eq!(loaded.language.as_deref(), Some("en-US"));
    }
}

#[test]
fn test_invalid_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "databases = 1").unwrap();
    assert!(GlobalConfig::from_file(&path).unwrap_err().is_config());
    assert!(GlobalConfig::from_file(dir.path().join("missing.json")).is_err());
}

#[tokio::test]
async fn test_registry_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("app.db");
    let config = GlobalConfig::builder()
        .add_database(sqlite_config("default", db_path.to_string_lossy()).unwrap())
        .add_database(sqlite_memory_config("archive").unwrap())
        .default_database("default")
        .logging(logging())
        .build()
        .unwrap();

    let registry = Registry::from_config(&config).await.unwrap();
    assert_eq!(registry.database_aliases(), vec!["archive".to_string()]);
    let note = ModelBuilder::new("Note")
        .registry(&registry)
        .field("body", char_field(100))
        .build()
        .unwrap();
    registry.create_all(None).await.unwrap();
    note.query().create(kwargs!(body = "kept")).await.unwrap();
    assert_eq!(note.query().count().await.unwrap(), 1);
    assert!(db_path.exists());

    let err = note.query().using("missing").count().await.unwrap_err();
    assert!(matches!(err, rat_quickorm::OrmError::AliasNotFound { .. }));
    registry.disconnect().await.unwrap();
}
