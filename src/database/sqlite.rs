//! SQLite 后端
//!
//! 单连接池：ATTACH 的 schema 绑定在这条连接上。
//! 事务持有连接期间，其他作用域的语句在连接池上排队等待

use super::scope::{require_scope, TransactionSlots};
use super::{savepoint_name, Database, ExecuteResult, Statement, TransactionScope};
use crate::debug_log;
use crate::error::{OrmError, OrmResult};
use crate::security::{quote_identifier, validate_identifier};
use crate::types::{ConnectionConfig, DataValue, DatabaseConfig, DatabaseType, Row};
use async_trait::async_trait;
use parking_lot::RwLock;
use rat_logger::{debug, info};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row as _, Sqlite, Transaction, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;

const MEMORY_PATH: &str = ":memory:";

/// SQLite 数据库
pub struct SqliteDatabase {
    path: String,
    create_if_missing: bool,
    pool: RwLock<Option<SqlitePool>>,
    transactions: TransactionSlots<Sqlite>,
}

impl SqliteDatabase {
    /// 文件数据库
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: true,
            pool: RwLock::new(None),
            transactions: TransactionSlots::new(),
        }
    }

    /// 内存数据库
    pub fn memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    pub fn from_config(config: &DatabaseConfig) -> OrmResult<Self> {
        match &config.connection {
            ConnectionConfig::SQLite {
                path,
                create_if_missing,
            } => {
                let mut db = Self::new(path.clone());
                db.create_if_missing = *create_if_missing;
                Ok(db)
            }
            _ => Err(crate::orm_error!(
                config,
                format!("数据库 '{}' 的连接配置不是 SQLite", config.alias)
            )),
        }
    }

    fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH || self.path == "sqlite::memory:"
    }

    fn pool(&self) -> OrmResult<SqlitePool> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| crate::orm_error!(connection, "SQLite 数据库未连接"))
    }

    /// schema 对应的附加数据库文件
    fn schema_file(&self, schema: &str) -> String {
        if self.is_memory() {
            return MEMORY_PATH.to_string();
        }
        let path = Path::new(&self.path);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("database");
        let file_name = format!("{}_{}.db", stem, schema);
        match path.parent() {
            Some(parent) => parent.join(file_name).to_string_lossy().to_string(),
            None => file_name,
        }
    }

    async fn attached_schemas(&self) -> OrmResult<Vec<String>> {
        let rows = self
            .fetch_all(&Statement::raw("PRAGMA database_list"))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str().map(str::to_string)))
            .collect())
    }

    async fn run_on_tx(tx: &mut Transaction<'static, Sqlite>, sql: &str) -> OrmResult<()> {
        sqlx::query(sql).execute(&mut **tx).await?;
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[DataValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            DataValue::Null => query.bind(Option::<String>::None),
            DataValue::Bool(b) => query.bind(*b),
            DataValue::Int(i) => query.bind(*i),
            DataValue::Float(f) => query.bind(*f),
            DataValue::String(s) => query.bind(s.clone()),
            DataValue::Bytes(bytes) => query.bind(bytes.clone()),
            // 日期、UUID、JSON 在 SQLite 中以文本存储
            other => query.bind(other.to_storage_string().unwrap_or_default()),
        };
    }
    query
}

/// 按值的实际存储类型解码
fn decode_column(row: &SqliteRow, index: usize) -> OrmResult<DataValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DataValue::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => DataValue::Int(row.try_get::<i64, _>(index)?),
        "REAL" | "NUMERIC" => DataValue::Float(row.try_get::<f64, _>(index)?),
        "BLOB" => DataValue::Bytes(row.try_get::<Vec<u8>, _>(index)?),
        _ => DataValue::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

fn row_to_map(row: &SqliteRow) -> OrmResult<Row> {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, index)?);
    }
    Ok(map)
}

fn query_error(sql: &str, e: sqlx::Error) -> OrmError {
    OrmError::QueryError {
        message: format!("SQLite执行失败: {} (SQL: {})", e, sql),
    }
}

/// 当前作用域有事务时在事务连接上执行，否则在连接池上执行
macro_rules! run_query {
    ($db:expr, $query:expr, $method:ident) => {
        match $db.transactions.current() {
            Some(slot) => {
                let mut state = slot.lock().await;
                match state.tx.as_mut() {
                    Some(tx) => $query.$method(&mut **tx).await,
                    None => return Err(crate::orm_error!(query, "事务已结束")),
                }
            }
            None => {
                let pool = $db.pool()?;
                $query.$method(&pool).await
            }
        }
    };
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self) -> OrmResult<()> {
        if self.pool.read().is_some() {
            return Ok(());
        }

        let options = if self.is_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| crate::orm_error!(connection, e))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(self.create_if_missing)
        }
        .foreign_keys(true)
        // LIKE 默认不区分大小写，contains 需要区分
        .pragma("case_sensitive_like", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .map_err(|e| OrmError::ConnectionError {
                message: format!("SQLite连接失败: {} ({})", e, self.path),
            })?;

        *self.pool.write() = Some(pool);
        info!("SQLite 数据库已连接: {}", self.path);
        Ok(())
    }

    async fn disconnect(&self) -> OrmResult<()> {
        self.transactions.clear();
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("SQLite 数据库已断开: {}", self.path);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.read().is_some()
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteResult> {
        debug_log!("执行SQLite语句: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let result = run_query!(self, query, execute).map_err(|e| query_error(&stmt.sql, e))?;

        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn execute_many(&self, sql: &str, param_sets: &[Vec<DataValue>]) -> OrmResult<u64> {
        let mut total = 0;
        for params in param_sets {
            total += self
                .execute(&Statement::new(sql, params.clone()))
                .await?
                .rows_affected;
        }
        Ok(total)
    }

    async fn fetch_one(&self, stmt: &Statement) -> OrmResult<Option<Row>> {
        debug_log!("执行SQLite查询: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let row = run_query!(self, query, fetch_optional).map_err(|e| query_error(&stmt.sql, e))?;

        row.as_ref().map(row_to_map).transpose()
    }

    async fn fetch_all(&self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        debug_log!("执行SQLite查询: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let rows = run_query!(self, query, fetch_all).map_err(|e| query_error(&stmt.sql, e))?;

        rows.iter().map(row_to_map).collect()
    }

    async fn fetch_val(&self, stmt: &Statement) -> OrmResult<DataValue> {
        debug_log!("执行SQLite查询: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let row = run_query!(self, query, fetch_optional).map_err(|e| query_error(&stmt.sql, e))?;

        match row {
            Some(row) if !row.columns().is_empty() => decode_column(&row, 0),
            _ => Ok(DataValue::Null),
        }
    }

    async fn begin(&self) -> OrmResult<()> {
        let scope = require_scope()?;
        if let Some(slot) = self.transactions.get(scope) {
            let mut state = slot.lock().await;
            let name = savepoint_name(state.depth);
            if let Some(tx) = state.tx.as_mut() {
                Self::run_on_tx(tx, &format!("SAVEPOINT {}", name)).await?;
            }
            state.depth += 1;
            debug!("SQLite 保存点创建: {}", name);
            return Ok(());
        }

        let tx = self.pool()?.begin().await?;
        self.transactions.insert(scope, tx);
        debug!("SQLite 事务开始: {:?}", scope);
        Ok(())
    }

    async fn commit(&self) -> OrmResult<()> {
        let scope = require_scope()?;
        let slot = self
            .transactions
            .get(scope)
            .ok_or_else(|| crate::orm_error!(query, "没有活动的事务可提交"))?;
        let mut state = slot.lock().await;
        if state.depth > 1 {
            let name = savepoint_name(state.depth - 1);
            if let Some(tx) = state.tx.as_mut() {
                Self::run_on_tx(tx, &format!("RELEASE SAVEPOINT {}", name)).await?;
            }
            state.depth -= 1;
            return Ok(());
        }

        state.depth = 0;
        let tx = state.tx.take();
        self.transactions.remove(scope);
        if let Some(tx) = tx {
            tx.commit().await?;
        }
        debug!("SQLite 事务提交: {:?}", scope);
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        let scope = require_scope()?;
        let slot = self
            .transactions
            .get(scope)
            .ok_or_else(|| crate::orm_error!(query, "没有活动的事务可回滚"))?;
        let mut state = slot.lock().await;
        if state.depth > 1 {
            let name = savepoint_name(state.depth - 1);
            if let Some(tx) = state.tx.as_mut() {
                Self::run_on_tx(tx, &format!("ROLLBACK TO SAVEPOINT {}", name)).await?;
                Self::run_on_tx(tx, &format!("RELEASE SAVEPOINT {}", name)).await?;
            }
            state.depth -= 1;
            return Ok(());
        }

        state.depth = 0;
        let tx = state.tx.take();
        self.transactions.remove(scope);
        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        debug!("SQLite 事务回滚: {:?}", scope);
        Ok(())
    }

    fn discard(&self, scope: TransactionScope) {
        if self.transactions.remove(scope) {
            debug!("SQLite 事务已丢弃: {:?}", scope);
        }
    }

    async fn create_schema(&self, schema: &str, if_not_exists: bool) -> OrmResult<()> {
        validate_identifier("schema_name", schema)?;
        if self.attached_schemas().await?.iter().any(|s| s == schema) {
            if if_not_exists {
                return Ok(());
            }
            return Err(crate::orm_error!(query, format!("schema '{}' 已存在", schema)));
        }
        let file = self.schema_file(schema);
        self.execute(&Statement::new(
            format!("ATTACH DATABASE ? AS {}", quote_identifier(schema)),
            vec![DataValue::String(file.clone())],
        ))
        .await?;
        info!("SQLite schema 已附加: {} -> {}", schema, file);
        Ok(())
    }

    async fn drop_schema(&self, schema: &str, _cascade: bool, if_exists: bool) -> OrmResult<()> {
        validate_identifier("schema_name", schema)?;
        if !self.attached_schemas().await?.iter().any(|s| s == schema) {
            if if_exists {
                return Ok(());
            }
            return Err(crate::orm_error!(query, format!("schema '{}' 不存在", schema)));
        }
        self.execute(&Statement::raw(format!(
            "DETACH DATABASE {}",
            quote_identifier(schema)
        )))
        .await?;
        if !self.is_memory() {
            let file = self.schema_file(schema);
            if let Err(e) = tokio::fs::remove_file(&file).await {
                debug!("删除 schema 文件失败: {} ({})", file, e);
            }
        }
        info!("SQLite schema 已移除: {}", schema);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::transaction;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let db = SqliteDatabase::memory();
        db.connect().await.unwrap();
        db.execute(&Statement::raw(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, score REAL)",
        ))
        .await
        .unwrap();
        let result = db
            .execute(&Statement::new(
                "INSERT INTO t (name, score) VALUES (?, ?)",
                vec![DataValue::from("a"), DataValue::Float(1.5)],
            ))
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));

        let row = db
            .fetch_one(&Statement::raw("SELECT id, name, score FROM t"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("name"), Some(&DataValue::from("a")));
        assert_eq!(row.get("score"), Some(&DataValue::Float(1.5)));

        let count = db
            .fetch_val(&Statement::raw("SELECT count(*) FROM t"))
            .await
            .unwrap();
        assert_eq!(count, DataValue::Int(1));
    }

    async fn counter_db() -> (Arc<SqliteDatabase>, Arc<dyn Database>) {
        let sqlite = Arc::new(SqliteDatabase::memory());
        sqlite.connect().await.unwrap();
        sqlite
            .execute(&Statement::raw("CREATE TABLE t (v TEXT)"))
            .await
            .unwrap();
        let db: Arc<dyn Database> = sqlite.clone();
        (sqlite, db)
    }

    fn insert(value: &str) -> Statement {
        Statement::new("INSERT INTO t VALUES (?)", vec![DataValue::from(value)])
    }

    async fn values(db: &Arc<dyn Database>) -> Vec<DataValue> {
        db.fetch_all(&Statement::raw("SELECT v FROM t ORDER BY v"))
            .await
            .unwrap()
            .into_iter()
            .filter_map(|mut row| row.remove("v"))
            .collect()
    }

    #[tokio::test]
    async fn test_nested_transaction_rollback() {
        let (_sqlite, db) = counter_db().await;
        transaction(&db, || async {
            db.execute(&insert("outer")).await?;
            let inner = transaction(&db, || async {
                db.execute(&insert("inner")).await?;
                Err::<(), _>(crate::orm_error!(query, "内层失败"))
            })
            .await;
            assert!(inner.is_err());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(values(&db).await, vec![DataValue::from("outer")]);
        assert!(db.begin().await.is_err());
        assert!(db.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_statements_outside_transaction_are_independent() {
        let (_sqlite, db) = counter_db().await;
        let failing = transaction(&db, || async {
            db.execute(&insert("in_tx")).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<(), _>(crate::orm_error!(query, "回滚"))
        });
        let bystander = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            db.execute(&insert("bystander")).await
        };
        let (failed, inserted) = tokio::join!(failing, bystander);
        assert!(failed.is_err());
        assert_eq!(inserted.unwrap().rows_affected, 1);
        assert_eq!(values(&db).await, vec![DataValue::from("bystander")]);
    }

    #[tokio::test]
    async fn test_cancelled_transaction_is_discarded() {
        let (sqlite, db) = counter_db().await;
        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            transaction(&db, || async {
                db.execute(&insert("lost")).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(sqlite.transactions.len(), 0);
        assert!(values(&db).await.is_empty());

        transaction(&db, || async { db.execute(&insert("kept")).await })
            .await
            .unwrap();
        assert_eq!(values(&db).await, vec![DataValue::from("kept")]);
    }

    #[tokio::test]
    async fn test_attach_schema() {
        let db = SqliteDatabase::memory();
        db.connect().await.unwrap();
        db.create_schema("tenant_a", true).await.unwrap();
        db.create_schema("tenant_a", true).await.unwrap();
        db.execute(&Statement::raw("CREATE TABLE \"tenant_a\".\"t\" (v INTEGER)"))
            .await
            .unwrap();
        db.drop_schema("tenant_a", true, true).await.unwrap();
        assert!(db.drop_schema("tenant_a", true, false).await.is_err());
    }
}
