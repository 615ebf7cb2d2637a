//! PostgreSQL 后端

use super::scope::{require_scope, TransactionSlots};
use super::{savepoint_name, Database, ExecuteResult, Statement, TransactionScope};
use crate::debug_log;
use crate::error::{OrmError, OrmResult};
use crate::security::{quote_identifier, validate_identifier};
use crate::types::{ConnectionConfig, DataValue, DatabaseConfig, DatabaseType, Row};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::RwLock;
use rat_logger::{debug, info};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, Transaction, TypeInfo};

/// PostgreSQL 数据库
pub struct PostgresDatabase {
    url: String,
    max_connections: u32,
    pool: RwLock<Option<PgPool>>,
    transactions: TransactionSlots<Postgres>,
}

impl PostgresDatabase {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            pool: RwLock::new(None),
            transactions: TransactionSlots::new(),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> OrmResult<Self> {
        match &config.connection {
            conn @ ConnectionConfig::PostgreSQL { .. } => Ok(Self::new(conn.to_url())),
            _ => Err(crate::orm_error!(
                config,
                format!("数据库 '{}' 的连接配置不是 PostgreSQL", config.alias)
            )),
        }
    }

    /// 设置连接池大小
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    fn pool(&self) -> OrmResult<PgPool> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| crate::orm_error!(connection, "PostgreSQL 数据库未连接"))
    }

    async fn run_on_tx(tx: &mut Transaction<'static, Postgres>, sql: &str) -> OrmResult<()> {
        sqlx::query(sql).execute(&mut **tx).await?;
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DataValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            DataValue::Null => query.bind(Option::<String>::None),
            DataValue::Bool(b) => query.bind(*b),
            DataValue::Int(i) => query.bind(*i),
            DataValue::Float(f) => query.bind(*f),
            DataValue::String(s) => query.bind(s.clone()),
            DataValue::Bytes(bytes) => query.bind(bytes.clone()),
            DataValue::DateTime(dt) => query.bind(dt.with_timezone(&Utc)),
            DataValue::Date(d) => query.bind(*d),
            DataValue::Uuid(u) => query.bind(*u),
            DataValue::Json(j) => query.bind(j.clone()),
            array @ DataValue::Array(_) => query.bind(array.to_json_value()),
        };
    }
    query
}

fn decode_column(row: &PgRow, index: usize) -> OrmResult<DataValue> {
    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| DataValue::Int(v as i64)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| DataValue::Int(v as i64)),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(DataValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| DataValue::Float(v as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(DataValue::Float),
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(DataValue::Bool),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(DataValue::Uuid),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(DataValue::Json),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|v| DataValue::DateTime(v.fixed_offset())),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|v| DataValue::DateTime(v.and_utc().fixed_offset())),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(DataValue::Date),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(DataValue::Bytes),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(DataValue::String)
        }
        other => {
            return row
                .try_get::<Option<String>, _>(index)
                .map(|v| v.map(DataValue::String).unwrap_or(DataValue::Null))
                .map_err(|e| OrmError::QueryError {
                    message: format!("不支持的PostgreSQL列类型 {}: {}", other, e),
                });
        }
    };
    Ok(value.unwrap_or(DataValue::Null))
}

fn row_to_map(row: &PgRow) -> OrmResult<Row> {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, index)?);
    }
    Ok(map)
}

fn query_error(sql: &str, e: sqlx::Error) -> OrmError {
    OrmError::QueryError {
        message: format!("PostgreSQL执行失败: {} (SQL: {})", e, sql),
    }
}

/// 当前作用域有事务时在事务连接上执行，否则从连接池取连接
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
impl Database for PostgresDatabase {
    fn dialect(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn connect(&self) -> OrmResult<()> {
        if self.pool.read().is_some() {
            return Ok(());
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await
            .map_err(|e| OrmError::ConnectionError {
                message: format!("PostgreSQL连接池创建失败: {}", e),
            })?;
        *self.pool.write() = Some(pool);
        info!("PostgreSQL 数据库已连接");
        Ok(())
    }

    async fn disconnect(&self) -> OrmResult<()> {
        self.transactions.clear();
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("PostgreSQL 数据库已断开");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.read().is_some()
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteResult> {
        debug_log!("执行PostgreSQL语句: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let result = run_query!(self, query, execute).map_err(|e| query_error(&stmt.sql, e))?;

        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
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
        debug_log!("执行PostgreSQL查询: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let row = run_query!(self, query, fetch_optional).map_err(|e| query_error(&stmt.sql, e))?;

        row.as_ref().map(row_to_map).transpose()
    }

    async fn fetch_all(&self, stmt: &Statement) -> OrmResult<Vec<Row>> {
        debug_log!("执行PostgreSQL查询: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let rows = run_query!(self, query, fetch_all).map_err(|e| query_error(&stmt.sql, e))?;

        rows.iter().map(row_to_map).collect()
    }

    async fn fetch_val(&self, stmt: &Statement) -> OrmResult<DataValue> {
        debug_log!("执行PostgreSQL查询: {}", stmt);
        let query = bind_params(sqlx::query(&stmt.sql), &stmt.params);
        let row = run_query!(self, query, fetch_optional).map_err(|e| query_error(&stmt.sql, e))?;

        match row {
            Some(row) if !row.columns().is_empty() => decode_column(&row, 0),
            _ => Ok(DataValue::Null),
        }
    }

    async fn begin(&self) -> OrmResult<()> {
        let scope = require_scope()?;
        match self.transactions.get(scope) {
            Some(slot) => {
                let mut state = slot.lock().await;
                let name = savepoint_name(state.depth);
                if let Some(tx) = state.tx.as_mut() {
                    Self::run_on_tx(tx, &format!("SAVEPOINT {}", name)).await?;
                }
                state.depth += 1;
            }
            None => {
                let tx = self.pool()?.begin().await?;
                self.transactions.insert(scope, tx);
                debug!("PostgreSQL 事务开始: {:?}", scope);
            }
        }
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
        debug!("PostgreSQL 事务提交: {:?}", scope);
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
        debug!("PostgreSQL 事务回滚: {:?}", scope);
        Ok(())
    }

    fn discard(&self, scope: TransactionScope) {
        self.transactions.remove(scope);
    }

    async fn create_schema(&self, schema: &str, if_not_exists: bool) -> OrmResult<()> {
        validate_identifier("schema_name", schema)?;
        let clause = if if_not_exists { "IF NOT EXISTS " } else { "" };
        self.execute(&Statement::raw(format!(
            "CREATE SCHEMA {}{}",
            clause,
            quote_identifier(schema)
        )))
        .await?;
        info!("PostgreSQL schema 已创建: {}", schema);
        Ok(())
    }

    async fn drop_schema(&self, schema: &str, cascade: bool, if_exists: bool) -> OrmResult<()> {
        validate_identifier("schema_name", schema)?;
        let clause = if if_exists { "IF EXISTS " } else { "" };
        let cascade = if cascade { " CASCADE" } else { "" };
        self.execute(&Statement::raw(format!(
            "DROP SCHEMA {}{}{}",
            clause,
            quote_identifier(schema),
            cascade
        )))
        .await?;
        info!("PostgreSQL schema 已删除: {}", schema);
        Ok(())
    }
}
