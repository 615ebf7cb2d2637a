//! 数据库能力抽象
//!
//! `Database` trait 定义 ORM 核心依赖的全部数据库操作，
//! 具体实现基于 sqlx，按特性分别编译 SQLite 与 PostgreSQL 后端

#[cfg(feature = "postgres-support")]
pub mod postgres;
mod scope;
#[cfg(feature = "sqlite-support")]
pub mod sqlite;

#[cfg(feature = "postgres-support")]
pub use postgres::PostgresDatabase;
pub use scope::TransactionScope;
#[cfg(feature = "sqlite-support")]
pub use sqlite::SqliteDatabase;

use crate::error::OrmResult;
use crate::types::{DataValue, DatabaseConfig, DatabaseType, Row};
use async_trait::async_trait;
use rat_logger::warn;
use std::future::Future;
use std::sync::Arc;

/// 一条已渲染的 SQL 语句及其位置参数
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DataValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<DataValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// 无参数语句（DDL）
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            write!(f, " -- {:?}", self.params)?;
        }
        Ok(())
    }
}

/// 执行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    /// 受影响的行数
    pub rows_affected: u64,
    /// 最后插入的行ID（仅 SQLite 提供）
    pub last_insert_id: Option<i64>,
}

/// 数据库能力
///
/// 事务绑定到开启它的 `transaction()` 作用域：作用域内的语句走事务连接，
/// 其他调用者的语句不受影响，直接在连接池上执行
#[async_trait]
pub trait Database: Send + Sync {
    /// 数据库方言
    fn dialect(&self) -> DatabaseType;

    /// 建立连接（幂等）
    async fn connect(&self) -> OrmResult<()>;

    /// 断开连接，未提交的事务被丢弃
    async fn disconnect(&self) -> OrmResult<()>;

    /// 是否已连接
    fn is_connected(&self) -> bool;

    /// 执行语句
    async fn execute(&self, stmt: &Statement) -> OrmResult<ExecuteResult>;

    /// 以多组参数重复执行同一语句，返回受影响总行数
    async fn execute_many(&self, sql: &str, param_sets: &[Vec<DataValue>]) -> OrmResult<u64>;

    /// 查询单行
    async fn fetch_one(&self, stmt: &Statement) -> OrmResult<Option<Row>>;

    /// 查询多行
    async fn fetch_all(&self, stmt: &Statement) -> OrmResult<Vec<Row>>;

    /// 查询首行首列
    async fn fetch_val(&self, stmt: &Statement) -> OrmResult<DataValue>;

    /// 为当前作用域开启事务，已在事务中时创建保存点
    ///
    /// 必须在事务作用域内调用，一般通过 [`transaction`] 使用
    async fn begin(&self) -> OrmResult<()>;

    /// 提交当前作用域最内层的事务
    async fn commit(&self) -> OrmResult<()>;

    /// 回滚当前作用域最内层的事务
    async fn rollback(&self) -> OrmResult<()>;

    /// 同步丢弃作用域的整个事务（取消场景），连接归还前由 sqlx 回滚
    fn discard(&self, scope: TransactionScope);

    /// 创建 schema
    async fn create_schema(&self, schema: &str, if_not_exists: bool) -> OrmResult<()>;

    /// 删除 schema
    async fn drop_schema(&self, schema: &str, cascade: bool, if_exists: bool) -> OrmResult<()>;

    /// 该方言的默认 schema 名
    fn default_schema(&self) -> &'static str {
        self.dialect().default_schema()
    }
}

/// 未提交即被丢弃的事务守卫
struct TransactionGuard {
    db: Arc<dyn Database>,
    scope: TransactionScope,
    armed: bool,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("事务在完成前被取消，丢弃未提交的更改");
            self.db.discard(self.scope);
        }
    }
}

/// 在当前事务作用域内执行；不在作用域内时开启新的作用域
async fn in_scope<Fut, T>(scoped: impl FnOnce(TransactionScope) -> Fut) -> T
where
    Fut: Future<Output = T>,
{
    match TransactionScope::current() {
        Some(scope) => scoped(scope).await,
        None => {
            let scope = TransactionScope::next();
            scope.run(scoped(scope)).await
        }
    }
}

/// 在事务中执行闭包：成功提交，失败回滚
///
/// 嵌套调用复用外层作用域并使用保存点。闭包内通过同一任务发出的语句都在事务中执行，
/// `tokio::spawn` 出去的任务不在作用域内
pub async fn transaction<F, Fut, T>(db: &Arc<dyn Database>, f: F) -> OrmResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = OrmResult<T>>,
{
    in_scope(|scope| async move {
        db.begin().await?;
        let mut guard = TransactionGuard {
            db: db.clone(),
            scope,
            armed: true,
        };
        let result = f().await;
        guard.armed = false;
        match result {
            Ok(value) => {
                db.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = db.rollback().await {
                    warn!("事务回滚失败: {}", rollback_err);
                }
                Err(e)
            }
        }
    })
    .await
}

/// 测试模式：执行闭包后无论成功与否都回滚
pub async fn force_rollback<F, Fut, T>(db: &Arc<dyn Database>, f: F) -> OrmResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = OrmResult<T>>,
{
    in_scope(|scope| async move {
        db.begin().await?;
        let mut guard = TransactionGuard {
            db: db.clone(),
            scope,
            armed: true,
        };
        let result = f().await;
        guard.armed = false;
        db.rollback().await?;
        result
    })
    .await
}

/// 根据配置创建数据库实例（未连接）
pub fn create_database(config: &DatabaseConfig) -> OrmResult<Arc<dyn Database>> {
    config.validate()?;
    match config.db_type {
        #[cfg(feature = "sqlite-support")]
        DatabaseType::SQLite => Ok(Arc::new(SqliteDatabase::from_config(config)?)),
        #[cfg(feature = "postgres-support")]
        DatabaseType::PostgreSQL => Ok(Arc::new(PostgresDatabase::from_config(config)?)),
        #[allow(unreachable_patterns)]
        other => Err(crate::orm_error!(unsupported_db, other.as_str())),
    }
}

/// 保存点名称
pub(crate) fn savepoint_name(depth: usize) -> String {
    format!("rat_sp_{}", depth)
}
