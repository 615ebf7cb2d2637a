//! 事务作用域
//!
//! 事务属于开启它的 `transaction()` 作用域，而不是整个数据库实例。
//! 作用域标识通过 task-local 传递，作用域之外的语句直接走连接池，各自独立提交

use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "sqlx")]
use {parking_lot::Mutex, sqlx::Transaction, std::collections::HashMap, std::sync::Arc};

tokio::task_local! {
    static CURRENT_SCOPE: TransactionScope;
}

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// 事务作用域标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionScope(u64);

impl TransactionScope {
    pub(crate) fn next() -> Self {
        Self(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }

    /// 当前任务所在的事务作用域
    pub fn current() -> Option<Self> {
        CURRENT_SCOPE.try_with(|scope| *scope).ok()
    }

    /// 在该作用域内执行 future
    pub(crate) async fn run<F: std::future::Future>(self, fut: F) -> F::Output {
        CURRENT_SCOPE.scope(self, fut).await
    }
}

/// 单个作用域的事务状态，`depth` 大于 1 时内层为保存点
#[cfg(feature = "sqlx")]
pub(crate) struct TransactionState<DB: sqlx::Database> {
    pub tx: Option<Transaction<'static, DB>>,
    pub depth: usize,
}

#[cfg(feature = "sqlx")]
pub(crate) type TransactionSlot<DB> = Arc<tokio::sync::Mutex<TransactionState<DB>>>;

/// 按作用域保存的活动事务
#[cfg(feature = "sqlx")]
pub(crate) struct TransactionSlots<DB: sqlx::Database> {
    slots: Mutex<HashMap<TransactionScope, TransactionSlot<DB>>>,
}

#[cfg(feature = "sqlx")]
impl<DB: sqlx::Database> TransactionSlots<DB> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, scope: TransactionScope) -> Option<TransactionSlot<DB>> {
        self.slots.lock().get(&scope).cloned()
    }

    /// 当前作用域的事务，作用域之外或未开启事务时为 None
    pub fn current(&self) -> Option<TransactionSlot<DB>> {
        TransactionScope::current().and_then(|scope| self.get(scope))
    }

    pub fn insert(&self, scope: TransactionScope, tx: Transaction<'static, DB>) {
        let state = TransactionState {
            tx: Some(tx),
            depth: 1,
        };
        self.slots
            .lock()
            .insert(scope, Arc::new(tokio::sync::Mutex::new(state)));
    }

    /// 移除作用域的事务；最后一个引用释放时 sqlx 在连接归还前回滚
    pub fn remove(&self, scope: TransactionScope) -> bool {
        self.slots.lock().remove(&scope).is_some()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// 要求调用方位于事务作用域内
#[cfg(feature = "sqlx")]
pub(crate) fn require_scope() -> crate::error::OrmResult<TransactionScope> {
    TransactionScope::current()
        .ok_or_else(|| crate::orm_error!(query, "事务操作必须在 transaction() 作用域内执行"))
}
