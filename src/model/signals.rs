//! 模型生命周期信号
//!
//! 每个模型各自拥有六个可独立订阅的广播点，订阅者按订阅顺序依次 await，
//! 任一订阅者失败都会中止当前操作

use super::{ModelClass, ModelInstance};
use crate::error::OrmResult;
use crate::types::Row;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 信号触发时传给订阅者的上下文
#[derive(Clone)]
pub struct SignalContext {
    /// 触发信号的模型
    pub model: Arc<ModelClass>,
    /// 实例快照
    pub instance: ModelInstance,
    /// 待更新的字段（仅 update 信号）
    pub changes: Option<Row>,
}

type Receiver = Arc<dyn Fn(SignalContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 单个信号
#[derive(Default)]
pub struct Signal {
    receivers: RwLock<Vec<(usize, Receiver)>>,
    next_id: AtomicUsize,
}

impl Signal {
    /// 订阅信号，返回订阅ID
    pub fn connect<F, Fut>(&self, receiver: F) -> usize
    where
        F: Fn(SignalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let receiver: Receiver = Arc::new(move |ctx| Box::pin(receiver(ctx)));
        self.receivers.write().push((id, receiver));
        id
    }

    /// 取消订阅
    pub fn disconnect(&self, id: usize) -> bool {
        let mut receivers = self.receivers.write();
        let before = receivers.len();
        receivers.retain(|(rid, _)| *rid != id);
        receivers.len() != before
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.read().len()
    }

    /// 依次通知所有订阅者
    pub async fn send(&self, ctx: SignalContext) -> OrmResult<()> {
        let receivers: Vec<Receiver> = self
            .receivers
            .read()
            .iter()
            .map(|(_, r)| r.clone())
            .collect();
        for receiver in receivers {
            receiver(ctx.clone()).await?;
        }
        Ok(())
    }
}

/// 模型的全部生命周期信号
#[derive(Default)]
pub struct Signals {
    pub pre_save: Signal,
    pub post_save: Signal,
    pub pre_update: Signal,
    pub post_update: Signal,
    pub pre_delete: Signal,
    pub post_delete: Signal,
}
