//! 进度事件总线：按任务 ID 把事件分发给订阅者。
//!
//! 订阅表是多个传输协程之间唯一共享的状态，所有修改都在锁内串行完成。
//! 每个任务还有一把分发锁，`close` 会等正在进行的分发结束后才返回，
//! 之后该任务的事件一律丢弃。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::models::{ProgressEvent, TaskId};

pub type EventHandler = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

// 取消订阅凭证，可以重复使用
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    task_id: TaskId,
    id: u64,
}

impl Subscription {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

struct Topic {
    closed: AtomicBool,
    handlers: Mutex<Vec<(u64, EventHandler)>>,
    dispatch: Mutex<()>,
}

impl Topic {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            dispatch: Mutex::new(()),
        }
    }
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<TaskId, Arc<Topic>>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct ProgressEventBus {
    inner: Arc<BusInner>,
}

// 处理器 panic 不应让总线永久不可用
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProgressEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅某个任务的事件，只会收到订阅之后发布的事件。
    ///
    /// 处理器在发布方的上下文中同步执行，不要在处理器里同步取消同一个任务。
    pub fn subscribe<F>(&self, task_id: TaskId, handler: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = lock(&self.inner.topics);
        let topic = topics
            .entry(task_id)
            .or_insert_with(|| Arc::new(Topic::new()));
        lock(&topic.handlers).push((id, Arc::new(handler)));

        debug!("订阅任务事件: {} (订阅号 {})", task_id, id);
        Subscription { task_id, id }
    }

    // 以通道形式订阅，适合异步消费者
    pub fn subscribe_channel(
        &self,
        task_id: TaskId,
    ) -> (Subscription, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(task_id, move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// 取消订阅，幂等；返回本次是否真正移除了处理器
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut topics = lock(&self.inner.topics);
        let Some(topic) = topics.get(&subscription.task_id).cloned() else {
            return false;
        };

        let (removed, now_empty) = {
            let mut handlers = lock(&topic.handlers);
            let before = handlers.len();
            handlers.retain(|(id, _)| *id != subscription.id);
            (handlers.len() != before, handlers.is_empty())
        };

        if now_empty {
            topics.remove(&subscription.task_id);
        }
        removed
    }

    /// 发布事件，返回收到事件的处理器数量
    pub fn publish(&self, event: &ProgressEvent) -> usize {
        let Some(topic) = lock(&self.inner.topics).get(&event.task_id).cloned() else {
            trace!("任务 {} 没有订阅者，丢弃事件", event.task_id);
            return 0;
        };

        let _dispatch = lock(&topic.dispatch);
        if topic.closed.load(Ordering::Acquire) {
            return 0;
        }

        let handlers: Vec<EventHandler> = lock(&topic.handlers)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// 关闭任务的事件流并移除全部订阅。
    ///
    /// 返回时正在进行的分发已经结束，之后不会再有事件送达。
    pub fn close(&self, task_id: TaskId) {
        let removed = lock(&self.inner.topics).remove(&task_id);
        if let Some(topic) = removed {
            topic.closed.store(true, Ordering::Release);
            drop(lock(&topic.dispatch));
            debug!("关闭任务事件流: {}", task_id);
        }
    }

    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        lock(&self.inner.topics)
            .get(&task_id)
            .map(|topic| lock(&topic.handlers).len())
            .unwrap_or(0)
    }
}
