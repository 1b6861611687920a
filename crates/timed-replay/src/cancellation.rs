use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// 取消原语，表达“下游已不再关心后续记录”。
///
/// # 设计背景（Why）
/// - 重放流在等待延迟期间可能被下游放弃，此时必须立即释放定时器并停止抽取/计算/发射；
/// - 仅靠轮询原子位需要周期性唤醒，会干扰虚拟时钟的确定性，因此额外维护 waker 登记表，在取消瞬间唤醒所有等待方。
///
/// # 逻辑解析（How）
/// - [`AtomicBool`] 记录取消位，[`Arc`] 支持多方共享；
/// - `cancel` 首次成功置位时返回 `true`，并唤醒通过 [`Cancellation::cancelled`] 登记的全部 waker；
/// - 每个 `cancelled()` Future 在登记表中占一个槽位：重复轮询原地替换 waker，Future 被丢弃时归还槽位，
///   因此共享令牌不会持有已结束任务的 waker；
/// - `child` 生成共享同一取消位的派生令牌。
///
/// # 契约说明（What）
/// - **前置条件**：构造后处于“未取消”状态；
/// - **后置条件**：`cancel` 成功后 `is_cancelled` 对所有克隆可见，且此前挂起的 `cancelled()` Future 均会被唤醒。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    waiters: Mutex<Waiters>,
}

/// 以槽位序号索引的 waker 登记表。
#[derive(Debug, Default)]
struct Waiters {
    next_slot: u64,
    slots: Vec<(u64, Waker)>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState::default()),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将令牌标记为取消。
    ///
    /// 返回 `true` 表示本次调用首次触发取消；`false` 表示此前已被取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            let slots = std::mem::take(&mut self.waiters().slots);
            for (_, waker) in slots {
                waker.wake();
            }
        }
        first
    }

    /// 派生共享同一取消位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// 返回在令牌被取消时完成的 Future。
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled {
            token: self,
            slot: None,
        }
    }

    /// 当前登记在令牌上、尚未被唤醒的等待方数量。
    pub fn waiter_count(&self) -> usize {
        self.waiters().slots.len()
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记或刷新 `slot` 对应的 waker，返回生效的槽位序号。
    fn register(&self, slot: Option<u64>, waker: &Waker) -> u64 {
        let mut waiters = self.waiters();
        if let Some(id) = slot
            && let Some((_, existing)) = waiters.slots.iter_mut().find(|(key, _)| *key == id)
        {
            if !existing.will_wake(waker) {
                *existing = waker.clone();
            }
            return id;
        }
        let id = waiters.next_slot;
        waiters.next_slot += 1;
        waiters.slots.push((id, waker.clone()));
        id
    }

    fn deregister(&self, slot: u64) {
        self.waiters().slots.retain(|(key, _)| *key != slot);
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Cancellation::cancelled`] 返回的 Future。
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled<'a> {
    token: &'a Cancellation,
    slot: Option<u64>,
}

impl Future for Cancelled<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(());
        }
        this.slot = Some(this.token.register(this.slot, cx.waker()));
        // 登记与置位之间可能发生竞争，登记后再检查一次。
        if this.token.is_cancelled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Cancelled<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.token.deregister(slot);
        }
    }
}
