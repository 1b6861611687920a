use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{Either, select};

use crate::cancellation::Cancellation;
use crate::time::Clock;

/// 延迟闸门一次等待的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// 等待结束，可以放行记录。
    Released,
    /// 等待期间收到取消，记录不再交付。
    Cancelled,
}

/// 延迟闸门：在放行记录前挂起给定时长，并随时响应取消。
///
/// # 教案式说明
/// - **意图 (Why)**：重放的唯一挂起点；等待必须可取消，且取消后立即释放定时器资源；
/// - **逻辑 (How)**：
///   - 进入前先检查取消位，已取消则不再申请定时器；
///   - 零时长直接放行，不向时钟申请定时器；
///   - 否则以 `select(cancelled, sleep)` 竞争，取消分支优先，返回时未完成的 `sleep` 随之被丢弃；
/// - **契约 (What)**：一次只处理一条记录，调用方必须等 `hold` 返回后才能计算下一条的延迟。
#[derive(Clone)]
pub struct DelayGate {
    clock: Arc<dyn Clock>,
    cancellation: Cancellation,
}

impl DelayGate {
    /// 以时钟与取消令牌构造闸门。
    pub fn new(clock: Arc<dyn Clock>, cancellation: Cancellation) -> Self {
        Self {
            clock,
            cancellation,
        }
    }

    /// 挂起 `delay` 后放行；期间被取消则返回 [`GateOutcome::Cancelled`]。
    pub async fn hold(&self, delay: Duration) -> GateOutcome {
        if self.cancellation.is_cancelled() {
            return GateOutcome::Cancelled;
        }
        if delay.is_zero() {
            return GateOutcome::Released;
        }

        let sleep = self.clock.sleep(delay);
        match select(self.cancellation.cancelled(), sleep).await {
            Either::Left(_) => GateOutcome::Cancelled,
            Either::Right(_) => GateOutcome::Released,
        }
    }

    /// 在取消前等待 `future` 完成；取消时返回 `None` 并丢弃 `future`。
    pub async fn interruptible<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future + Unpin,
    {
        if self.cancellation.is_cancelled() {
            return None;
        }
        match select(self.cancellation.cancelled(), future).await {
            Either::Left(_) => None,
            Either::Right((output, _)) => Some(output),
        }
    }
}

impl std::fmt::Debug for DelayGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayGate")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}
