//! 重放实例的状态机与运行统计。
//!
//! # 状态图（What）
//! ```text
//! Idle --ItemArrived--> Waiting --TimerFired--> Emitting --ItemReleased--> Idle
//! Idle --UpstreamEnded--> Completed
//! Idle | Waiting | Emitting --CancelRequested--> Cancelled
//! Idle | Waiting | Emitting --Failure--> Failed
//! ```
//! `Completed`、`Cancelled`、`Failed` 为终态；终态下再次收到取消信号视为空操作，其余信号均为非法跃迁。
//!
//! # 设计取舍（Trade-offs）
//! - 状态机本身是 `&mut self` 驱动的顺序结构，不做同步；对外可见的快照通过原子量发布，
//!   使 [`crate::ReplayStream::state`] 在任意线程读取时无需加锁。

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

/// 重放实例所处的阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplayState {
    /// 等待下一条上游记录。
    Idle,
    /// 当前记录正在延迟闸门中等待。
    Waiting,
    /// 等待结束，记录正在交付下游。
    Emitting,
    /// 上游结束且没有待发射记录。
    Completed,
    /// 下游请求取消。
    Cancelled,
    /// 上游失败或抽取失败。
    Failed,
}

impl ReplayState {
    /// 是否为终态。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReplayState::Completed | ReplayState::Cancelled | ReplayState::Failed
        )
    }

    /// 根据信号计算下一状态；`None` 表示非法跃迁。
    pub fn on(self, signal: ReplaySignal) -> Option<ReplayState> {
        use ReplaySignal::*;
        use ReplayState::*;

        match (self, signal) {
            (Idle, ItemArrived) => Some(Waiting),
            (Waiting, TimerFired) => Some(Emitting),
            (Emitting, ItemReleased) => Some(Idle),
            (Idle, UpstreamEnded) => Some(Completed),
            (Idle | Waiting | Emitting, CancelRequested) => Some(Cancelled),
            (Idle | Waiting | Emitting, Failure) => Some(Failed),
            (Completed | Cancelled | Failed, CancelRequested) => Some(self),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            ReplayState::Idle => 0,
            ReplayState::Waiting => 1,
            ReplayState::Emitting => 2,
            ReplayState::Completed => 3,
            ReplayState::Cancelled => 4,
            ReplayState::Failed => 5,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ReplayState::Idle,
            1 => ReplayState::Waiting,
            2 => ReplayState::Emitting,
            3 => ReplayState::Completed,
            4 => ReplayState::Cancelled,
            _ => ReplayState::Failed,
        }
    }
}

/// 驱动状态机的信号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplaySignal {
    /// 上游交付了一条记录，其延迟已计算完毕。
    ItemArrived,
    /// 延迟闸门的定时器到期（零延迟时立即视为到期）。
    TimerFired,
    /// 记录已交付下游。
    ItemReleased,
    /// 上游结束。
    UpstreamEnded,
    /// 下游请求取消。
    CancelRequested,
    /// 上游或抽取失败。
    Failure,
}

/// 状态推进结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateAdvance {
    /// 状态未变化（例如终态下重复取消）。
    Noop { state: ReplayState },
    /// 发生跃迁。
    Transition { from: ReplayState, to: ReplayState },
}

/// 非法跃迁描述。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ReplayState,
    pub signal: ReplaySignal,
}

/// 运行统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// 已交付下游的记录数。
    pub emitted: u64,
    /// 因时间戳乱序被钳制为零延迟的记录数。
    pub clamped: u64,
    /// 已完成等待的累计延迟。
    pub total_delay: Duration,
}

/// 状态与统计的共享发布点，重放驱动写入，[`crate::ReplayStream`] 读取。
#[derive(Debug, Default)]
pub(crate) struct ReplayMonitor {
    state: AtomicU8,
    emitted: AtomicU64,
    clamped: AtomicU64,
    total_delay_ms: AtomicU64,
}

impl ReplayMonitor {
    pub(crate) fn state(&self) -> ReplayState {
        ReplayState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn stats(&self) -> ReplayStats {
        ReplayStats {
            emitted: self.emitted.load(Ordering::Acquire),
            clamped: self.clamped.load(Ordering::Acquire),
            total_delay: Duration::from_millis(self.total_delay_ms.load(Ordering::Acquire)),
        }
    }

    pub(crate) fn record_clamped(&self) {
        self.clamped.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_emitted(&self, delay_millis: u64) {
        self.emitted.fetch_add(1, Ordering::AcqRel);
        // 累计值只用于观测，溢出时饱和即可。
        let _ = self
            .total_delay_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(total.saturating_add(delay_millis))
            });
    }

    fn publish(&self, state: ReplayState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }
}

/// 单个重放实例的状态机。
#[derive(Debug)]
pub(crate) struct ReplayStateMachine {
    state: ReplayState,
    monitor: Arc<ReplayMonitor>,
}

impl ReplayStateMachine {
    pub(crate) fn new(monitor: Arc<ReplayMonitor>) -> Self {
        monitor.publish(ReplayState::Idle);
        Self {
            state: ReplayState::Idle,
            monitor,
        }
    }

    pub(crate) fn state(&self) -> ReplayState {
        self.state
    }

    pub(crate) fn on_signal(
        &mut self,
        signal: ReplaySignal,
    ) -> Result<StateAdvance, InvalidTransition> {
        let from = self.state;
        let to = from.on(signal).ok_or(InvalidTransition { from, signal })?;
        if to == from {
            return Ok(StateAdvance::Noop { state: from });
        }
        self.state = to;
        self.monitor.publish(to);
        Ok(StateAdvance::Transition { from, to })
    }

    /// 强制进入 `Failed`，用于错误已经产生、不再需要校验跃迁的路径。
    pub(crate) fn fail(&mut self) {
        self.state = ReplayState::Failed;
        self.monitor.publish(ReplayState::Failed);
    }
}
