use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// 时钟返回的统一延迟 Future 类型。
///
/// # 契约说明（What）
/// - Future 完成表示指定持续时间已经过去；
/// - 在完成前丢弃 Future 即取消该次等待，实现必须随之释放定时器资源；
/// - 需满足 `Send + 'static`，以便重放流整体可以跨任务移动。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 可注入的时钟：延迟闸门只通过它获取时间和一次性唤醒。
///
/// # 设计背景（Why）
/// - 重放节奏完全由“等待多久”决定，直接调用运行时计时器会让测试无法复现；
/// - 通过 trait 注入，生产环境使用 Tokio 计时器，测试使用可控的虚拟时间。
///
/// # 接口约束（What）
/// - `now`：返回当前单调时间点；
/// - `sleep`：返回在给定持续时间后完成的 Future，完成前至少等待该时长；
/// - 丢弃 `sleep` 返回的 Future 必须等价于取消该定时器。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;

    /// 返回一个在指定持续时间后完成的睡眠 Future。
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 委托给 Tokio 计时器的生产时钟。
///
/// # 契约说明（What）
/// - `sleep` 必须在启用 `time` 驱动的 Tokio 运行时内轮询，否则 Tokio 会 panic；
/// - `now` 读取 [`tokio::time::Instant`]，因此在 `tokio::time::pause` 下同样遵循暂停后的虚拟时间；
/// - 等待期间不占用线程，丢弃 Future 即从时间轮中注销。
#[cfg(feature = "runtime-tokio")]
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

#[cfg(feature = "runtime-tokio")]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// 虚拟时钟：通过手动推进时间复现确定性的唤醒序列。
///
/// # 行为概览（How）
/// - 单把互斥锁保护全部状态：自构造起的偏移量 `elapsed` 与按登记序号排列的睡眠表；
/// - `advance` 增加偏移量，把到期条目移出睡眠表并在释放锁后依次唤醒；
/// - 睡眠 Future 在完成或被丢弃时从睡眠表移除，[`MockClock::pending_sleepers`] 因而可以断言“取消后没有残留定时器”。
///
/// # 契约说明（What）
/// - `advance` 可多次调用，偏移量单调增加；
/// - 零时长的睡眠在首次轮询时即完成；
/// - 唤醒顺序与登记顺序一致。
#[derive(Clone, Debug)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

impl MockClock {
    /// 创建以当前系统时间为基准的虚拟时钟。
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                next_id: 0,
                sleepers: BTreeMap::new(),
            })),
        }
    }

    /// 手动推进虚拟时钟，并在返回前唤醒所有到期的睡眠。
    pub fn advance(&self, delta: Duration) {
        if delta.is_zero() {
            return;
        }

        let due = {
            let mut state = lock_state(&self.state);
            state.elapsed = state.elapsed.saturating_add(delta);
            state.drain_due()
        };
        for waker in due {
            waker.wake();
        }
    }

    /// 自构造以来累计推进的虚拟时间。
    pub fn elapsed(&self) -> Duration {
        lock_state(&self.state).elapsed
    }

    /// 仍在等待到期的睡眠数量。
    pub fn pending_sleepers(&self) -> usize {
        lock_state(&self.state).sleepers.len()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = lock_state(&self.state);
        state.origin + state.elapsed
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let (id, deadline) = lock_state(&self.state).register(duration);
        Box::pin(MockSleep {
            clock: Arc::clone(&self.state),
            id,
            deadline,
        })
    }
}

/// 虚拟时钟状态只包含计数与登记表，持锁线程 panic 后数据仍然一致，因此直接沿用被毒化的锁。
fn lock_state(state: &Mutex<ClockState>) -> MutexGuard<'_, ClockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    elapsed: Duration,
    next_id: u64,
    sleepers: BTreeMap<u64, Sleeper>,
}

#[derive(Debug)]
struct Sleeper {
    deadline: Duration,
    waker: Option<Waker>,
}

impl ClockState {
    fn register(&mut self, duration: Duration) -> (u64, Duration) {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = self.elapsed.saturating_add(duration);
        self.sleepers.insert(
            id,
            Sleeper {
                deadline,
                waker: None,
            },
        );
        (id, deadline)
    }

    /// 移出全部到期条目，按登记顺序返回它们的 waker。
    fn drain_due(&mut self) -> Vec<Waker> {
        let elapsed = self.elapsed;
        let due: Vec<u64> = self
            .sleepers
            .iter()
            .filter(|(_, sleeper)| sleeper.deadline <= elapsed)
            .map(|(id, _)| *id)
            .collect();
        due.into_iter()
            .filter_map(|id| self.sleepers.remove(&id))
            .filter_map(|sleeper| sleeper.waker)
            .collect()
    }
}

/// 虚拟时钟的睡眠 Future；到期判定只看共享的 `elapsed`，因此被 `advance` 移出登记表后再次轮询仍会完成。
struct MockSleep {
    clock: Arc<Mutex<ClockState>>,
    id: u64,
    deadline: Duration,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock_state(&self.clock);
        if state.elapsed >= self.deadline {
            state.sleepers.remove(&self.id);
            return Poll::Ready(());
        }

        if let Some(sleeper) = state.sleepers.get_mut(&self.id) {
            match &sleeper.waker {
                Some(existing) if existing.will_wake(cx.waker()) => {}
                _ => sleeper.waker = Some(cx.waker().clone()),
            }
        }
        Poll::Pending
    }
}

impl Drop for MockSleep {
    fn drop(&mut self) {
        lock_state(&self.clock).sleepers.remove(&self.id);
    }
}
