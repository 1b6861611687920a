//! 重放入口：把时间戳抽取、成对扫描、延迟计算与延迟闸门串成一个顺序控制循环。
//!
//! # 执行模型（How）
//! - 每条输出记录对应一次循环：拉取一条上游记录 → 抽取时间戳 → 推进扫描 → 计算延迟 → 闸门等待 → 交付；
//! - 只有下游轮询下一条输出时才向上游拉取，因此同一时刻最多只有一条记录在途；
//! - 循环被包装为 [`ReplayStream`]，其状态与统计通过共享的监控点对外可见。
//!
//! # 终止语义（What）
//! - 上游结束：状态进入 `Completed`，流结束；
//! - 上游错误或抽取失败：交付一次错误后流结束，状态为 `Failed`；
//! - 取消（令牌被取消或流被丢弃）：在途等待立即放弃，定时器随 Future 一起释放，状态为 `Cancelled`。

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::cancellation::Cancellation;
use crate::config::{Acceleration, ReplayConfig};
use crate::delay::DelayCalculator;
use crate::error::{ConfigError, ExtractError, ReplayError};
use crate::extract::TimestampExtractor;
use crate::gate::{DelayGate, GateOutcome};
use crate::record::{DelayOutcome, PendingEmission};
use crate::scan::PairwiseScan;
use crate::state::{ReplayMonitor, ReplaySignal, ReplayState, ReplayStateMachine, ReplayStats};
use crate::time::Clock;

/// 按原始到达间隔重放记录流的变换阶段。
///
/// # 教案式说明
/// - **意图 (Why)**：把录制下来的事件轨迹以“仿佛实时发生”的节奏交给模拟器、压测器或测试夹具，
///   并允许按加速因子整体压缩或拉长；
/// - **契约 (What)**：
///   - 通过 [`TimedReplay::builder`] 构造，构造期完成全部参数校验；
///   - 同一个 `TimedReplay` 可多次调用 [`TimedReplay::replay`]，每次得到互不干扰的流实例；
///   - 输出与输入值相同、顺序相同、数量相同，每条在其延迟过去后交付；
/// - **风险 (Trade-offs)**：延迟按顺序累加，墙钟总耗时为延迟之和再加处理开销，不做漂移补偿。
pub struct TimedReplay<T> {
    extractor: TimestampExtractor<T>,
    acceleration: Acceleration,
    clock: Arc<dyn Clock>,
    cancellation: Option<Cancellation>,
}

impl<T> TimedReplay<T>
where
    T: Send + 'static,
{
    /// 创建构建器。
    pub fn builder() -> TimedReplayBuilder<T> {
        TimedReplayBuilder::default()
    }

    /// 生效的加速因子。
    pub fn acceleration(&self) -> Acceleration {
        self.acceleration
    }

    /// 重放可能失败的上游流。
    ///
    /// 若构建时注入了取消令牌，返回的流共享该令牌；否则为该流单独创建一个。
    pub fn replay<S, E>(&self, source: S) -> ReplayStream<T, E>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Send + 'static,
    {
        let cancellation = self
            .cancellation
            .as_ref()
            .map(Cancellation::child)
            .unwrap_or_default();
        let monitor = Arc::new(ReplayMonitor::default());
        let driver = ReplayDriver {
            source: source.boxed(),
            extractor: self.extractor.clone(),
            scan: PairwiseScan::new(),
            calculator: DelayCalculator::new(self.acceleration),
            gate: DelayGate::new(Arc::clone(&self.clock), cancellation.clone()),
            machine: ReplayStateMachine::new(Arc::clone(&monitor)),
            monitor: Arc::clone(&monitor),
            clock: Arc::clone(&self.clock),
            started: self.clock.now(),
            index: 0,
        };
        debug!(
            acceleration = self.acceleration.factor(),
            "timed replay started"
        );

        let inner = stream::unfold(driver, |mut driver| async move {
            let item = driver.step().await?;
            Some((item, driver))
        })
        .fuse()
        .boxed();

        ReplayStream {
            inner,
            monitor,
            cancellation,
        }
    }

    /// 重放不会失败的上游流。
    pub fn replay_infallible<S>(&self, source: S) -> ReplayStream<T, Infallible>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.replay(source.map(Ok::<T, Infallible>))
    }

    /// 不等待地计算一组记录的发射计划，用于预估重放时长或离线校验节奏。
    ///
    /// 抽取失败时返回 [`ReplayError::Extraction`]，计划在失败处截断。
    pub fn schedule<I>(&self, items: I) -> Result<Vec<PendingEmission<T>>, ReplayError<Infallible>>
    where
        I: IntoIterator<Item = T>,
    {
        let calculator = DelayCalculator::new(self.acceleration);
        let mut scan = PairwiseScan::new();
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| -> Result<_, ReplayError<Infallible>> {
                let record = self
                    .extractor
                    .stamp(item)
                    .map_err(|source| ReplayError::Extraction {
                        index: index as u64,
                        source,
                    })?;
                Ok(calculator.compute(scan.advance(record)))
            })
            .collect()
    }
}

impl<T> Clone for TimedReplay<T> {
    fn clone(&self) -> Self {
        Self {
            extractor: self.extractor.clone(),
            acceleration: self.acceleration,
            clock: Arc::clone(&self.clock),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<T> fmt::Debug for TimedReplay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedReplay")
            .field("acceleration", &self.acceleration)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

/// [`TimedReplay`] 构建器。
///
/// # 契约说明（What）
/// - `timestamp` / `try_timestamp` 二选一，必填；后调用者覆盖先调用者；
/// - `acceleration` 与 `config` 均写入同一加速因子，后调用者覆盖先调用者；
/// - `clock` 缺省为 [`crate::time::SystemClock`]（需 `runtime-tokio` Feature）；
/// - `build` 校验全部参数，失败返回 [`ConfigError`]。
pub struct TimedReplayBuilder<T> {
    extractor: Option<TimestampExtractor<T>>,
    config: ReplayConfig,
    clock: Option<Arc<dyn Clock>>,
    cancellation: Option<Cancellation>,
}

impl<T> Default for TimedReplayBuilder<T> {
    fn default() -> Self {
        Self {
            extractor: None,
            config: ReplayConfig::default(),
            clock: None,
            cancellation: None,
        }
    }
}

impl<T> TimedReplayBuilder<T>
where
    T: Send + 'static,
{
    /// 设置不会失败的时间戳抽取函数。
    pub fn timestamp<F>(mut self, extract: F) -> Self
    where
        F: Fn(&T) -> i64 + Send + Sync + 'static,
    {
        self.extractor = Some(TimestampExtractor::infallible(extract));
        self
    }

    /// 设置可能失败的时间戳抽取函数。
    pub fn try_timestamp<F>(mut self, extract: F) -> Self
    where
        F: Fn(&T) -> Result<i64, ExtractError> + Send + Sync + 'static,
    {
        self.extractor = Some(TimestampExtractor::fallible(extract));
        self
    }

    /// 设置加速因子（默认 `1.0`）。
    pub fn acceleration(mut self, factor: f64) -> Self {
        self.config.acceleration = factor;
        self
    }

    /// 采用宿主配置。
    pub fn config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    /// 注入时钟。
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 注入取消令牌，由此构造的所有流共享它。
    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// 校验参数并构造 [`TimedReplay`]。
    pub fn build(self) -> Result<TimedReplay<T>, ConfigError> {
        let acceleration = self.config.validate()?;
        let extractor = self.extractor.ok_or(ConfigError::MissingExtractor)?;
        let clock = match self.clock {
            Some(clock) => clock,
            None => default_clock()?,
        };
        Ok(TimedReplay {
            extractor,
            acceleration,
            clock,
            cancellation: self.cancellation,
        })
    }
}

#[cfg(feature = "runtime-tokio")]
fn default_clock() -> Result<Arc<dyn Clock>, ConfigError> {
    Ok(Arc::new(crate::time::SystemClock))
}

#[cfg(not(feature = "runtime-tokio"))]
fn default_clock() -> Result<Arc<dyn Clock>, ConfigError> {
    Err(ConfigError::MissingClock)
}

/// 重放输出流。
///
/// # 契约说明（What）
/// - 产出 `Ok(value)` 的顺序与数量与输入一致；产出 `Err` 后流结束；
/// - 结束后继续轮询始终返回 `None`；
/// - 丢弃该流等价于取消：在途等待与其定时器随之释放。
pub struct ReplayStream<T, E> {
    inner: BoxStream<'static, Result<T, ReplayError<E>>>,
    monitor: Arc<ReplayMonitor>,
    cancellation: Cancellation,
}

impl<T, E> ReplayStream<T, E> {
    /// 当前状态。
    pub fn state(&self) -> ReplayState {
        self.monitor.state()
    }

    /// 运行统计快照。
    pub fn stats(&self) -> ReplayStats {
        self.monitor.stats()
    }

    /// 控制该流的取消令牌。
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// 请求取消；返回 `true` 表示本次调用首次触发取消。
    pub fn cancel(&self) -> bool {
        self.cancellation.cancel()
    }
}

impl<T, E> Stream for ReplayStream<T, E> {
    type Item = Result<T, ReplayError<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T, E> fmt::Debug for ReplayStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayStream")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// 顺序控制循环的状态，一次 `step` 处理并交付一条记录。
struct ReplayDriver<T, E> {
    source: BoxStream<'static, Result<T, E>>,
    extractor: TimestampExtractor<T>,
    scan: PairwiseScan,
    calculator: DelayCalculator,
    gate: DelayGate,
    machine: ReplayStateMachine,
    monitor: Arc<ReplayMonitor>,
    clock: Arc<dyn Clock>,
    started: Instant,
    index: u64,
}

impl<T, E> ReplayDriver<T, E> {
    async fn step(&mut self) -> Option<Result<T, ReplayError<E>>> {
        if self.machine.state().is_terminal() {
            return None;
        }
        match self.next_value().await {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(err) => {
                warn!(
                    index = self.index,
                    code = err.code(),
                    upstream = err.is_upstream(),
                    "timed replay failed"
                );
                self.machine.fail();
                Some(Err(err))
            }
        }
    }

    async fn next_value(&mut self) -> Result<Option<T>, ReplayError<E>> {
        let pulled = match self.gate.interruptible(self.source.next()).await {
            Some(pulled) => pulled,
            None => return self.cancelled(),
        };

        let item = match pulled {
            None => {
                self.machine.on_signal(ReplaySignal::UpstreamEnded)?;
                debug!(
                    emitted = self.index,
                    last_timestamp = ?self.scan.predecessor().timestamp(),
                    elapsed = ?self.clock.now().saturating_duration_since(self.started),
                    "timed replay completed"
                );
                return Ok(None);
            }
            Some(Err(err)) => return Err(ReplayError::Upstream(err)),
            Some(Ok(item)) => item,
        };

        let record = self
            .extractor
            .stamp(item)
            .map_err(|source| ReplayError::Extraction {
                index: self.index,
                source,
            })?;
        let emission = self.calculator.compute(self.scan.advance(record));
        if let DelayOutcome::Clamped { raw_millis } = emission.outcome() {
            trace!(
                index = self.index,
                raw_millis, "out-of-order timestamp, releasing without delay"
            );
            self.monitor.record_clamped();
        }

        self.machine.on_signal(ReplaySignal::ItemArrived)?;
        if self.gate.hold(emission.delay()).await == GateOutcome::Cancelled {
            return self.cancelled();
        }
        self.machine.on_signal(ReplaySignal::TimerFired)?;

        let delay_ms = emission.delay_millis();
        debug!(
            index = self.index,
            timestamp = emission.timestamp(),
            delay_ms,
            "replay item released"
        );
        self.monitor.record_emitted(delay_ms);
        self.machine.on_signal(ReplaySignal::ItemReleased)?;
        self.index += 1;
        Ok(Some(emission.into_value()))
    }

    fn cancelled(&mut self) -> Result<Option<T>, ReplayError<E>> {
        self.machine.on_signal(ReplaySignal::CancelRequested)?;
        debug!(emitted = self.index, "timed replay cancelled");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;
    use futures::task::noop_waker;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn replay_with(clock: &MockClock, factor: f64) -> TimedReplay<i64> {
        TimedReplay::builder()
            .timestamp(|ts: &i64| *ts)
            .acceleration(factor)
            .clock(Arc::new(clock.clone()))
            .build()
            .expect("valid replay configuration")
    }

    #[test]
    fn build_rejects_missing_extractor() {
        let err = TimedReplay::<i64>::builder()
            .clock(Arc::new(MockClock::new()))
            .build()
            .expect_err("extractor is mandatory");
        assert_eq!(err, ConfigError::MissingExtractor);
    }

    #[test]
    fn build_rejects_non_positive_acceleration() {
        let err = TimedReplay::builder()
            .timestamp(|ts: &i64| *ts)
            .acceleration(0.0)
            .clock(Arc::new(MockClock::new()))
            .build()
            .expect_err("zero acceleration is invalid");
        assert_eq!(err, ConfigError::InvalidAcceleration { factor: 0.0 });
    }

    #[test]
    fn schedule_reports_waits_without_sleeping() {
        let clock = MockClock::new();
        let plan = replay_with(&clock, 1.0)
            .schedule([100, 150, 400, 380])
            .expect("infallible extractor");
        let waits: Vec<_> = plan.iter().map(PendingEmission::delay_millis).collect();
        assert_eq!(waits, vec![0, 50, 250, 0]);
        assert_eq!(clock.pending_sleepers(), 0);
    }

    #[test]
    fn stream_stays_in_lockstep_with_virtual_clock() {
        let clock = MockClock::new();
        let mut stream = replay_with(&clock, 1.0).replay_infallible(stream::iter([0_i64, 100]));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(matches!(
            stream.poll_next_unpin(&mut cx),
            Poll::Ready(Some(Ok(0)))
        ));
        assert_eq!(stream.state(), ReplayState::Idle);

        assert!(stream.poll_next_unpin(&mut cx).is_pending());
        assert_eq!(stream.state(), ReplayState::Waiting);

        clock.advance(Duration::from_millis(100));
        assert!(matches!(
            stream.poll_next_unpin(&mut cx),
            Poll::Ready(Some(Ok(100)))
        ));
        assert!(matches!(
            stream.poll_next_unpin(&mut cx),
            Poll::Ready(None)
        ));
        assert_eq!(stream.state(), ReplayState::Completed);
        assert_eq!(
            stream.stats(),
            ReplayStats {
                emitted: 2,
                clamped: 0,
                total_delay: Duration::from_millis(100),
            }
        );
    }

    #[traced_test]
    #[test]
    fn clamped_and_released_items_are_logged() {
        let clock = MockClock::new();
        let mut stream = replay_with(&clock, 1.0).replay_infallible(stream::iter([400_i64, 380]));
        let out: Vec<_> = futures::executor::block_on(stream.by_ref().collect::<Vec<_>>());

        assert_eq!(out.len(), 2);
        assert_eq!(stream.stats().clamped, 1);
        assert!(logs_contain("out-of-order timestamp"));
        assert!(logs_contain("replay item released"));
        assert!(logs_contain("timed replay completed"));
        assert!(logs_contain("last_timestamp=Some(380)"));
    }

    #[traced_test]
    #[test]
    fn extraction_failure_is_logged_as_upstream() {
        let replay = TimedReplay::builder()
            .try_timestamp(|ts: &i64| {
                if *ts < 0 {
                    Err(ExtractError::new("negative capture time"))
                } else {
                    Ok(*ts)
                }
            })
            .clock(Arc::new(MockClock::new()))
            .build()
            .expect("valid replay configuration");
        let mut stream = replay.replay_infallible(stream::iter([5_i64, -1]));
        let out: Vec<_> = futures::executor::block_on(stream.by_ref().collect::<Vec<_>>());

        assert!(matches!(out.as_slice(), [Ok(5), Err(ReplayError::Extraction { index: 1, .. })]));
        assert_eq!(stream.state(), ReplayState::Failed);
        assert!(logs_contain("timed replay failed"));
        assert!(logs_contain("code=\"replay.extract\""));
        assert!(logs_contain("upstream=true"));
    }
}
