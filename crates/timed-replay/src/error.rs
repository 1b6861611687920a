//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义重放阶段对外暴露的错误语义：构造期的配置错误、运行期的上游失败与内部不变量破坏；
//! - 负延迟不是错误（在延迟计算阶段被钳制为零），因此这里没有对应变体。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error`；
//! - 每个变体提供稳定错误码（`replay.*`），便于宿主统一映射告警与指标。

use thiserror::Error;

use crate::state::{InvalidTransition, ReplaySignal, ReplayState};

/// 构造期配置错误。
///
/// # 教案式说明
/// - **意图 (Why)**：加速因子 `≤ 0` 会导致除零或负等待，必须在构造时拒绝，而不是在运行期静默产生错误节奏；
/// - **契约 (What)**：由 [`crate::TimedReplayBuilder::build`] 与 [`crate::ReplayConfig::validate`] 返回，返回后不会产生任何重放实例。
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// 加速因子非有限值或不大于零。
    #[error("acceleration factor must be finite and greater than zero, got {factor}")]
    InvalidAcceleration { factor: f64 },

    /// 未提供时间戳抽取函数。
    #[error("a timestamp extractor is required to build a replay")]
    MissingExtractor,

    /// 未注入时钟且未启用 `runtime-tokio` Feature。
    #[error("no clock was supplied and the `runtime-tokio` feature is disabled")]
    MissingClock,
}

impl ConfigError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidAcceleration { .. } => "replay.config.acceleration",
            ConfigError::MissingExtractor => "replay.config.extractor",
            ConfigError::MissingClock => "replay.config.clock",
        }
    }
}

/// 时间戳抽取失败。
///
/// 抽取函数理应对流中任何值都成立；一旦失败即视为致命的上游错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("timestamp extraction failed: {reason}")]
pub struct ExtractError {
    reason: String,
}

impl ExtractError {
    /// 以可读原因构造抽取错误。
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// 失败原因。
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// 重放运行期错误。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“事件源报告的错误”“抽取函数失败”“内部状态机被误用”三类故障，便于宿主决定是否重试上游；
/// - **契约 (What)**：
///   - 任一错误只会在输出流中出现一次，随后流立即结束，不再交付任何记录；
///   - 重放阶段自身从不重试，重试策略归属事件源；
///   - `E` 为上游流的错误类型，原样保留在 [`ReplayError::Upstream`] 中。
/// - **风险 (Trade-offs)**：`InvariantViolation` 在正确实现中不可达，出现即代表内部缺陷，应按致命错误处理。
#[derive(Debug, Error)]
pub enum ReplayError<E> {
    /// 上游事件源报告错误。
    #[error("upstream source failed: {0}")]
    Upstream(#[source] E),

    /// 第 `index` 条记录（从 0 开始）的时间戳抽取失败。
    #[error("record #{index} could not be timestamped")]
    Extraction {
        index: u64,
        #[source]
        source: ExtractError,
    },

    /// 状态机收到当前状态不允许的信号。
    #[error("replay state machine rejected {signal:?} while {from:?}")]
    InvariantViolation {
        from: ReplayState,
        signal: ReplaySignal,
    },
}

impl<E> ReplayError<E> {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ReplayError::Upstream(_) => "replay.upstream",
            ReplayError::Extraction { .. } => "replay.extract",
            ReplayError::InvariantViolation { .. } => "replay.invariant",
        }
    }

    /// 是否属于上游失败（事件源错误或抽取失败）。
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ReplayError::Upstream(_) | ReplayError::Extraction { .. }
        )
    }
}

impl<E> From<InvalidTransition> for ReplayError<E> {
    fn from(value: InvalidTransition) -> Self {
        ReplayError::InvariantViolation {
            from: value.from,
            signal: value.signal,
        }
    }
}
