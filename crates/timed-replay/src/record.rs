//! 重放管线中流转的数据模型。
//!
//! # 结构概览（What）
//! - [`TimedRecord`]：值与其毫秒时间戳的组合，由时间戳抽取阶段为每条输入创建一次；
//! - [`Predecessor`]：“前驱记录”的显式标签，`Start` 表示尚无前驱，取代按对象身份比较的哨兵；
//! - [`Pair`]：成对扫描的产物，`current` 在类型层面保证是真实记录；
//! - [`PendingEmission`]：延迟计算的产物，交给延迟闸门后即被消费。
//!
//! 以上实体均为管线局部、单一所有者，生命周期不超过产生它的那条输入。

use std::time::Duration;

/// 带毫秒时间戳的记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedRecord<T> {
    timestamp: i64,
    value: T,
}

impl<T> TimedRecord<T> {
    /// 以时间戳与值构造记录。
    pub fn new(timestamp: i64, value: T) -> Self {
        Self { timestamp, value }
    }

    /// 记录被观测到的毫秒时间戳。
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 借用记录携带的值。
    pub fn value(&self) -> &T {
        &self.value
    }

    /// 拆解为 `(timestamp, value)`。
    pub fn into_parts(self) -> (i64, T) {
        (self.timestamp, self.value)
    }
}

/// 前驱记录。
///
/// # 教案式说明
/// - **意图 (Why)**：首条记录没有可比较的前驱，必须立即发射；用枚举把这一情形变成可穷尽匹配的分支；
/// - **契约 (What)**：前驱的值在交付下游后即不再需要，因此只保留时间戳；
/// - **注意 (Trade-offs)**：`Start` 从不被发射到下游，只参与比较。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Predecessor {
    /// 尚未观测到任何记录。
    #[default]
    Start,
    /// 上一条记录的时间戳。
    Record { timestamp: i64 },
}

impl Predecessor {
    /// 前驱的时间戳；`Start` 返回 `None`。
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Predecessor::Start => None,
            Predecessor::Record { timestamp } => Some(*timestamp),
        }
    }
}

/// 相邻两条记录组成的扫描窗口。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair<T> {
    previous: Predecessor,
    current: TimedRecord<T>,
}

impl<T> Pair<T> {
    /// 构造扫描窗口；`current` 必然是真实记录。
    pub fn new(previous: Predecessor, current: TimedRecord<T>) -> Self {
        Self { previous, current }
    }

    /// 前驱。
    pub fn previous(&self) -> Predecessor {
        self.previous
    }

    /// 当前记录。
    pub fn current(&self) -> &TimedRecord<T> {
        &self.current
    }

    /// 拆解为 `(previous, current)`。
    pub fn into_parts(self) -> (Predecessor, TimedRecord<T>) {
        (self.previous, self.current)
    }
}

/// 延迟的来源，供日志与统计区分“首条”“正常间隔”“被钳制的负间隔”。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayOutcome {
    /// 首条记录，无前驱，延迟为零。
    First,
    /// 依据相邻时间差缩放得到的非负延迟。
    Paced,
    /// 缩放结果为负（时间戳乱序），延迟被钳制为零；`raw_millis` 为原始时间差。
    Clamped { raw_millis: i64 },
}

/// 待发射的记录及其等待时长。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEmission<T> {
    delay: Duration,
    timestamp: i64,
    outcome: DelayOutcome,
    value: T,
}

impl<T> PendingEmission<T> {
    pub(crate) fn new(delay: Duration, timestamp: i64, outcome: DelayOutcome, value: T) -> Self {
        Self {
            delay,
            timestamp,
            outcome,
            value,
        }
    }

    /// 发射前需要等待的时长，恒为非负。
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 以毫秒表示的等待时长。
    pub fn delay_millis(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }

    /// 该记录的原始时间戳。
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 延迟来源。
    pub fn outcome(&self) -> DelayOutcome {
        self.outcome
    }

    /// 借用待发射的值。
    pub fn value(&self) -> &T {
        &self.value
    }

    /// 取出待发射的值。
    pub fn into_value(self) -> T {
        self.value
    }
}
