use std::time::Duration;

use crate::config::Acceleration;
use crate::record::{DelayOutcome, Pair, PendingEmission, Predecessor};

/// 由扫描窗口推导等待时长。
///
/// # 教案式说明
/// - **意图 (Why)**：重放节奏 = 相邻记录时间差 / 加速因子；首条记录没有参照，必须立即发射；
/// - **逻辑 (How)**：
///   1. 前驱为 `Start` 时延迟为零；
///   2. 否则 `raw = current - previous`（饱和减法），`scaled = floor(raw / factor)`；
///   3. `scaled < 0`（时间戳乱序）时钳制为零，而不是报错；
/// - **契约 (What)**：输出延迟恒为非负；超出毫秒表示范围的结果饱和到上界。
#[derive(Clone, Copy, Debug, Default)]
pub struct DelayCalculator {
    acceleration: Acceleration,
}

impl DelayCalculator {
    /// 以给定加速因子创建计算器。
    pub fn new(acceleration: Acceleration) -> Self {
        Self { acceleration }
    }

    /// 生效的加速因子。
    pub fn acceleration(&self) -> Acceleration {
        self.acceleration
    }

    /// 消费扫描窗口，产出待发射记录。
    pub fn compute<T>(&self, pair: Pair<T>) -> PendingEmission<T> {
        let (previous, current) = pair.into_parts();
        let (timestamp, value) = current.into_parts();

        let (delay, outcome) = match previous {
            Predecessor::Start => (Duration::ZERO, DelayOutcome::First),
            Predecessor::Record {
                timestamp: previous,
            } => {
                let raw = timestamp.saturating_sub(previous);
                let scaled = self.acceleration.scale(raw);
                if scaled < 0 {
                    (Duration::ZERO, DelayOutcome::Clamped { raw_millis: raw })
                } else {
                    (Duration::from_millis(scaled.unsigned_abs()), DelayOutcome::Paced)
                }
            }
        };

        PendingEmission::new(delay, timestamp, outcome, value)
    }
}
