use std::mem;

use crate::record::{Pair, Predecessor, TimedRecord};

/// 成对扫描：维护“上一条记录”的滚动窗口，每条输入推进一步。
///
/// # 教案式说明
/// - **意图 (Why)**：延迟只取决于相邻两条记录的时间差，因此扫描器只需保留前驱的时间戳；
/// - **逻辑 (How)**：初始前驱为 [`Predecessor::Start`]；每次 `advance` 用新记录替换前驱，
///   并输出 `(旧前驱, 新记录)`；
/// - **契约 (What)**：输出的 `current` 永远是真实记录，首个输出的 `previous` 必为 `Start`；
///   扫描器不挂起、不分配，只在单一执行上下文中使用。
#[derive(Clone, Debug, Default)]
pub struct PairwiseScan {
    previous: Predecessor,
}

impl PairwiseScan {
    /// 以“尚无前驱”状态创建扫描器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 推进一步：新记录成为下一轮的前驱。
    pub fn advance<T>(&mut self, current: TimedRecord<T>) -> Pair<T> {
        let next = Predecessor::Record {
            timestamp: current.timestamp(),
        };
        let previous = mem::replace(&mut self.previous, next);
        Pair::new(previous, current)
    }

    /// 当前前驱。
    pub fn predecessor(&self) -> Predecessor {
        self.previous
    }
}
