#![deny(unsafe_code)]
#![doc = r#"
# timed-replay

## 设计动机（Why）
- **定位**：把录制下来的带时间戳记录流，以原始到达间隔（可按加速因子缩放）重新发射，
  供模拟器、压测器与测试夹具“仿佛实时”地消费。
- **架构角色**：进程内的单一变换阶段；事件源、消费方与提供定时器的运行时都是外部协作者，
  本 crate 只负责节奏本身。

## 核心契约（What）
- **输入**：任意 `futures::Stream`，元素为 `T` 或 `Result<T, E>`；
- **输出**：[`ReplayStream`]，值、顺序、数量与输入一致，每条在其延迟过去后交付；
- **延迟规则**：首条立即发射；其余为 `floor((当前时间戳 - 前一时间戳) / 加速因子)`，负值钳制为零；
- **失败语义**：上游错误或抽取失败交付一次后立即结束，不再交付任何记录；
- **取消语义**：取消令牌或丢弃流即放弃在途等待并释放定时器。

## 实现策略（How）
- 管线四段：[`extract`] 抽取时间戳 → [`scan`] 成对扫描 → [`delay`] 计算延迟 → [`gate`] 延迟闸门；
- 四段由 [`replay`] 中的顺序控制循环驱动，每次只向上游请求一条记录；
- 时间来源通过 [`time::Clock`] 注入，测试使用 [`time::MockClock`] 获得确定性。

## 风险与考量（Trade-offs）
- 延迟逐条累加，不做漂移补偿，长时间重放的总耗时会叠加处理开销；
- 多条独立流之间不共享时钟基准，跨流同步不在本 crate 职责内。
"#]

pub mod cancellation;
pub mod config;
pub mod delay;
pub mod error;
pub mod extract;
pub mod gate;
pub mod record;
pub mod replay;
pub mod scan;
pub mod state;
pub mod time;

pub use cancellation::{Cancellation, Cancelled};
pub use config::{Acceleration, ReplayConfig};
pub use delay::DelayCalculator;
pub use error::{ConfigError, ExtractError, ReplayError};
pub use extract::TimestampExtractor;
pub use gate::{DelayGate, GateOutcome};
pub use record::{DelayOutcome, Pair, PendingEmission, Predecessor, TimedRecord};
pub use replay::{ReplayStream, TimedReplay, TimedReplayBuilder};
pub use scan::PairwiseScan;
pub use state::{InvalidTransition, ReplaySignal, ReplayState, ReplayStats, StateAdvance};
#[cfg(feature = "runtime-tokio")]
pub use time::SystemClock;
pub use time::{Clock, MockClock, Sleep};

/// 常用类型的一站式导入。
pub mod prelude {
    pub use crate::{
        Acceleration, Cancellation, Clock, ConfigError, ExtractError, MockClock, ReplayConfig,
        ReplayError, ReplayState, ReplayStream, TimedReplay,
    };
    #[cfg(feature = "runtime-tokio")]
    pub use crate::SystemClock;
}
