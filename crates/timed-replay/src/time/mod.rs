//! 时间抽象模块，为延迟闸门提供可注入的时钟，使重放节奏在测试中完全确定。
//!
//! # 模块定位（Why）
//! - 重放阶段唯一的挂起点是“等待计算出的延迟”，该等待必须可被替换为虚拟时间，否则间隔断言会受真实调度抖动影响；
//! - `Clock` trait 统一 `now` 与 `sleep` 能力，重放流只依赖 trait 即可在生产与测试之间切换。
//!
//! # 结构概览（What）
//! - [`clock::Clock`]：核心时钟 trait，暴露 `now`/`sleep` 两个原语；
//! - [`clock::SystemClock`]：基于 Tokio 的生产实现（`runtime-tokio` Feature）；
//! - [`clock::MockClock`]：虚拟时钟，提供手动推进与确定性唤醒序列。
//!
//! # 使用指引（How）
//! - 通过 [`crate::TimedReplayBuilder::clock`] 注入 `Arc<dyn Clock>`；
//! - 测试中使用 [`MockClock`] 推进时间并用 [`MockClock::pending_sleepers`] 断言定时器已释放。

pub mod clock;

#[cfg(feature = "runtime-tokio")]
pub use clock::SystemClock;
pub use clock::{Clock, MockClock, Sleep};
