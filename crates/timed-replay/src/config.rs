//! 重放配置：加速因子及其校验。
//!
//! # 设计背景（Why）
//! - 加速因子是重放阶段唯一的可调参数，宿主通常把它写在自己的配置文件里，因此 [`ReplayConfig`] 支持 `serde` 反序列化；
//! - 反序列化只负责读值，合法性统一由 [`ReplayConfig::validate`] / [`Acceleration::new`] 把关。

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 可嵌入宿主配置的重放参数。
///
/// # 契约说明（What）
/// - 缺省字段回落到默认值（`acceleration = 1.0`，即实时重放）；
/// - 未知字段会被拒绝，避免拼写错误被静默忽略；
/// - 读入后须调用 [`ReplayConfig::validate`] 或交给 [`crate::TimedReplayBuilder::config`]，后者在 `build` 时校验。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayConfig {
    /// 加速因子：`> 1` 压缩间隔，`(0, 1)` 拉长间隔。
    pub acceleration: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            acceleration: Acceleration::REAL_TIME.factor(),
        }
    }
}

impl ReplayConfig {
    /// 校验配置并返回强类型的加速因子。
    pub fn validate(&self) -> Result<Acceleration, ConfigError> {
        Acceleration::try_from(self.acceleration)
    }
}

/// 经过校验的加速因子，保证为有限正数。
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Acceleration(f64);

impl Acceleration {
    /// 实时重放。
    pub const REAL_TIME: Acceleration = Acceleration(1.0);

    /// 校验并构造加速因子。
    ///
    /// `NaN`、无穷大、零与负数均返回 [`ConfigError::InvalidAcceleration`]。
    pub fn new(factor: f64) -> Result<Self, ConfigError> {
        if factor.is_finite() && factor > 0.0 {
            Ok(Self(factor))
        } else {
            Err(ConfigError::InvalidAcceleration { factor })
        }
    }

    /// 原始因子值。
    pub fn factor(&self) -> f64 {
        self.0
    }

    /// 将原始时间差（毫秒）按因子缩放并向下取整。
    ///
    /// 超出 `i64` 范围的结果饱和到边界值。
    pub fn scale(&self, raw_millis: i64) -> i64 {
        (raw_millis as f64 / self.0).floor() as i64
    }
}

impl Default for Acceleration {
    fn default() -> Self {
        Self::REAL_TIME
    }
}

impl TryFrom<f64> for Acceleration {
    type Error = ConfigError;

    fn try_from(factor: f64) -> Result<Self, Self::Error> {
        Self::new(factor)
    }
}
