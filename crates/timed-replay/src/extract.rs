//! 时间戳抽取：把调用方提供的纯函数包装为管线第一阶段。

use std::fmt;
use std::sync::Arc;

use crate::error::ExtractError;
use crate::record::TimedRecord;

type ExtractFn<T> = dyn Fn(&T) -> Result<i64, ExtractError> + Send + Sync;

/// 调用方提供的时间戳抽取函数。
///
/// # 契约说明（What）
/// - 每条输入按输入顺序、同步地调用恰好一次；
/// - 结果不要求单调递增，乱序时间戳是受支持的输入；
/// - 可失败版本返回的 [`ExtractError`] 会被当作致命的上游错误处理。
pub struct TimestampExtractor<T> {
    extract: Arc<ExtractFn<T>>,
}

impl<T: 'static> TimestampExtractor<T> {
    /// 包装一个不会失败的抽取函数。
    pub fn infallible<F>(extract: F) -> Self
    where
        F: Fn(&T) -> i64 + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(move |value: &T| -> Result<i64, ExtractError> {
                Ok(extract(value))
            }),
        }
    }

    /// 包装一个可能失败的抽取函数。
    pub fn fallible<F>(extract: F) -> Self
    where
        F: Fn(&T) -> Result<i64, ExtractError> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
        }
    }
}

impl<T> TimestampExtractor<T> {
    /// 为 `value` 计算时间戳并包装为 [`TimedRecord`]。
    pub fn stamp(&self, value: T) -> Result<TimedRecord<T>, ExtractError> {
        let timestamp = (self.extract)(&value)?;
        Ok(TimedRecord::new(timestamp, value))
    }
}

impl<T> Clone for TimestampExtractor<T> {
    fn clone(&self) -> Self {
        Self {
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<T> fmt::Debug for TimestampExtractor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampExtractor").finish_non_exhaustive()
    }
}
