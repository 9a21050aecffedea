use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Tuning knobs for a connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    pub maxsize: u32,              // 连接数软上限，超过后先等待 maxwait
    pub maxoverflow: u32,          // 突发流量允许的溢出连接数，0 表示 maxsize 为硬上限
    pub maxwait: Option<Duration>, // 池满时等待空闲连接的时长，None 表示立即失败
    pub expires: Option<Duration>, // 连接最大生命周期，超过后强制重建
    pub cleanup: Option<Duration>, // 连接最大空闲时长，超过后由回收任务关闭
    pub reap_interval: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        PoolOptions {
            maxsize: 100,
            maxoverflow: 0,
            maxwait: Some(Duration::from_secs(1)),
            expires: None,
            cleanup: None,
            reap_interval: None,
        }
    }

    pub fn maxsize(mut self, maxsize: u32) -> Self {
        self.maxsize = maxsize;
        self
    }

    pub fn maxoverflow(mut self, maxoverflow: u32) -> Self {
        self.maxoverflow = maxoverflow;
        self
    }

    pub fn maxwait(mut self, maxwait: impl Into<Option<Duration>>) -> Self {
        self.maxwait = maxwait.into();
        self
    }

    pub fn expires(mut self, expires: impl Into<Option<Duration>>) -> Self {
        self.expires = expires.into();
        self
    }

    pub fn cleanup(mut self, cleanup: impl Into<Option<Duration>>) -> Self {
        self.cleanup = cleanup.into();
        self
    }

    pub fn reap_interval(mut self, reap_interval: impl Into<Option<Duration>>) -> Self {
        self.reap_interval = reap_interval.into();
        self
    }

    /// Validate the option combination before any connection attempt.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.maxsize == 0 {
            return Err(PoolError::Configuration(
                "maxsize must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("expires", self.expires),
            ("cleanup", self.cleanup),
            ("reap_interval", self.reap_interval),
        ] {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(PoolError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Interval of the background reaper: the explicit setting, or a quarter
    /// of the shortest configured lifetime, floored at one second. `None`
    /// when nothing expires, so no reaper runs at all.
    pub(crate) fn reap_tick(&self) -> Option<Duration> {
        if self.reap_interval.is_some() {
            return self.reap_interval;
        }
        let shortest = match (self.expires, self.cleanup) {
            (Some(e), Some(c)) => e.min(c),
            (Some(e), None) => e,
            (None, Some(c)) => c,
            (None, None) => return None,
        };
        Some((shortest / 4).max(Duration::from_secs(1)))
    }
}
