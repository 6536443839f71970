//! 按周期统计请求。

use super::Time;

/// 每个 agent 私有的统计量，每个报告周期重置一次
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meter {
    request_count: u64,
    success_count: u64,
    rejection_count: u64,
    total_response_time: Time,
}

impl Meter {
    /// 没有成功请求时的平均响应时间
    pub const NO_RESPONSE_TIME: f64 = -1.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_request(&mut self) {
        self.request_count += 1;
    }

    pub fn new_success(&mut self, response_time: Time) {
        self.success_count += 1;
        self.total_response_time = self.total_response_time.saturating_add(response_time);
    }

    pub fn new_rejection(&mut self) {
        self.rejection_count += 1;
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn rejection_count(&self) -> u64 {
        self.rejection_count
    }

    /// 本周期内成功的请求数
    pub fn throughput(&self) -> u64 {
        self.success_count
    }

    pub fn average_response_time(&self) -> f64 {
        if self.success_count > 0 {
            self.total_response_time as f64 / self.success_count as f64
        } else {
            Self::NO_RESPONSE_TIME
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
