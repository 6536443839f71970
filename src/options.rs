//! 仿真选项。

use crate::runtime::Time;

/// 仿真选项。
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// 仿真结束的时刻。
    pub end_time: Time,
    /// 两次报告之间的 tick 数。
    pub report_period: Time,
    /// 每个服务初始的活动单元数。
    pub units: usize,
    /// 控制器每个 tick 的调整次数。
    pub control_rate: f64,
    /// 按利用率自动伸缩；为 `None` 时集群大小固定。
    pub autoscaling: Option<Autoscaling>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            end_time: 1000,
            report_period: 10,
            units: 1,
            control_rate: 0.1,
            autoscaling: None,
        }
    }
}

/// 自动伸缩的阈值与步长。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Autoscaling {
    /// 利用率下限。
    pub min: f64,
    /// 利用率上限。
    pub max: f64,
    /// 每次调整的单元数。
    pub step: f64,
}
