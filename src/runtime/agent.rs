//! 仿真中的实体。

use std::fmt::Display;

use super::{Action, RequestId, SimulationContext, SimulationError};

/// 报告中一个数值的格式
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Format {
    /// `%d`
    Integer,
    /// `%.Nf`
    Decimal(usize),
}

impl Format {
    pub fn render(&self, value: f64) -> String {
        match self {
            Format::Integer => format!("{}", value.round() as i64),
            Format::Decimal(precision) => format!("{:.*}", precision, value),
        }
    }
}

/// 一个被报告的指标
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub metric: &'static str,
    pub format: Format,
    pub value: f64,
}

impl Record {
    pub fn count(metric: &'static str, value: u64) -> Self {
        Self {
            metric,
            format: Format::Integer,
            value: value as f64,
        }
    }

    pub fn decimal(metric: &'static str, value: f64) -> Self {
        Self {
            metric,
            format: Format::Decimal(2),
            value,
        }
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.metric, self.format.render(self.value))
    }
}

/// 仿真中的实体：客户端、服务端、控制器。
///
/// agent 之间不共享可变状态，只通过请求交互。所有回调都发生在
/// 仿真时钟的当前时刻，`ctx` 提供时钟和调度。
pub trait Agent {
    /// 在整个仿真中唯一且稳定的名称
    fn identifier(&self) -> &str;

    /// 在时刻 0、其他动作之前调用一次
    fn on_start(&mut self, _ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
        Ok(())
    }

    /// 执行调度给自己的动作
    fn fire(
        &mut self,
        action: Action,
        _ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        Err(SimulationError::UnexpectedAction {
            agent: self.identifier().to_string(),
            action: action.to_string(),
        })
    }

    /// 处理收到的请求。默认拒绝所有请求。
    fn process(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        ctx.reject(request)
    }

    /// 自己发出的请求被回复
    fn on_completion_of(
        &mut self,
        _request: RequestId,
        _ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    /// 自己发出的请求被拒绝
    fn on_rejection_of(
        &mut self,
        _request: RequestId,
        _ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    /// 报告本周期的指标，并重置周期内的统计量
    fn record_state(&mut self) -> Vec<Record> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_records_with_their_format() {
        assert_eq!(Record::count("rejection", 3).to_string(), "rejection=3");
        assert_eq!(
            Record::decimal("response time", 12.346).to_string(),
            "response time=12.35"
        );
        assert_eq!(Format::Decimal(0).render(2.0), "2");
    }
}
