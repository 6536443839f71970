//! 离散事件仿真运行时。
use std::fmt::Display;

use thiserror::Error;

pub mod agent;
pub mod builder;
pub mod client;
pub mod cluster;
pub mod environment;
pub mod evaluator;
pub mod experiments;
pub mod meter;
pub mod report;
pub mod request;
pub mod scalability;
pub mod scripted;
pub mod simulation;

pub use agent::{Agent, Format, Record};
pub use builder::SimulationBuilder;
pub use environment::Environment;
pub use evaluator::{Binding, Evaluator, Outcome};
pub use meter::Meter;
pub use request::Request;
pub use simulation::{Simulation, SimulationContext};

/// 虚拟时间，以 tick 为单位
pub type Time = u64;

/// Agent ID
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct AgentId(pub usize);

impl Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Request ID
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// 正在执行的求值流程的 ID，只在其所属的 agent 内唯一
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct FlowId(pub usize);

impl Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}

/// 被调度的动作
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// 客户端发出一个请求
    Send,
    /// 调整集群中活动单元的数量
    Control,
    /// 恢复一个挂起的求值流程
    Resume(FlowId),
    /// 服务端完成对请求的处理
    Complete(RequestId),
    /// 请求到达接收方
    Deliver(RequestId),
    /// 通知发送方请求已回复
    Replied(RequestId),
    /// 通知发送方请求被拒绝
    Rejected(RequestId),
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Send => write!(f, "Sending request"),
            Action::Control => write!(f, "Adjust unit count"),
            Action::Resume(flow) => write!(f, "Resume {}", flow),
            Action::Complete(request) => write!(f, "Complete {}", request),
            Action::Deliver(request) => write!(f, "Deliver {}", request),
            Action::Replied(request) => write!(f, "Reply to {}", request),
            Action::Rejected(request) => write!(f, "Reject {}", request),
        }
    }
}

/// 仿真错误。
///
/// 这些错误说明模型有误或运行时被误用，会立即终止仿真。
/// 请求被拒绝之类的建模失败不属于这里。
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("cannot schedule `{action}` at {at}, the clock is already at {now}")]
    ScheduleInPast { action: String, at: Time, now: Time },

    #[error("cannot schedule `{action}` {delay} ticks after {now}, the time is out of range")]
    TimeOverflow { action: String, delay: Time, now: Time },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("{0} is reserved but no agent was installed")]
    AgentNotInstalled(AgentId),

    #[error("unknown {0}")]
    UnknownRequest(RequestId),

    #[error("unknown service `{0}`")]
    UnknownService(String),

    #[error("unknown operation `{operation}` on service `{service}`")]
    UnknownOperation { service: String, operation: String },

    #[error("agent `{0}` is not connected to any server")]
    Unconnected(String),

    #[error("agent `{agent}` cannot handle action `{action}`")]
    UnexpectedAction { agent: String, action: String },
}
