//! 把语法树解释为一系列被调度的事件。
//!
//! 每次求值是一个流程（flow），用一个显式的帧栈表示剩余的工作。
//! 流程在 `think` 和阻塞的 `query` 处挂起：前者调度一个
//! [`Action::Resume`]，后者等待请求的回复或拒绝。挂起时控制权回到
//! 事件队列，之后由对应的事件从栈顶继续。

use std::collections::HashMap;

use tracing::trace;

use super::{
    environment::Environment, Action, AgentId, FlowId, RequestId, SimulationContext,
    SimulationError, Time,
};
use crate::ast::{DefineClientStub, DefineOperation, DefineService, Expression, Invocation};

/// 环境中绑定的值
#[derive(Clone, Copy, Debug)]
pub enum Binding<'a> {
    /// 服务及处理它的 agent
    Service {
        agent: AgentId,
        definition: &'a DefineService,
    },
    Operation(&'a DefineOperation),
    Client(&'a DefineClientStub),
}

/// 求值的结果。失败只是普通的值，由 `retry`、`ignore` 和序列处理。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Success,
    Failure,
}

enum Frame<'a> {
    /// 序列中尚未执行的表达式
    Sequence(std::slice::Iter<'a, Expression>),
    Retry {
        expression: &'a Expression,
        remaining: u32,
    },
    IgnoreError,
}

enum Step<'a> {
    Evaluate(&'a Expression),
    Unwind(Outcome),
}

struct Flow<'a> {
    stack: Vec<Frame<'a>>,
    started_at: Time,
    origin: Option<RequestId>,
}

/// 一个结束的流程
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub flow: FlowId,
    /// 流程所回应的请求
    pub origin: Option<RequestId>,
    pub outcome: Outcome,
    pub started_at: Time,
}

/// 一个 agent 的求值器，持有它的作用域与所有在途流程
pub struct Evaluator<'a> {
    scope: Environment<'a, Binding<'a>>,
    flows: HashMap<FlowId, Flow<'a>>,
    next_flow: usize,
    awaiting: HashMap<RequestId, FlowId>,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: Environment<'a, Binding<'a>>) -> Self {
        Self {
            scope,
            flows: HashMap::new(),
            next_flow: 0,
            awaiting: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &Environment<'a, Binding<'a>> {
        &self.scope
    }

    /// 开始对 `body` 求值。流程在当前时刻就结束时返回其结果。
    pub fn start(
        &mut self,
        body: &'a Expression,
        origin: Option<RequestId>,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<Option<Completion>, SimulationError> {
        let id = FlowId(self.next_flow);
        self.next_flow += 1;
        self.flows.insert(
            id,
            Flow {
                stack: vec![],
                started_at: ctx.current_time(),
                origin,
            },
        );
        self.run(id, Step::Evaluate(body), ctx)
    }

    /// `think` 结束后继续执行
    pub fn resume(
        &mut self,
        flow: FlowId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<Option<Completion>, SimulationError> {
        if !self.flows.contains_key(&flow) {
            return Err(SimulationError::InvalidState(format!(
                "cannot resume {}, it is not in flight",
                flow
            )));
        }
        self.run(flow, Step::Unwind(Outcome::Success), ctx)
    }

    /// 请求被回复或拒绝。只有阻塞调用的流程会继续，其余请求被忽略。
    pub fn on_reply(
        &mut self,
        request: RequestId,
        outcome: Outcome,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<Option<Completion>, SimulationError> {
        match self.awaiting.remove(&request) {
            Some(flow) => self.run(flow, Step::Unwind(outcome), ctx),
            None => Ok(None),
        }
    }

    fn frames(&mut self, flow: FlowId) -> Result<&mut Vec<Frame<'a>>, SimulationError> {
        self.flows
            .get_mut(&flow)
            .map(|flow| &mut flow.stack)
            .ok_or_else(|| SimulationError::InvalidState(format!("{} is not in flight", flow)))
    }

    fn run(
        &mut self,
        id: FlowId,
        mut step: Step<'a>,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<Option<Completion>, SimulationError> {
        loop {
            step = match step {
                Step::Evaluate(expression) => match expression {
                    Expression::Think { duration } => {
                        trace!(flow = %id, duration = **duration, "think");
                        ctx.schedule_in(Action::Resume(id), **duration)?;
                        return Ok(None);
                    }
                    Expression::Trigger(invocation) => {
                        self.invoke(invocation, ctx)?;
                        Step::Unwind(Outcome::Success)
                    }
                    Expression::Query(invocation) => {
                        let request = self.invoke(invocation, ctx)?;
                        self.awaiting.insert(request, id);
                        return Ok(None);
                    }
                    Expression::Sequence { body } => {
                        let mut rest = body.iter();
                        match rest.next() {
                            Some(first) => {
                                self.frames(id)?.push(Frame::Sequence(rest));
                                Step::Evaluate(first)
                            }
                            None => Step::Unwind(Outcome::Success),
                        }
                    }
                    Expression::Retry { expression, limit } => {
                        self.frames(id)?.push(Frame::Retry {
                            expression: expression.as_ref(),
                            remaining: *limit,
                        });
                        Step::Evaluate(expression.as_ref())
                    }
                    Expression::IgnoreError { expression } => {
                        self.frames(id)?.push(Frame::IgnoreError);
                        Step::Evaluate(expression.as_ref())
                    }
                },
                Step::Unwind(outcome) => match self.frames(id)?.pop() {
                    None => return Ok(self.complete(id, outcome)),
                    Some(Frame::Sequence(mut rest)) => match (outcome, rest.next()) {
                        (Outcome::Success, Some(next)) => {
                            self.frames(id)?.push(Frame::Sequence(rest));
                            Step::Evaluate(next)
                        }
                        _ => Step::Unwind(outcome),
                    },
                    Some(Frame::Retry {
                        expression,
                        remaining,
                    }) => match outcome {
                        Outcome::Failure if remaining > 0 => {
                            trace!(flow = %id, remaining, "retry");
                            self.frames(id)?.push(Frame::Retry {
                                expression,
                                remaining: remaining - 1,
                            });
                            Step::Evaluate(expression)
                        }
                        _ => Step::Unwind(outcome),
                    },
                    Some(Frame::IgnoreError) => Step::Unwind(Outcome::Success),
                },
            };
        }
    }

    fn complete(&mut self, id: FlowId, outcome: Outcome) -> Option<Completion> {
        let flow = self.flows.remove(&id)?;
        trace!(flow = %id, ?outcome, "complete");
        Some(Completion {
            flow: id,
            origin: flow.origin,
            outcome,
            started_at: flow.started_at,
        })
    }

    /// 解析 `service/operation` 并发出请求
    fn invoke(
        &self,
        invocation: &Invocation,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<RequestId, SimulationError> {
        match self.scope.look_up(&invocation.service) {
            Some(Binding::Service { agent, definition }) => {
                if definition.operation(&invocation.operation).is_none() {
                    return Err(SimulationError::UnknownOperation {
                        service: invocation.service.to_string(),
                        operation: invocation.operation.to_string(),
                    });
                }
                ctx.send_to(*agent, Some(invocation.operation.as_str()))
            }
            _ => Err(SimulationError::UnknownService(
                invocation.service.to_string(),
            )),
        }
    }
}
