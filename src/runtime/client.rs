//! 发出裸请求的客户端。

use tracing::debug;

use super::{
    Action, Agent, AgentId, Meter, Record, RequestId, SimulationContext, SimulationError, Time,
};

/// 随时间变化、有下界的取值
pub struct LowerBound {
    signal: Box<dyn Fn(Time) -> f64>,
    bound: f64,
}

impl LowerBound {
    pub fn new(signal: impl Fn(Time) -> f64 + 'static, bound: f64) -> Self {
        Self {
            signal: Box::new(signal),
            bound,
        }
    }

    pub fn constant(value: f64, bound: f64) -> Self {
        Self::new(move |_| value, bound)
    }

    pub fn value_at(&self, time: Time) -> f64 {
        (self.signal)(time).max(self.bound)
    }
}

/// 客户端的发送节奏
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pacing {
    /// 收到回复或拒绝之后才准备下一个请求，同一时间只有一个在途请求
    ClosedLoop,
    /// 发出请求的同时就准备下一个，不关心结果
    OpenLoop,
}

/// 每隔 `inter_request_period` 向服务端发出一个请求
pub struct Client {
    identifier: String,
    inter_request_period: LowerBound,
    pacing: Pacing,
    server: Option<AgentId>,
    meter: Meter,
}

impl Client {
    /// 闭环客户端
    pub fn new(identifier: impl Into<String>, inter_request_period: LowerBound) -> Self {
        Self {
            identifier: identifier.into(),
            inter_request_period: LowerBound {
                bound: inter_request_period.bound.max(1.0),
                ..inter_request_period
            },
            pacing: Pacing::ClosedLoop,
            server: None,
            meter: Meter::new(),
        }
    }

    /// 开环的客户端桩：以固定速率发出请求，无论请求成功与否
    pub fn stub(identifier: impl Into<String>, inter_request_period: Time) -> Self {
        Self {
            pacing: Pacing::OpenLoop,
            ..Self::new(
                identifier,
                LowerBound::constant(inter_request_period as f64, 1.0),
            )
        }
    }

    pub fn with_server(mut self, server: AgentId) -> Self {
        self.server = Some(server);
        self
    }

    pub fn set_server(&mut self, server: AgentId) {
        self.server = Some(server);
    }

    pub fn server(&self) -> Option<AgentId> {
        self.server
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    pub fn inter_request_period(&self, now: Time) -> Time {
        self.inter_request_period.value_at(now) as Time
    }

    fn prepare_next_request(
        &mut self,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let delay = self.inter_request_period(ctx.current_time());
        ctx.schedule_in(Action::Send, delay)
    }

    fn send_request(&mut self, ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
        let server = self
            .server
            .ok_or_else(|| SimulationError::Unconnected(self.identifier.clone()))?;
        self.meter.new_request();
        ctx.send_to(server, None)?;
        if self.pacing == Pacing::OpenLoop {
            self.prepare_next_request(ctx)?;
        }
        Ok(())
    }
}

impl Agent for Client {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn on_start(&mut self, ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
        self.prepare_next_request(ctx)
    }

    fn fire(
        &mut self,
        action: Action,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        match action {
            Action::Send => self.send_request(ctx),
            other => Err(SimulationError::UnexpectedAction {
                agent: self.identifier.clone(),
                action: other.to_string(),
            }),
        }
    }

    fn on_completion_of(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        if self.pacing == Pacing::OpenLoop {
            return Ok(());
        }
        let response_time = ctx.request(request)?.response_time()?;
        self.meter.new_success(response_time);
        self.prepare_next_request(ctx)
    }

    fn on_rejection_of(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        if self.pacing == Pacing::OpenLoop {
            return Ok(());
        }
        debug!(client = %self.identifier, %request, "rejected");
        self.meter.new_rejection();
        self.prepare_next_request(ctx)
    }

    fn record_state(&mut self) -> Vec<Record> {
        let records = vec![
            Record::count("request", self.meter.request_count()),
            Record::count("rejection", self.meter.rejection_count()),
        ];
        self.meter.reset();
        records
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::runtime::Simulation;

    /// 记录收到的请求，并按预设的方式回应
    struct Sink {
        received: Rc<RefCell<Vec<Time>>>,
        accept: bool,
    }

    impl Agent for Sink {
        fn identifier(&self) -> &str {
            "sink"
        }

        fn process(
            &mut self,
            request: RequestId,
            ctx: &mut SimulationContext<'_>,
        ) -> Result<(), SimulationError> {
            self.received.borrow_mut().push(ctx.current_time());
            if self.accept {
                ctx.schedule_in(Action::Complete(request), 3)
            } else {
                ctx.reject(request)
            }
        }

        fn fire(
            &mut self,
            action: Action,
            ctx: &mut SimulationContext<'_>,
        ) -> Result<(), SimulationError> {
            match action {
                Action::Complete(request) => ctx.reply(request),
                _ => unreachable!(),
            }
        }
    }

    fn run(client: Client, accept: bool, until: Time) -> Vec<Time> {
        let received = Rc::new(RefCell::new(vec![]));
        let mut simulation = Simulation::new();
        let sink = simulation
            .add_agent(Sink {
                received: received.clone(),
                accept,
            })
            .unwrap();
        simulation.add_agent(client.with_server(sink)).unwrap();
        simulation.run_until(until).unwrap();
        received.take()
    }

    #[test]
    fn stub_sends_at_a_fixed_rate_whatever_the_outcome() {
        for accept in [true, false] {
            let received = run(Client::stub("client stub", 2), accept, 100);
            assert_eq!(received.len(), 50);
            assert_eq!(received.first(), Some(&2));
            assert_eq!(received.last(), Some(&100));
        }
    }

    #[test]
    fn closed_loop_client_waits_for_the_reply() {
        let client = Client::new("client", LowerBound::constant(2.0, 1.0));
        // 发出于 2，回复于 5，下一个发出于 7 ...
        let received = run(client, true, 20);
        assert_eq!(received, vec![2, 7, 12, 17]);
    }

    #[test]
    fn closed_loop_client_re_arms_after_rejection() {
        let client = Client::new("client", LowerBound::constant(4.0, 1.0));
        let received = run(client, false, 20);
        assert_eq!(received, vec![4, 8, 12, 16, 20]);
    }

    #[test]
    fn period_never_drops_below_one_tick() {
        let client = Client::new("client", LowerBound::new(|t| 5.0 - t as f64, 0.0));
        assert_eq!(client.inter_request_period(0), 5);
        assert_eq!(client.inter_request_period(10), 1);
    }

    #[test]
    fn rejections_are_reported_per_period() {
        let mut client = Client::new("client", LowerBound::constant(1.0, 1.0));
        client.meter.new_request();
        client.meter.new_rejection();

        let records = client.record_state();
        assert_eq!(records[1], Record::count("rejection", 1));
        assert_eq!(client.record_state()[1], Record::count("rejection", 0));
    }

    #[test]
    fn unconnected_client_fails() {
        let mut simulation = Simulation::new();
        simulation.add_agent(Client::stub("lonely", 1)).unwrap();
        assert_eq!(
            simulation.run_until(1),
            Err(SimulationError::Unconnected("lonely".into()))
        );
    }
}
