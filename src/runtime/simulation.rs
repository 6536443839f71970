//! 仿真内核：虚拟时钟、事件队列与 agent 调度。

use std::{cmp::Ordering, collections::BinaryHeap};

use tracing::{debug, info, trace};

use super::{
    report::Report,
    request::{Request, Requests},
    Action, Agent, AgentId, RequestId, SimulationError, Time,
};

struct Scheduled {
    at: Time,
    seq: u64,
    target: AgentId,
    action: Action,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // BinaryHeap 是最大堆，反转后最早的事件在堆顶；同一时刻按插入顺序
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// 按 (时刻, 插入序号) 排序的事件队列，持有仿真时钟
#[derive(Default)]
pub struct EventQueue {
    now: Time,
    next_seq: u64,
    queue: BinaryHeap<Scheduled>,
}

impl EventQueue {
    pub fn now(&self) -> Time {
        self.now
    }

    /// 在时刻 `at` 为 `target` 调度 `action`，不允许早于当前时钟。
    pub fn schedule(
        &mut self,
        target: AgentId,
        action: Action,
        at: Time,
    ) -> Result<(), SimulationError> {
        if at < self.now {
            return Err(SimulationError::ScheduleInPast {
                action: action.to_string(),
                at,
                now: self.now,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(now = self.now, at, seq, %target, %action, "schedule");
        self.queue.push(Scheduled {
            at,
            seq,
            target,
            action,
        });
        Ok(())
    }

    /// 取出不晚于 `end` 的最早事件，并把时钟推进到该时刻
    fn pop_until(&mut self, end: Time) -> Option<Scheduled> {
        if self.queue.peek()?.at > end {
            return None;
        }
        let next = self.queue.pop()?;
        self.now = next.at;
        Some(next)
    }

}

/// agent 在回调中看到的仿真上下文。
///
/// 时钟只读；所有调度都以当前 agent 为目标，除了请求的投递与通知。
pub struct SimulationContext<'s> {
    agent: AgentId,
    events: &'s mut EventQueue,
    requests: &'s mut Requests,
}

impl<'s> SimulationContext<'s> {
    /// 当前回调所属的 agent
    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn current_time(&self) -> Time {
        self.events.now()
    }

    /// 在 `delay` 个 tick 之后执行 `action`。
    ///
    /// `delay` 为 0 时在当前时刻执行，排在已经调度的同一时刻动作之后。
    pub fn schedule_in(&mut self, action: Action, delay: Time) -> Result<(), SimulationError> {
        let now = self.current_time();
        let Some(at) = now.checked_add(delay) else {
            return Err(SimulationError::TimeOverflow {
                action: action.to_string(),
                delay,
                now,
            });
        };
        self.events.schedule(self.agent, action, at)
    }

    /// 创建一个由当前 agent 发出的请求，记录发出时刻并投递给 `receiver`。
    pub fn send_to(
        &mut self,
        receiver: AgentId,
        operation: Option<&str>,
    ) -> Result<RequestId, SimulationError> {
        let now = self.current_time();
        let request = self
            .requests
            .open(self.agent, receiver, operation.map(str::to_string), now);
        debug!(now, sender = %self.agent, %receiver, %request, ?operation, "send");
        self.events.schedule(receiver, Action::Deliver(request), now)?;
        Ok(request)
    }

    /// 回复请求，记录完成时刻并通知发送方。
    pub fn reply(&mut self, request: RequestId) -> Result<(), SimulationError> {
        let now = self.current_time();
        let entry = self.requests.get_mut(request)?;
        entry.mark_replied(now)?;
        let sender = entry.sender;
        debug!(now, %request, %sender, "reply");
        self.events.schedule(sender, Action::Replied(request), now)
    }

    /// 拒绝请求并通知发送方。
    pub fn reject(&mut self, request: RequestId) -> Result<(), SimulationError> {
        let now = self.current_time();
        let entry = self.requests.get_mut(request)?;
        entry.mark_rejected()?;
        let sender = entry.sender;
        debug!(now, %request, %sender, "reject");
        self.events.schedule(sender, Action::Rejected(request), now)
    }

    pub fn request(&self, request: RequestId) -> Result<&Request, SimulationError> {
        self.requests.get(request)
    }
}

struct Slot<'a> {
    agent: Option<Box<dyn Agent + 'a>>,
    started: bool,
}

/// 一次仿真运行：时钟、事件队列、agent 与在途请求。
pub struct Simulation<'a> {
    events: EventQueue,
    requests: Requests,
    agents: Vec<Slot<'a>>,
    started: bool,
    fired: u64,
}

impl<'a> Default for Simulation<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Simulation<'a> {
    pub fn new() -> Self {
        Self {
            events: EventQueue::default(),
            requests: Requests::default(),
            agents: vec![],
            started: false,
            fired: 0,
        }
    }

    pub fn current_time(&self) -> Time {
        self.events.now()
    }

    /// 已执行的动作数
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// 队列中尚未执行的动作数
    pub fn pending(&self) -> usize {
        self.events.queue.len()
    }

    /// 已发出的请求数
    pub fn request_count(&self) -> usize {
        self.requests.opened()
    }

    /// 预留一个 agent ID，之后用 [`Simulation::install`] 安装 agent。
    ///
    /// 互相引用的 agent 需要先知道彼此的 ID。
    pub fn reserve(&mut self) -> AgentId {
        self.agents.push(Slot {
            agent: None,
            started: false,
        });
        AgentId(self.agents.len() - 1)
    }

    pub fn install(
        &mut self,
        id: AgentId,
        agent: Box<dyn Agent + 'a>,
    ) -> Result<(), SimulationError> {
        let slot = self
            .agents
            .get_mut(id.0)
            .ok_or(SimulationError::UnknownAgent(id))?;
        if slot.agent.is_some() {
            return Err(SimulationError::InvalidState(format!(
                "{} is already installed",
                id
            )));
        }
        debug!(%id, identifier = agent.identifier(), "install");
        slot.agent = Some(agent);
        if self.started {
            self.start_agent(id)?;
        }
        Ok(())
    }

    pub fn add_agent(&mut self, agent: impl Agent + 'a) -> Result<AgentId, SimulationError> {
        let id = self.reserve();
        self.install(id, Box::new(agent))?;
        Ok(id)
    }

    pub fn identifier(&self, id: AgentId) -> Option<&str> {
        self.agents
            .get(id.0)?
            .agent
            .as_ref()
            .map(|agent| agent.identifier())
    }

    /// 从外部调度动作
    pub fn schedule(
        &mut self,
        target: AgentId,
        action: Action,
        at: Time,
    ) -> Result<(), SimulationError> {
        self.events.schedule(target, action, at)
    }

    fn start_agent(&mut self, id: AgentId) -> Result<(), SimulationError> {
        let slot = self
            .agents
            .get_mut(id.0)
            .ok_or(SimulationError::UnknownAgent(id))?;
        let agent = slot
            .agent
            .as_mut()
            .ok_or(SimulationError::AgentNotInstalled(id))?;
        debug!(%id, identifier = agent.identifier(), "start");
        let mut ctx = SimulationContext {
            agent: id,
            events: &mut self.events,
            requests: &mut self.requests,
        };
        agent.on_start(&mut ctx)?;
        slot.started = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), SimulationError> {
        self.started = true;
        info!(agents = self.agents.len(), "starting simulation");
        for index in 0..self.agents.len() {
            if !self.agents[index].started {
                self.start_agent(AgentId(index))?;
            }
        }
        Ok(())
    }

    /// 依次执行不晚于 `end_time` 的动作，然后把时钟推进到 `end_time`。
    ///
    /// 第一次调用时先启动所有 agent。
    pub fn run_until(&mut self, end_time: Time) -> Result<(), SimulationError> {
        if !self.started {
            self.start()?;
        }
        while let Some(next) = self.events.pop_until(end_time) {
            self.fired += 1;
            trace!(now = next.at, seq = next.seq, target = %next.target, action = %next.action, "fire");
            self.dispatch(next.target, next.action)?;
        }
        self.events.now = self.events.now.max(end_time);
        Ok(())
    }

    fn dispatch(&mut self, target: AgentId, action: Action) -> Result<(), SimulationError> {
        let slot = self
            .agents
            .get_mut(target.0)
            .ok_or(SimulationError::UnknownAgent(target))?;
        let agent = slot
            .agent
            .as_mut()
            .ok_or(SimulationError::AgentNotInstalled(target))?;
        let mut ctx = SimulationContext {
            agent: target,
            events: &mut self.events,
            requests: &mut self.requests,
        };
        match action {
            Action::Deliver(request) => agent.process(request, &mut ctx),
            Action::Replied(request) => {
                agent.on_completion_of(request, &mut ctx)?;
                self.requests.close(request);
                Ok(())
            }
            Action::Rejected(request) => {
                agent.on_rejection_of(request, &mut ctx)?;
                self.requests.close(request);
                Ok(())
            }
            action => agent.fire(action, &mut ctx),
        }
    }

    /// 让每个 agent 按安装顺序报告本周期的指标
    pub fn record_state(&mut self, report: &mut dyn Report) -> anyhow::Result<()> {
        let now = self.current_time();
        for slot in &mut self.agents {
            if let Some(agent) = slot.agent.as_mut() {
                let records = agent.record_state();
                report.record(now, agent.identifier(), &records)?;
            }
        }
        Ok(())
    }

    /// 周期性采样的驱动：每 `period` 个 tick 运行一段，然后报告所有 agent 的状态。
    pub fn run_with_reports(
        &mut self,
        end_time: Time,
        period: Time,
        report: &mut dyn Report,
    ) -> anyhow::Result<()> {
        let period = period.max(1);
        let mut next = self.current_time().checked_add(period);
        while let Some(at) = next.filter(|&at| at <= end_time) {
            self.run_until(at)?;
            self.record_state(report)?;
            next = at.checked_add(period);
        }
        self.run_until(end_time)?;
        info!(
            now = self.current_time(),
            fired = self.fired,
            requests = self.requests.opened(),
            "simulation complete"
        );
        report.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use proptest::prelude::*;

    use super::*;
    use crate::runtime::{report::Recorder, FlowId, Record};

    type Log = Rc<RefCell<Vec<(Time, usize)>>>;

    /// 记录每个动作被执行的时刻
    struct Logger {
        log: Log,
        started_at: Rc<RefCell<Vec<Time>>>,
    }

    impl Logger {
        fn new(log: &Log) -> Self {
            Self {
                log: log.clone(),
                started_at: Rc::default(),
            }
        }
    }

    impl Agent for Logger {
        fn identifier(&self) -> &str {
            "logger"
        }

        fn on_start(&mut self, ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
            self.started_at.borrow_mut().push(ctx.current_time());
            Ok(())
        }

        fn fire(
            &mut self,
            action: Action,
            ctx: &mut SimulationContext<'_>,
        ) -> Result<(), SimulationError> {
            match action {
                Action::Resume(FlowId(tag)) => {
                    self.log.borrow_mut().push((ctx.current_time(), tag));
                    Ok(())
                }
                Action::Send => ctx.schedule_in(Action::Resume(FlowId(99)), 0),
                Action::Complete(_) => ctx.schedule_in(Action::Send, Time::MAX),
                Action::Control => {
                    let (agent, now) = (ctx.agent(), ctx.current_time());
                    ctx.events.schedule(agent, Action::Send, now - 1)
                }
                other => Err(SimulationError::UnexpectedAction {
                    agent: "logger".into(),
                    action: other.to_string(),
                }),
            }
        }

        fn record_state(&mut self) -> Vec<Record> {
            vec![Record::count("fired", self.log.borrow().len() as u64)]
        }
    }

    #[test]
    fn equal_times_fire_in_insertion_order() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        let logger = simulation.add_agent(Logger::new(&log)).unwrap();

        for (tag, at) in [(0, 5), (1, 3), (2, 5), (3, 3), (4, 0)] {
            simulation
                .schedule(logger, Action::Resume(FlowId(tag)), at)
                .unwrap();
        }
        simulation.run_until(10).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![(0, 4), (3, 1), (3, 3), (5, 0), (5, 2)]
        );
        assert_eq!(simulation.current_time(), 10);
    }

    #[test]
    fn zero_delay_fires_after_queued_actions_of_the_same_tick() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        let logger = simulation.add_agent(Logger::new(&log)).unwrap();

        simulation.schedule(logger, Action::Send, 2).unwrap();
        simulation
            .schedule(logger, Action::Resume(FlowId(1)), 2)
            .unwrap();
        simulation.run_until(2).unwrap();

        assert_eq!(*log.borrow(), vec![(2, 1), (2, 99)]);
    }

    #[test]
    fn stops_before_actions_beyond_the_end() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        let logger = simulation.add_agent(Logger::new(&log)).unwrap();

        simulation
            .schedule(logger, Action::Resume(FlowId(0)), 10)
            .unwrap();
        simulation
            .schedule(logger, Action::Resume(FlowId(1)), 11)
            .unwrap();
        simulation.run_until(10).unwrap();
        assert_eq!(*log.borrow(), vec![(10, 0)]);
        assert_eq!(simulation.pending(), 1);

        simulation.run_until(20).unwrap();
        assert_eq!(*log.borrow(), vec![(10, 0), (11, 1)]);
    }

    #[test]
    fn scheduling_into_the_past_fails_fast() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        let logger = simulation.add_agent(Logger::new(&log)).unwrap();

        simulation.schedule(logger, Action::Control, 4).unwrap();
        let error = simulation.run_until(10).unwrap_err();
        assert_eq!(
            error,
            SimulationError::ScheduleInPast {
                action: Action::Send.to_string(),
                at: 3,
                now: 4
            }
        );

        simulation.run_until(20).unwrap();
        assert!(simulation.schedule(logger, Action::Send, 5).is_err());
    }

    #[test]
    fn delays_beyond_the_clock_range_are_errors() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        let logger = simulation.add_agent(Logger::new(&log)).unwrap();

        simulation
            .schedule(logger, Action::Complete(RequestId(0)), 1)
            .unwrap();
        assert_eq!(
            simulation.run_until(10),
            Err(SimulationError::TimeOverflow {
                action: Action::Send.to_string(),
                delay: Time::MAX,
                now: 1,
            })
        );
    }

    #[test]
    fn reports_stop_at_the_end_of_the_clock_range() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        simulation.add_agent(Logger::new(&log)).unwrap();

        let mut recorder = Recorder::default();
        simulation
            .run_with_reports(Time::MAX, Time::MAX - 1, &mut recorder)
            .unwrap();

        let times = recorder
            .rows()
            .iter()
            .map(|row| row.time)
            .collect::<Vec<_>>();
        assert_eq!(times, vec![Time::MAX - 1]);
        assert_eq!(simulation.current_time(), Time::MAX);
    }

    #[test]
    fn agents_start_once_at_time_zero() {
        let log = Log::default();
        let logger = Logger::new(&log);
        let started_at = logger.started_at.clone();

        let mut simulation = Simulation::new();
        simulation.add_agent(logger).unwrap();
        simulation.run_until(5).unwrap();
        simulation.run_until(10).unwrap();

        assert_eq!(*started_at.borrow(), vec![0]);
    }

    #[test]
    fn reserved_slots_must_be_installed() {
        let mut simulation = Simulation::new();
        let id = simulation.reserve();
        assert_eq!(
            simulation.run_until(1),
            Err(SimulationError::AgentNotInstalled(id))
        );
    }

    #[test]
    fn reports_every_period() {
        let log = Log::default();
        let mut simulation = Simulation::new();
        let logger = simulation.add_agent(Logger::new(&log)).unwrap();
        for at in [1, 2, 12, 25] {
            simulation
                .schedule(logger, Action::Resume(FlowId(0)), at)
                .unwrap();
        }

        let mut recorder = Recorder::default();
        simulation
            .run_with_reports(30, 10, &mut recorder)
            .unwrap();

        let fired = recorder
            .rows()
            .iter()
            .map(|row| (row.time, row.value))
            .collect::<Vec<_>>();
        assert_eq!(fired, vec![(10, 2.0), (20, 3.0), (30, 4.0)]);
        assert_eq!(simulation.fired(), 4);
    }

    proptest! {
        #[test]
        fn fires_in_time_then_insertion_order(times in prop::collection::vec(0u64..20, 0..60)) {
            let log = Log::default();
            let mut simulation = Simulation::new();
            let logger = simulation.add_agent(Logger::new(&log)).unwrap();
            for (tag, at) in times.iter().enumerate() {
                simulation.schedule(logger, Action::Resume(FlowId(tag)), *at).unwrap();
            }
            simulation.run_until(20).unwrap();

            let mut expected = times.iter().copied().enumerate().map(|(tag, at)| (at, tag)).collect::<Vec<_>>();
            expected.sort();
            prop_assert_eq!(log.borrow().clone(), expected);
        }
    }
}
