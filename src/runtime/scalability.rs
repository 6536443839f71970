//! 根据利用率自动伸缩集群。

use std::{cell::RefCell, rc::Rc};

use tracing::debug;

use super::{Action, Agent, Record, SimulationContext, SimulationError, Time};

/// 可以被控制器调整的处理能力
pub trait Scalable {
    /// 当前的利用率
    fn utilisation(&self) -> f64;

    fn active_unit_count(&self) -> usize;

    /// 设置活动单元的数量，负数按 0 处理
    fn set_active_unit_count(&mut self, count: i64);
}

/// 控制策略
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Strategy {
    /// 什么也不做，保持当前数量
    Fixed,
    /// 利用率低于 `min` 时减少 `step` 个单元，高于 `max` 时增加 `step` 个单元。
    ///
    /// 两个方向使用同一个步长，没有滞后区间，需求在边界附近时会振荡。
    Utilisation { min: f64, max: f64, step: f64 },
}

/// 周期性地调整集群中活动单元数量的控制器
pub struct Controller {
    identifier: String,
    control_rate: f64,
    cluster: Rc<RefCell<dyn Scalable>>,
    strategy: Strategy,
    last_signal: Option<i64>,
}

impl Controller {
    pub const DEFAULT_CONTROL_RATE: f64 = 0.1;

    pub fn new(
        identifier: impl Into<String>,
        cluster: Rc<RefCell<dyn Scalable>>,
        strategy: Strategy,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            control_rate: Self::DEFAULT_CONTROL_RATE,
            cluster,
            strategy,
            last_signal: None,
        }
    }

    /// 基准：不做任何调整
    pub fn fixed(identifier: impl Into<String>, cluster: Rc<RefCell<dyn Scalable>>) -> Self {
        Self::new(identifier, cluster, Strategy::Fixed)
    }

    pub fn utilisation(
        identifier: impl Into<String>,
        cluster: Rc<RefCell<dyn Scalable>>,
        min: f64,
        max: f64,
        step: f64,
    ) -> Self {
        Self::new(identifier, cluster, Strategy::Utilisation { min, max, step })
    }

    pub fn with_control_rate(mut self, control_rate: f64) -> Self {
        self.control_rate = control_rate;
        self
    }

    pub fn control_rate(&self) -> f64 {
        self.control_rate
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// 两次调整之间的 tick 数，至少为 1
    pub fn control_period(&self) -> Time {
        (1.0 / self.control_rate).round().max(1.0) as Time
    }

    /// 期望的活动单元数量
    pub fn signal(&self) -> i64 {
        let cluster = self.cluster.borrow();
        let count = cluster.active_unit_count() as f64;
        let signal = match self.strategy {
            Strategy::Fixed => count,
            Strategy::Utilisation { min, .. } if cluster.utilisation() < min => {
                (count - self.step()).round()
            }
            Strategy::Utilisation { max, .. } if cluster.utilisation() > max => {
                (count + self.step()).round()
            }
            Strategy::Utilisation { .. } => count,
        };
        signal as i64
    }

    fn step(&self) -> f64 {
        match self.strategy {
            Strategy::Fixed => 0.0,
            Strategy::Utilisation { step, .. } => step,
        }
    }

    fn schedule_next_control(
        &mut self,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        ctx.schedule_in(Action::Control, self.control_period())
    }

    fn control(&mut self, ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
        let signal = self.signal();
        debug!(
            controller = %self.identifier,
            now = ctx.current_time(),
            signal,
            "adjust unit count"
        );
        self.cluster.borrow_mut().set_active_unit_count(signal);
        self.last_signal = Some(signal);
        self.schedule_next_control(ctx)
    }
}

impl Agent for Controller {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn on_start(&mut self, ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
        self.schedule_next_control(ctx)
    }

    fn fire(
        &mut self,
        action: Action,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        match action {
            Action::Control => self.control(ctx),
            other => Err(SimulationError::UnexpectedAction {
                agent: self.identifier.clone(),
                action: other.to_string(),
            }),
        }
    }

    fn record_state(&mut self) -> Vec<Record> {
        match self.last_signal.take() {
            Some(signal) => vec![Record::count("signal", signal.max(0) as u64)],
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Simulation;

    /// 利用率固定的集群，记录每次调整
    struct Fake {
        utilisation: f64,
        units: usize,
        signals: Vec<i64>,
    }

    impl Fake {
        fn shared(utilisation: f64, units: usize) -> Rc<RefCell<Fake>> {
            Rc::new(RefCell::new(Fake {
                utilisation,
                units,
                signals: vec![],
            }))
        }
    }

    impl Scalable for Fake {
        fn utilisation(&self) -> f64 {
            self.utilisation
        }

        fn active_unit_count(&self) -> usize {
            self.units
        }

        fn set_active_unit_count(&mut self, count: i64) {
            self.signals.push(count);
            self.units = count.max(0) as usize;
        }
    }

    fn run(controller: Controller, until: Time) {
        let mut simulation = Simulation::new();
        simulation.add_agent(controller).unwrap();
        simulation.run_until(until).unwrap();
    }

    #[test]
    fn scales_up_above_the_maximum() {
        let cluster = Fake::shared(0.9, 5);
        run(
            Controller::utilisation("controller", cluster.clone(), 0.2, 0.8, 1.0),
            10,
        );
        assert_eq!(cluster.borrow().signals, vec![6]);
    }

    #[test]
    fn scales_down_below_the_minimum() {
        let cluster = Fake::shared(0.1, 5);
        run(
            Controller::utilisation("controller", cluster.clone(), 0.2, 0.8, 2.0),
            30,
        );
        assert_eq!(cluster.borrow().signals, vec![3, 1, -1]);
        assert_eq!(cluster.borrow().units, 0);
    }

    #[test]
    fn keeps_the_count_within_the_band() {
        let cluster = Fake::shared(0.5, 5);
        run(
            Controller::utilisation("controller", cluster.clone(), 0.2, 0.8, 1.0),
            20,
        );
        assert_eq!(cluster.borrow().signals, vec![5, 5]);
    }

    #[test]
    fn fixed_cluster_never_changes() {
        let cluster = Fake::shared(1.0, 3);
        run(Controller::fixed("controller", cluster.clone()), 35);
        assert_eq!(cluster.borrow().signals, vec![3, 3, 3]);
    }

    #[test]
    fn control_period_is_the_inverse_rate() {
        let cluster = Fake::shared(0.5, 1);
        let controller = Controller::fixed("controller", cluster.clone());
        assert_eq!(controller.control_period(), 10);
        assert_eq!(controller.with_control_rate(0.3).control_period(), 3);

        let fast = Controller::fixed("controller", cluster).with_control_rate(5.0);
        assert_eq!(fast.control_period(), 1);
    }
}
