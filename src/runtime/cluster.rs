//! 处理单元集群，以及以集群为容量的服务端。

use std::{cell::RefCell, rc::Rc};

use tracing::debug;

use super::{
    scalability::Scalable, Action, Agent, Meter, Record, RequestId, SimulationContext,
    SimulationError, Time,
};

/// 可以调整活动单元数量的处理单元集群。
///
/// 每个忙碌的单元处理一个请求，没有空闲单元时请求被拒绝。
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    active: usize,
    busy: usize,
}

/// 服务端与控制器共享的集群
pub type SharedCluster = Rc<RefCell<Cluster>>;

impl Cluster {
    pub fn new(active: usize) -> Self {
        Self { active, busy: 0 }
    }

    pub fn shared(active: usize) -> SharedCluster {
        Rc::new(RefCell::new(Self::new(active)))
    }

    pub fn busy_unit_count(&self) -> usize {
        self.busy
    }

    /// 有空闲单元时占用一个
    pub fn try_acquire(&mut self) -> bool {
        if self.busy < self.active {
            self.busy += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self) {
        self.busy = self.busy.saturating_sub(1);
    }
}

impl Scalable for Cluster {
    /// 忙碌单元所占的比例；没有活动单元时视为饱和。
    ///
    /// 单元被移除时仍在处理的请求会继续占用，此时可能超过 1。
    fn utilisation(&self) -> f64 {
        if self.active == 0 {
            1.0
        } else {
            self.busy as f64 / self.active as f64
        }
    }

    fn active_unit_count(&self) -> usize {
        self.active
    }

    fn set_active_unit_count(&mut self, count: i64) {
        self.active = count.max(0) as usize;
    }
}

/// 每个请求耗时固定的服务端
pub struct Server {
    identifier: String,
    service_time: Time,
    cluster: SharedCluster,
    meter: Meter,
}

impl Server {
    pub fn new(identifier: impl Into<String>, service_time: Time, cluster: SharedCluster) -> Self {
        Self {
            identifier: identifier.into(),
            service_time,
            cluster,
            meter: Meter::new(),
        }
    }

    pub fn cluster(&self) -> &SharedCluster {
        &self.cluster
    }
}

impl Agent for Server {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn process(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        self.meter.new_request();
        if self.cluster.borrow_mut().try_acquire() {
            ctx.schedule_in(Action::Complete(request), self.service_time)
        } else {
            debug!(server = %self.identifier, %request, "overloaded");
            self.meter.new_rejection();
            ctx.reject(request)
        }
    }

    fn fire(
        &mut self,
        action: Action,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        match action {
            Action::Complete(request) => {
                self.cluster.borrow_mut().release();
                ctx.reply(request)?;
                let response_time = ctx.request(request)?.response_time()?;
                self.meter.new_success(response_time);
                Ok(())
            }
            other => Err(SimulationError::UnexpectedAction {
                agent: self.identifier.clone(),
                action: other.to_string(),
            }),
        }
    }

    fn record_state(&mut self) -> Vec<Record> {
        let records = service_records(&self.meter, &self.cluster.borrow());
        self.meter.reset();
        records
    }
}

/// 服务端每个周期报告的指标
pub(crate) fn service_records(meter: &Meter, cluster: &Cluster) -> Vec<Record> {
    vec![
        Record::count("request", meter.request_count()),
        Record::count("rejection", meter.rejection_count()),
        Record::count("throughput", meter.throughput()),
        Record::decimal("response time", meter.average_response_time()),
        Record::decimal("utilisation", cluster.utilisation()),
        Record::count("units", cluster.active_unit_count() as u64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{client::Client, report::Recorder, Simulation};

    #[test]
    fn utilisation_is_the_busy_fraction() {
        let mut cluster = Cluster::new(4);
        assert_eq!(cluster.utilisation(), 0.0);
        assert!(cluster.try_acquire());
        assert!(cluster.try_acquire());
        assert_eq!(cluster.utilisation(), 0.5);

        cluster.set_active_unit_count(1);
        assert_eq!(cluster.utilisation(), 2.0);
        assert!(!cluster.try_acquire());
    }

    #[test]
    fn unit_count_is_clamped_to_zero() {
        let mut cluster = Cluster::new(1);
        cluster.set_active_unit_count(-3);
        assert_eq!(cluster.active_unit_count(), 0);
        assert_eq!(cluster.utilisation(), 1.0);
        assert!(!cluster.try_acquire());
    }

    #[test]
    fn server_rejects_when_every_unit_is_busy() {
        let mut simulation = Simulation::new();
        let cluster = Cluster::shared(2);
        let server = simulation
            .add_agent(Server::new("server", 10, cluster.clone()))
            .unwrap();
        simulation
            .add_agent(Client::stub("client", 3).with_server(server))
            .unwrap();

        let mut recorder = Recorder::default();
        simulation
            .run_with_reports(30, 30, &mut recorder)
            .unwrap();

        // 发出于 3, 6, 9, ...；每个请求占用一个单元 10 个 tick
        assert_eq!(recorder.total("server", "request"), 10.0);
        assert_eq!(recorder.total("server", "throughput"), 4.0);
        assert_eq!(recorder.total("server", "rejection"), 4.0);
        assert_eq!(recorder.total("server", "response time"), 10.0);
        assert_eq!(cluster.borrow().busy_unit_count(), 2);
    }
}
