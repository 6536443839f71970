//! 由模型定义驱动的服务与客户端。

use tracing::debug;

use super::{
    cluster::{service_records, SharedCluster},
    evaluator::Completion,
    Action, Agent, Binding, Environment, Evaluator, Meter, Outcome, Record, RequestId,
    SimulationContext, SimulationError, Time,
};
use crate::ast::{DefineClientStub, DefineOperation, DefineService};

/// 按操作定义处理请求的服务。
///
/// 每个请求占用集群中的一个单元直到其操作体求值结束；
/// 没有空闲单元时请求立即被拒绝。
pub struct ScriptedService<'a> {
    definition: &'a DefineService,
    evaluator: Evaluator<'a>,
    cluster: SharedCluster,
    meter: Meter,
}

impl<'a> ScriptedService<'a> {
    /// 在 `parent` 之下创建服务的作用域，其中绑定服务的所有操作
    pub fn new(
        definition: &'a DefineService,
        parent: &'a Environment<'a, Binding<'a>>,
        cluster: SharedCluster,
    ) -> Self {
        let mut scope = parent.create_local_environment();
        for operation in &definition.operations {
            scope.define(operation.name.as_str(), Binding::Operation(operation));
        }
        Self {
            definition,
            evaluator: Evaluator::new(scope),
            cluster,
            meter: Meter::new(),
        }
    }

    pub fn cluster(&self) -> &SharedCluster {
        &self.cluster
    }

    fn operation(&self, name: Option<&str>) -> Result<&'a DefineOperation, SimulationError> {
        let found = name.and_then(|name| match self.evaluator.scope().look_up(name) {
            Some(Binding::Operation(operation)) => Some(*operation),
            _ => None,
        });
        found.ok_or_else(|| SimulationError::UnknownOperation {
            service: self.definition.name.to_string(),
            operation: name.unwrap_or_default().to_string(),
        })
    }

    fn finish(
        &mut self,
        completion: Option<Completion>,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let Some(completion) = completion else {
            return Ok(());
        };
        self.cluster.borrow_mut().release();
        let Some(request) = completion.origin else {
            return Ok(());
        };
        match completion.outcome {
            Outcome::Success => {
                ctx.reply(request)?;
                let response_time = ctx.request(request)?.response_time()?;
                self.meter.new_success(response_time);
                Ok(())
            }
            Outcome::Failure => {
                self.meter.new_rejection();
                ctx.reject(request)
            }
        }
    }
}

impl<'a> Agent for ScriptedService<'a> {
    fn identifier(&self) -> &str {
        &self.definition.name
    }

    fn process(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        self.meter.new_request();
        let operation = self.operation(ctx.request(request)?.operation.as_deref())?;
        if !self.cluster.borrow_mut().try_acquire() {
            debug!(service = %self.definition.name, %request, "overloaded");
            self.meter.new_rejection();
            return ctx.reject(request);
        }
        let completion = self.evaluator.start(&operation.body, Some(request), ctx)?;
        self.finish(completion, ctx)
    }

    fn fire(
        &mut self,
        action: Action,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        match action {
            Action::Resume(flow) => {
                let completion = self.evaluator.resume(flow, ctx)?;
                self.finish(completion, ctx)
            }
            other => Err(SimulationError::UnexpectedAction {
                agent: self.definition.name.to_string(),
                action: other.to_string(),
            }),
        }
    }

    fn on_completion_of(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let completion = self.evaluator.on_reply(request, Outcome::Success, ctx)?;
        self.finish(completion, ctx)
    }

    fn on_rejection_of(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let completion = self.evaluator.on_reply(request, Outcome::Failure, ctx)?;
        self.finish(completion, ctx)
    }

    fn record_state(&mut self) -> Vec<Record> {
        let records = service_records(&self.meter, &self.cluster.borrow());
        self.meter.reset();
        records
    }
}

/// 开环客户端：每个周期开始一次新的求值，不等待之前的求值结束
pub struct ScriptedClient<'a> {
    definition: &'a DefineClientStub,
    evaluator: Evaluator<'a>,
    meter: Meter,
}

impl<'a> ScriptedClient<'a> {
    pub fn new(definition: &'a DefineClientStub, parent: &'a Environment<'a, Binding<'a>>) -> Self {
        Self {
            definition,
            evaluator: Evaluator::new(parent.create_local_environment()),
            meter: Meter::new(),
        }
    }

    fn period(&self) -> Time {
        (*self.definition.period).max(1)
    }

    fn finish(&mut self, completion: Option<Completion>, now: Time) {
        match completion {
            Some(Completion {
                outcome: Outcome::Success,
                started_at,
                ..
            }) => self.meter.new_success(now - started_at),
            Some(Completion {
                outcome: Outcome::Failure,
                ..
            }) => self.meter.new_rejection(),
            None => {}
        }
    }
}

impl<'a> Agent for ScriptedClient<'a> {
    fn identifier(&self) -> &str {
        &self.definition.name
    }

    fn on_start(&mut self, ctx: &mut SimulationContext<'_>) -> Result<(), SimulationError> {
        ctx.schedule_in(Action::Send, self.period())
    }

    fn fire(
        &mut self,
        action: Action,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let completion = match action {
            Action::Send => {
                let definition = self.definition;
                ctx.schedule_in(Action::Send, self.period())?;
                self.meter.new_request();
                self.evaluator.start(&definition.body, None, ctx)?
            }
            Action::Resume(flow) => self.evaluator.resume(flow, ctx)?,
            other => {
                return Err(SimulationError::UnexpectedAction {
                    agent: self.definition.name.to_string(),
                    action: other.to_string(),
                })
            }
        };
        self.finish(completion, ctx.current_time());
        Ok(())
    }

    fn on_completion_of(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let completion = self.evaluator.on_reply(request, Outcome::Success, ctx)?;
        self.finish(completion, ctx.current_time());
        Ok(())
    }

    fn on_rejection_of(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        let completion = self.evaluator.on_reply(request, Outcome::Failure, ctx)?;
        self.finish(completion, ctx.current_time());
        Ok(())
    }

    fn record_state(&mut self) -> Vec<Record> {
        let records = vec![
            Record::count("request", self.meter.request_count()),
            Record::count("throughput", self.meter.throughput()),
            Record::count("rejection", self.meter.rejection_count()),
            Record::decimal("response time", self.meter.average_response_time()),
        ];
        self.meter.reset();
        records
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::Expression,
        runtime::{cluster::Cluster, report::Recorder, Simulation},
    };

    fn db() -> DefineService {
        DefineService::new(
            "DB",
            vec![DefineOperation::new("Select", Expression::think(5))],
        )
    }

    #[test]
    fn service_holds_a_unit_while_its_operation_runs() {
        let db = db();
        let client = DefineClientStub::new("Browser", 2, Expression::query("DB", "Select"));

        let mut root = Environment::new();
        let mut simulation = Simulation::new();
        let id = simulation.reserve();
        root.define(
            "DB",
            Binding::Service {
                agent: id,
                definition: &db,
            },
        );
        let root = &root;
        let cluster = Cluster::shared(2);
        simulation
            .install(id, Box::new(ScriptedService::new(&db, root, cluster.clone())))
            .unwrap();
        simulation
            .add_agent(ScriptedClient::new(&client, root))
            .unwrap();

        let mut recorder = Recorder::default();
        simulation
            .run_with_reports(20, 20, &mut recorder)
            .unwrap();

        // 请求发出于 2, 4, ..., 20；每个占用一个单元 5 个 tick，
        // 于是 6, 12, 18 发出的请求被拒绝
        assert_eq!(recorder.total("DB", "request"), 10.0);
        assert_eq!(recorder.total("DB", "rejection"), 3.0);
        assert_eq!(recorder.total("DB", "throughput"), 5.0);
        assert_eq!(recorder.total("DB", "response time"), 5.0);
        assert_eq!(recorder.total("Browser", "request"), 10.0);
        assert_eq!(recorder.total("Browser", "rejection"), 3.0);
        assert_eq!(recorder.total("Browser", "throughput"), 5.0);
        assert_eq!(recorder.total("Browser", "response time"), 5.0);
        assert_eq!(cluster.borrow().busy_unit_count(), 2);
    }

    #[test]
    fn unknown_operation_is_reported_with_its_service() {
        let db = db();
        let client = DefineClientStub::new("Browser", 1, Expression::trigger("DB", "Insert"));

        let mut root = Environment::new();
        let mut simulation = Simulation::new();
        let id = simulation.reserve();
        root.define(
            "DB",
            Binding::Service {
                agent: id,
                definition: &db,
            },
        );
        // 服务本身直接收到未知操作的请求
        let service = ScriptedService::new(&db, &root, Cluster::shared(1));
        assert_eq!(
            service.operation(Some("Insert")).err(),
            Some(SimulationError::UnknownOperation {
                service: "DB".into(),
                operation: "Insert".into()
            })
        );

        simulation.install(id, Box::new(service)).unwrap();
        simulation
            .add_agent(ScriptedClient::new(&client, &root))
            .unwrap();
        assert!(simulation.run_until(5).is_err());
    }
}
