//! 敏感性分析实验。
//!
//! 用桩代替真实的服务和客户端，一次只改变一个参数，多次重复运行。

use std::collections::HashMap;

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use super::{
    client::Client, Action, Agent, Format, Meter, Record, RequestId, SimulationContext,
    SimulationError, Time,
};

/// 固定响应时间、按概率拒绝请求的服务端桩
pub struct ServiceStub {
    identifier: String,
    response_time: Time,
    rejection_rate: f64,
    random: StdRng,
    meter: Meter,
}

impl ServiceStub {
    pub const DEFAULT_SEED: u64 = 42;

    pub fn new(identifier: impl Into<String>, response_time: Time, rejection_rate: f64) -> Self {
        Self {
            identifier: identifier.into(),
            response_time,
            rejection_rate: if rejection_rate.is_nan() {
                0.0
            } else {
                rejection_rate.clamp(0.0, 1.0)
            },
            random: StdRng::seed_from_u64(Self::DEFAULT_SEED),
            meter: Meter::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random = StdRng::seed_from_u64(seed);
        self
    }
}

impl Agent for ServiceStub {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn process(
        &mut self,
        request: RequestId,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        self.meter.new_request();
        if self.random.gen_bool(self.rejection_rate) {
            self.meter.new_rejection();
            ctx.reject(request)
        } else {
            ctx.schedule_in(Action::Complete(request), self.response_time)
        }
    }

    fn fire(
        &mut self,
        action: Action,
        ctx: &mut SimulationContext<'_>,
    ) -> Result<(), SimulationError> {
        match action {
            Action::Complete(request) => {
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
        let records = vec![
            Record::count("request", self.meter.request_count()),
            Record::count("rejection", self.meter.rejection_count()),
            Record::count("throughput", self.meter.throughput()),
            Record::decimal("response time", self.meter.average_response_time()),
        ];
        self.meter.reset();
        records
    }
}

/// 以每 tick 的请求数给出速率的客户端桩
pub fn client_stub(identifier: impl Into<String>, emission_rate: f64) -> Client {
    let period = (1.0 / emission_rate).round().max(1.0) as Time;
    Client::stub(identifier, period)
}

/// 被扫描的参数：`min..=max` 中步长为 `step` 的整数，经 `scaling` 变换
pub struct Parameter {
    pub name: String,
    pub format: Format,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    scaling: Box<dyn Fn(f64) -> f64>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, format: Format, min: i64, max: i64, step: i64) -> Self {
        Self {
            name: name.into(),
            format,
            min,
            max,
            step,
            scaling: Box::new(|value| value),
        }
    }

    pub fn with_scaling(mut self, scaling: impl Fn(f64) -> f64 + 'static) -> Self {
        self.scaling = Box::new(scaling);
        self
    }

    /// 参数所有的取值，按升序
    pub fn domain(&self) -> Vec<f64> {
        (self.min..=self.max)
            .step_by(self.step.max(1) as usize)
            .map(|value| (self.scaling)(value as f64))
            .collect()
    }

    /// 扫描其他参数时这个参数的取值
    pub fn default_value(&self) -> f64 {
        (self.scaling)(self.min as f64)
    }

    pub fn render(&self, value: f64) -> String {
        self.format.render(value)
    }
}

/// 一次运行的参数取值
#[derive(Clone, Debug, PartialEq)]
pub struct Trial {
    /// 正在扫描的参数
    pub parameter: String,
    pub values: HashMap<String, f64>,
    /// 同一组取值下的第几次运行
    pub run: usize,
    pub seed: u64,
}

impl Trial {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// 一次一个参数的敏感性分析
pub struct SensitivityAnalysis {
    pub parameters: Vec<Parameter>,
    /// 每组取值重复运行的次数
    pub run_count: usize,
}

impl SensitivityAnalysis {
    pub fn new(parameters: Vec<Parameter>, run_count: usize) -> Self {
        Self {
            parameters,
            run_count,
        }
    }

    /// 所有运行的参数取值。扫描一个参数时其他参数取最小值。
    ///
    /// 第 `i` 次运行的种子为 `seed + i`。
    pub fn trials(&self, seed: u64) -> Vec<Trial> {
        let defaults: HashMap<String, f64> = self
            .parameters
            .iter()
            .map(|parameter| (parameter.name.clone(), parameter.default_value()))
            .collect();

        let mut trials = vec![];
        for parameter in &self.parameters {
            for value in parameter.domain() {
                let mut values = defaults.clone();
                values.insert(parameter.name.clone(), value);
                for run in 0..self.run_count {
                    trials.push(Trial {
                        parameter: parameter.name.clone(),
                        values: values.clone(),
                        run,
                        seed: seed.wrapping_add(trials.len() as u64),
                    });
                }
            }
        }
        trials
    }

    /// 依次执行所有运行，收集每次运行的结果
    pub fn run<T>(
        &self,
        seed: u64,
        mut one_run: impl FnMut(&Trial) -> Result<T>,
    ) -> Result<Vec<(Trial, T)>> {
        let trials = self.trials(seed);
        info!(
            parameters = self.parameters.len(),
            runs = trials.len(),
            "sensitivity analysis"
        );
        let mut results = Vec::with_capacity(trials.len());
        for trial in trials {
            debug!(parameter = %trial.parameter, run = trial.run, seed = trial.seed, "trial");
            let result = one_run(&trial)?;
            results.push((trial, result));
        }
        Ok(results)
    }
}
