//! Microservice Architecture Dynamics.
//!
//! A discrete-event simulator for service-oriented architectures: services
//! with a bounded number of processing units, clients issuing requests at a
//! fixed rate, and controllers scaling the services at run time.

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod ast;
pub mod frontend;
pub mod options;
pub mod runtime;
pub(crate) mod utils;

use anyhow::Result;
use ast::Model;
use options::Options;
use runtime::{report::Report, Environment, Simulation, SimulationBuilder};
use tracing::info;

/// 仿真上下文
#[derive(Default)]
pub struct Context {
    models: Vec<Model>,
    options: Options,
}

impl Context {
    /// 创建一个新的仿真上下文。
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置仿真选项。
    pub fn set_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// 仿真选项。
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// 已经加入的模型。
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// 解析并检查模型。之前加入的模型中的服务在这里可见。
    pub fn add_file(mut self, filename: &str, source: &str) -> Result<Self> {
        let model = match frontend::parse(source, filename) {
            Ok(model) => model,
            Err(snippet) => anyhow::bail!("{}", snippet),
        };

        if let Err(e) = frontend::check_model(&model, &self.models) {
            anyhow::bail!("{}", e.to_snippet(filename, source));
        }

        info!(
            filename,
            definitions = model.definitions.len(),
            "model loaded"
        );
        self.models.push(model);
        Ok(self)
    }

    /// 运行仿真，每个报告周期把所有 agent 的指标写入 `report`。
    pub fn simulate(&self, report: &mut dyn Report) -> Result<()> {
        let mut builder = SimulationBuilder::new(self.options.clone());
        for model in &self.models {
            builder.model(model);
        }

        let mut root = Environment::new();
        let mut simulation = Simulation::new();
        builder.build(&mut root, &mut simulation)?;
        simulation.run_with_reports(self.options.end_time, self.options.report_period, report)
    }
}
