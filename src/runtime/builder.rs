//! 仿真构建器。

use anyhow::{bail, Result};
use tracing::debug;

use crate::{
    ast::{DefineClientStub, DefineOperation, DefineService, Definition, Model},
    options::{Autoscaling, Options},
};

use super::{
    cluster::Cluster,
    scalability::Controller,
    scripted::{ScriptedClient, ScriptedService},
    AgentId, Binding, Environment, Simulation,
};

/// 把模型装入仿真的构建器。
///
/// 构建分两步：先为每个服务预留 agent 并在模型作用域中绑定，
/// 再安装 agent。这样服务之间可以互相调用，与声明顺序无关。
pub struct SimulationBuilder<'a> {
    options: Options,
    services: Vec<&'a DefineService>,
    operations: Vec<&'a DefineOperation>,
    clients: Vec<&'a DefineClientStub>,
}

impl<'a> SimulationBuilder<'a> {
    /// 创建一个新的 `SimulationBuilder`。
    pub fn new(options: Options) -> Self {
        Self {
            options,
            services: vec![],
            operations: vec![],
            clients: vec![],
        }
    }

    /// 向仿真添加一个模型。
    pub fn model(&mut self, model: &'a Model) -> &mut Self {
        for definition in &model.definitions {
            match definition {
                Definition::Service(service) => self.services.push(service),
                Definition::Operation(operation) => self.operations.push(operation),
                Definition::ClientStub(client) => self.clients.push(client),
            }
        }
        self
    }

    /// 在模型作用域中绑定所有定义，返回为服务预留的 agent。
    fn define(
        &self,
        root: &mut Environment<'a, Binding<'a>>,
        simulation: &mut Simulation<'a>,
    ) -> Result<Vec<AgentId>> {
        let mut reserved = Vec::with_capacity(self.services.len());
        for &service in &self.services {
            if root.is_local(&service.name) {
                bail!("`{}` is defined twice", service.name);
            }
            let agent = simulation.reserve();
            root.define(
                service.name.as_str(),
                Binding::Service {
                    agent,
                    definition: service,
                },
            );
            reserved.push(agent);
        }
        for &operation in &self.operations {
            if root.is_local(&operation.name) {
                bail!("`{}` is defined twice", operation.name);
            }
            root.define(operation.name.as_str(), Binding::Operation(operation));
        }
        for &client in &self.clients {
            if root.is_local(&client.name) {
                bail!("`{}` is defined twice", client.name);
            }
            root.define(client.name.as_str(), Binding::Client(client));
        }
        Ok(reserved)
    }

    /// 构建仿真。
    ///
    /// 服务的 ID 最先分配，之后依次是各服务的控制器与客户端，报告也按这个顺序。
    pub fn build(
        &self,
        root: &'a mut Environment<'a, Binding<'a>>,
        simulation: &mut Simulation<'a>,
    ) -> Result<()> {
        let reserved = self.define(root, simulation)?;
        let root: &'a Environment<'a, Binding<'a>> = root;

        for (&service, agent) in self.services.iter().zip(reserved) {
            let cluster = Cluster::shared(self.options.units);
            let identifier = format!("{} controller", service.name);
            simulation.install(
                agent,
                Box::new(ScriptedService::new(service, root, cluster.clone())),
            )?;
            let controller = match self.options.autoscaling {
                Some(Autoscaling { min, max, step }) => {
                    Controller::utilisation(identifier, cluster, min, max, step)
                }
                None => Controller::fixed(identifier, cluster),
            };
            simulation.add_agent(controller.with_control_rate(self.options.control_rate))?;
        }
        for &client in &self.clients {
            simulation.add_agent(ScriptedClient::new(client, root))?;
        }
        debug!(
            services = self.services.len(),
            clients = self.clients.len(),
            "simulation built"
        );
        Ok(())
    }
}
