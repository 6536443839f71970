//! 抽象语法树。
//!
//! 语法树只是数据，所有语义都在 [`crate::runtime::evaluator`] 中。

use std::fmt::Display;

use crate::runtime::Time;
use crate::utils::Span;

/// 带位置信息的名称
pub type Name = Span<String>;

/// 一个完整的模型
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    /// 按声明顺序排列的定义
    pub definitions: Vec<Definition>,
}

impl Model {
    /// 模型中的服务
    pub fn services(&self) -> impl Iterator<Item = &DefineService> {
        self.definitions.iter().filter_map(|definition| match definition {
            Definition::Service(service) => Some(service),
            _ => None,
        })
    }

    /// 模型中的客户端
    pub fn clients(&self) -> impl Iterator<Item = &DefineClientStub> {
        self.definitions.iter().filter_map(|definition| match definition {
            Definition::ClientStub(client) => Some(client),
            _ => None,
        })
    }

    /// 按名称查找服务
    pub fn service(&self, name: &str) -> Option<&DefineService> {
        self.services().find(|service| service.name.as_str() == name)
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for definition in &self.definitions {
            writeln!(f, "{}", definition)?;
        }
        Ok(())
    }
}

/// 将名称绑定到表达式的定义
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// 服务及其提供的操作
    Service(DefineService),
    /// 服务提供的操作
    Operation(DefineOperation),
    /// 以固定周期发出请求的客户端
    ClientStub(DefineClientStub),
}

impl Definition {
    /// 定义的名称
    pub fn name(&self) -> &Name {
        match self {
            Definition::Service(service) => &service.name,
            Definition::Operation(operation) => &operation.name,
            Definition::ClientStub(client) => &client.name,
        }
    }
}

impl Display for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Definition::Service(service) => service.fmt(f),
            Definition::Operation(operation) => operation.fmt(f),
            Definition::ClientStub(client) => client.fmt(f),
        }
    }
}

/// 服务定义
#[derive(Debug, Clone, PartialEq)]
pub struct DefineService {
    pub name: Name,
    pub operations: Vec<DefineOperation>,
}

impl DefineService {
    pub fn new(name: impl Into<Name>, operations: Vec<DefineOperation>) -> Self {
        Self {
            name: name.into(),
            operations,
        }
    }

    /// 按名称查找操作
    pub fn operation(&self, name: &str) -> Option<&DefineOperation> {
        self.operations
            .iter()
            .find(|operation| operation.name.as_str() == name)
    }
}

impl Display for DefineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Service({}, [{}])",
            self.name,
            self.operations
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// 操作定义
#[derive(Debug, Clone, PartialEq)]
pub struct DefineOperation {
    pub name: Name,
    /// 有序的参数列表
    pub parameters: Vec<Name>,
    pub body: Expression,
}

impl DefineOperation {
    pub fn new(name: impl Into<Name>, body: Expression) -> Self {
        Self {
            name: name.into(),
            parameters: vec![],
            body,
        }
    }
}

impl Display for DefineOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation({}, {})", self.name, self.body)
    }
}

/// 客户端定义
#[derive(Debug, Clone, PartialEq)]
pub struct DefineClientStub {
    pub name: Name,
    /// 两次发出请求之间的间隔
    pub period: Span<Time>,
    pub body: Expression,
}

impl DefineClientStub {
    pub fn new(name: impl Into<Name>, period: Time, body: Expression) -> Self {
        Self {
            name: name.into(),
            period: period.into(),
            body,
        }
    }
}

impl Display for DefineClientStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientStub({}, {}, {})", self.name, *self.period, self.body)
    }
}

/// 对远程操作的调用
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub service: Name,
    pub operation: Name,
}

impl Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.service, self.operation)
    }
}

/// 操作中可以执行的动作
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// 非阻塞调用
    Trigger(Invocation),
    /// 阻塞调用，等待回复或拒绝
    Query(Invocation),
    /// 本地耗时计算
    Think { duration: Span<Time> },
    /// 失败后最多重试 `limit` 次
    Retry {
        expression: Box<Expression>,
        limit: u32,
    },
    /// 忽略表达式的失败
    IgnoreError { expression: Box<Expression> },
    /// 按顺序执行
    Sequence { body: Vec<Expression> },
}

impl Expression {
    pub fn trigger(service: impl Into<Name>, operation: impl Into<Name>) -> Self {
        Expression::Trigger(Invocation {
            service: service.into(),
            operation: operation.into(),
        })
    }

    pub fn query(service: impl Into<Name>, operation: impl Into<Name>) -> Self {
        Expression::Query(Invocation {
            service: service.into(),
            operation: operation.into(),
        })
    }

    pub fn think(duration: Time) -> Self {
        Expression::Think {
            duration: duration.into(),
        }
    }

    pub fn retry(expression: Expression, limit: u32) -> Self {
        Expression::Retry {
            expression: Box::new(expression),
            limit,
        }
    }

    pub fn ignore_error(expression: Expression) -> Self {
        Expression::IgnoreError {
            expression: Box::new(expression),
        }
    }

    pub fn sequence(body: Vec<Expression>) -> Self {
        Expression::Sequence { body }
    }

    /// 表达式中所有的调用，按出现顺序
    pub fn invocations(&self) -> Vec<&Invocation> {
        let mut found = vec![];
        self.collect_invocations(&mut found);
        found
    }

    fn collect_invocations<'a>(&'a self, found: &mut Vec<&'a Invocation>) {
        match self {
            Expression::Trigger(invocation) | Expression::Query(invocation) => {
                found.push(invocation)
            }
            Expression::Think { .. } => {}
            Expression::Retry { expression, .. } | Expression::IgnoreError { expression } => {
                expression.collect_invocations(found)
            }
            Expression::Sequence { body } => {
                for expression in body {
                    expression.collect_invocations(found);
                }
            }
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Trigger(invocation) => write!(f, "Trigger({})", invocation),
            Expression::Query(invocation) => write!(f, "Query({})", invocation),
            Expression::Think { duration } => write!(f, "Think({})", **duration),
            Expression::Retry { expression, limit } => {
                write!(f, "Retry({}, {})", expression, limit)
            }
            Expression::IgnoreError { expression } => write!(f, "IgnoreError({})", expression),
            Expression::Sequence { body } => write!(
                f,
                "Sequence({})",
                body.iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}
