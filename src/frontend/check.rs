//! 语义检查。

use std::collections::{HashMap, HashSet};

use annotate_snippets::{
    display_list::{DisplayList, FormatOptions},
    snippet::{Annotation, AnnotationType, Snippet},
};
use thiserror::Error;

use crate::{
    ast::{DefineService, Definition, Expression, Model, Name},
    runtime::Time,
    utils::Span,
};

/// 模型中的错误，附带出错的位置
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    #[error("unknown service `{service}`")]
    UnknownService { service: Name },

    #[error("unknown operation `{operation}` on service `{service}`")]
    UnknownOperation { service: Name, operation: Name },

    #[error("{kind} `{name}` is defined more than once")]
    Duplicate { kind: &'static str, name: Name },

    #[error("operation `{operation}` must be declared inside a service")]
    OperationOutsideService { operation: Name },

    #[error("client `{client}` must wait at least one tick between requests")]
    ZeroPeriod { client: Name, period: Span<Time> },
}

impl CheckError {
    fn location(&self) -> (usize, usize) {
        let span = match self {
            CheckError::UnknownService { service } => service,
            CheckError::UnknownOperation { operation, .. } => operation,
            CheckError::Duplicate { name, .. } => name,
            CheckError::OperationOutsideService { operation } => operation,
            CheckError::ZeroPeriod { period, .. } => {
                return (period.start, period.end);
            }
        };
        (span.start, span.end)
    }

    fn label(&self) -> &'static str {
        match self {
            CheckError::UnknownService { .. } => "no such service",
            CheckError::UnknownOperation { .. } => "no such operation",
            CheckError::Duplicate { .. } => "defined again here",
            CheckError::OperationOutsideService { .. } => "not inside a service",
            CheckError::ZeroPeriod { .. } => "period must be positive",
        }
    }

    /// 渲染为带源码片段的诊断信息
    pub fn to_snippet(&self, filename: &str, source: &str) -> String {
        let message = self.to_string();
        let (start, end) = self.location();
        let lines = Span::new((), start, end)
            .lines(filename, source)
            .unwrap_or_default();

        let snippet = Snippet {
            title: Some(Annotation {
                id: None,
                label: Some(message.as_str()),
                annotation_type: AnnotationType::Error,
            }),
            footer: vec![],
            slices: vec![lines.as_annotation(self.label(), AnnotationType::Error)],
            opt: FormatOptions {
                color: true,
                ..Default::default()
            },
        };

        DisplayList::from(snippet).to_string()
    }
}

/// 同一作用域内的名称不能重复
fn check_unique<'a>(
    kind: &'static str,
    names: impl IntoIterator<Item = &'a Name>,
) -> Result<(), CheckError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(CheckError::Duplicate {
                kind,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

/// 服务中的操作与操作的参数都不能重复
pub fn check_service(service: &DefineService) -> Result<(), CheckError> {
    check_unique("operation", service.operations.iter().map(|o| &o.name))?;
    for operation in &service.operations {
        check_unique("parameter", &operation.parameters)?;
    }
    Ok(())
}

/// 调用的服务与操作必须存在
pub fn check_invocations(
    body: &Expression,
    services: &HashMap<&str, &DefineService>,
) -> Result<(), CheckError> {
    for invocation in body.invocations() {
        let Some(service) = services.get(invocation.service.as_str()) else {
            return Err(CheckError::UnknownService {
                service: invocation.service.clone(),
            });
        };
        if service.operation(&invocation.operation).is_none() {
            return Err(CheckError::UnknownOperation {
                service: invocation.service.clone(),
                operation: invocation.operation.clone(),
            });
        }
    }
    Ok(())
}

/// 检查一个模型。`previous` 是之前已经加入的模型，它们的服务可以被调用。
pub fn check_model(model: &Model, previous: &[Model]) -> Result<(), CheckError> {
    let mut names: HashSet<&str> = previous
        .iter()
        .flat_map(|model| &model.definitions)
        .map(|definition| definition.name().as_str())
        .collect();
    for definition in &model.definitions {
        let name = definition.name();
        if !names.insert(name.as_str()) {
            let kind = match definition {
                Definition::Service(_) => "service",
                Definition::Operation(_) => "operation",
                Definition::ClientStub(_) => "client",
            };
            return Err(CheckError::Duplicate {
                kind,
                name: name.clone(),
            });
        }
    }

    let services: HashMap<&str, &DefineService> = previous
        .iter()
        .chain(std::iter::once(model))
        .flat_map(|model| model.services())
        .map(|service| (service.name.as_str(), service))
        .collect();

    for definition in &model.definitions {
        match definition {
            Definition::Service(service) => {
                check_service(service)?;
                for operation in &service.operations {
                    check_invocations(&operation.body, &services)?;
                }
            }
            Definition::Operation(operation) => {
                return Err(CheckError::OperationOutsideService {
                    operation: operation.name.clone(),
                });
            }
            Definition::ClientStub(client) => {
                if *client.period == 0 {
                    return Err(CheckError::ZeroPeriod {
                        client: client.name.clone(),
                        period: client.period.clone(),
                    });
                }
                check_invocations(&client.body, &services)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::parser::parse;

    const DB: &str = "service DB:\n   operation Select:\n      think 5\n";

    fn check(source: &str) -> Result<(), CheckError> {
        check_model(&parse(source, "test.mad").unwrap(), &[])
    }

    #[test]
    fn accepts_a_valid_model() {
        let source = format!("{DB}client Browser:\n   every 5:\n      query DB/Select\n");
        assert_eq!(check(&source), Ok(()));
    }

    #[test]
    fn reports_unknown_operation_with_its_service() {
        let source = format!("{DB}client Browser:\n   every 5:\n      query DB/Insert\n");
        let error = check(&source).unwrap_err();
        let CheckError::UnknownOperation { service, operation } = &error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!(service.as_str(), "DB");
        assert_eq!(operation.as_str(), "Insert");
        assert_eq!(&source[operation.start..operation.end], "Insert");

        let snippet = error.to_snippet("test.mad", &source);
        assert!(snippet.contains("unknown operation `Insert` on service `DB`"));
        assert!(snippet.contains("test.mad"));
    }

    #[test]
    fn reports_unknown_service() {
        let error = check("client Browser: every 5: invoke Cache/Get").unwrap_err();
        assert_eq!(error.to_string(), "unknown service `Cache`");
    }

    #[test]
    fn reports_duplicate_names() {
        let error = check("service A: operation X: think 1 operation X: think 2").unwrap_err();
        assert_eq!(error.to_string(), "operation `X` is defined more than once");

        let error = check("service A: operation X(p, p): think 1").unwrap_err();
        assert_eq!(error.to_string(), "parameter `p` is defined more than once");

        let error = check(&format!("{DB}client DB: every 1: think 1")).unwrap_err();
        assert_eq!(error.to_string(), "client `DB` is defined more than once");
    }

    #[test]
    fn reports_operations_outside_services() {
        let error = check("operation Lost: think 1").unwrap_err();
        assert_eq!(
            error.to_string(),
            "operation `Lost` must be declared inside a service"
        );
    }

    #[test]
    fn reports_zero_periods() {
        let error = check("client Browser: every 0: think 1").unwrap_err();
        assert!(matches!(error, CheckError::ZeroPeriod { .. }));
    }

    #[test]
    fn services_of_previous_models_are_visible() {
        let db = parse(DB, "db.mad").unwrap();
        let browser = parse("client Browser: every 5: query DB/Select", "browser.mad").unwrap();
        assert_eq!(check_model(&browser, &[db.clone()]), Ok(()));

        let error = check_model(&db, &[db.clone()]).unwrap_err();
        assert_eq!(error.to_string(), "service `DB` is defined more than once");
    }
}
