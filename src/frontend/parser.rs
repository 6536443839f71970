//! 语法解析器。

use crate::{
    ast::{self, Expression, Name},
    utils::{LinesInfo, Span},
};
use annotate_snippets::{
    display_list::{DisplayList, FormatOptions},
    snippet::{Annotation, AnnotationType, Snippet},
};
use pest::{iterators::Pair, Parser};

mod grammar {
    #[derive(Parser)]
    #[grammar = "mad.pest"]
    pub struct MadParser;
}

use grammar::{MadParser, Rule};

/// 从文本生成抽象语法树。出错时返回渲染好的诊断信息。
pub fn parse(source: &str, filename: &str) -> Result<ast::Model, String> {
    let mut parsed = MadParser::parse(Rule::Model, source).map_err(|err| {
        let (start, end) = match err.location {
            pest::error::InputLocation::Pos(pos) => (pos, pos),
            pest::error::InputLocation::Span(span) => span,
        };
        render(filename, source, &err.variant.message(), start, end)
    })?;

    ModelParser
        .parse_model(parsed.next().unwrap())
        .map_err(|overflow| {
            render(
                filename,
                source,
                "number out of range",
                overflow.start,
                overflow.end,
            )
        })
}

fn render(filename: &str, source: &str, message: &str, start: usize, end: usize) -> String {
    let lines = Span::new((), start, end)
        .lines(filename, source)
        .unwrap_or(LinesInfo {
            filename,
            ..Default::default()
        });

    let snippet = Snippet {
        title: Some(Annotation {
            id: None,
            label: Some("syntax error"),
            annotation_type: AnnotationType::Error,
        }),
        footer: vec![],
        slices: vec![lines.as_annotation(message, AnnotationType::Error)],
        opt: FormatOptions {
            color: true,
            ..Default::default()
        },
    };

    DisplayList::from(snippet).to_string()
}

/// 超出范围的数字
type Overflow = Span<()>;

#[derive(Copy, Clone)]
struct ModelParser;

impl ModelParser {
    fn parse_model(self, model: Pair<'_, Rule>) -> Result<ast::Model, Overflow> {
        let mut definitions = vec![];
        for pair in model.into_inner() {
            let definition = match pair.as_rule() {
                Rule::Service => ast::Definition::Service(self.parse_service(pair)?),
                Rule::Operation => ast::Definition::Operation(self.parse_operation(pair)?),
                Rule::Client => ast::Definition::ClientStub(self.parse_client(pair)?),
                Rule::EOI => continue,
                _ => unreachable!(),
            };
            definitions.push(definition);
        }
        Ok(ast::Model { definitions })
    }

    fn parse_service(self, service: Pair<'_, Rule>) -> Result<ast::DefineService, Overflow> {
        let mut pairs = service.into_inner();
        let name = self.parse_ident(pairs.next().unwrap());
        let operations = pairs
            .map(|pair| self.parse_operation(pair))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ast::DefineService::new(name, operations))
    }

    fn parse_operation(self, operation: Pair<'_, Rule>) -> Result<ast::DefineOperation, Overflow> {
        let mut pairs = operation.into_inner();
        let name = self.parse_ident(pairs.next().unwrap());

        let mut parameters = vec![];
        let mut next = pairs.next().unwrap();
        if next.as_rule() == Rule::Parameters {
            parameters = next.into_inner().map(|p| self.parse_ident(p)).collect();
            next = pairs.next().unwrap();
        }
        let body = self.parse_body(next)?;

        Ok(ast::DefineOperation {
            name,
            parameters,
            body,
        })
    }

    fn parse_client(self, client: Pair<'_, Rule>) -> Result<ast::DefineClientStub, Overflow> {
        let mut pairs = client.into_inner();
        let name = self.parse_ident(pairs.next().unwrap());
        let period = self.parse_number(pairs.next().unwrap())?;
        let body = self.parse_body(pairs.next().unwrap())?;
        Ok(ast::DefineClientStub { name, period, body })
    }

    /// 只有一个动作时直接使用它，否则组成序列
    fn parse_body(self, body: Pair<'_, Rule>) -> Result<Expression, Overflow> {
        let mut actions = body
            .into_inner()
            .map(|pair| self.parse_action(pair))
            .collect::<Result<Vec<_>, _>>()?;
        if actions.len() == 1 {
            Ok(actions.remove(0))
        } else {
            Ok(Expression::sequence(actions))
        }
    }

    fn parse_action(self, action: Pair<'_, Rule>) -> Result<Expression, Overflow> {
        let rule = action.as_rule();
        let mut pairs = action.into_inner();
        let expression = match rule {
            Rule::Think => Expression::Think {
                duration: self.parse_number(pairs.next().unwrap())?,
            },
            Rule::Query => Expression::Query(self.parse_invocation(pairs.next().unwrap())),
            Rule::Invoke => Expression::Trigger(self.parse_invocation(pairs.next().unwrap())),
            Rule::Retry => {
                let mut next = pairs.next().unwrap();
                let mut limit = 1;
                if next.as_rule() == Rule::Number {
                    limit = self.parse_number::<u32>(next)?.into_inner();
                    next = pairs.next().unwrap();
                }
                Expression::retry(self.parse_body(next)?, limit)
            }
            Rule::Ignore => Expression::ignore_error(self.parse_body(pairs.next().unwrap())?),
            _ => unreachable!(),
        };
        Ok(expression)
    }

    fn parse_invocation(self, invocation: Pair<'_, Rule>) -> ast::Invocation {
        let mut pairs = invocation.into_inner();
        ast::Invocation {
            service: self.parse_ident(pairs.next().unwrap()),
            operation: self.parse_ident(pairs.next().unwrap()),
        }
    }

    fn parse_number<T: std::str::FromStr>(
        self,
        number: Pair<'_, Rule>,
    ) -> Result<Span<T>, Overflow> {
        let span = number.as_span();
        match number.as_str().parse() {
            Ok(value) => Ok(Span::from_pest(value, span)),
            Err(_) => Err(Span::from_pest((), span)),
        }
    }

    fn parse_ident(self, ident: Pair<'_, Rule>) -> Name {
        Span::from_pest(ident.as_str().to_string(), ident.as_span())
    }
}
