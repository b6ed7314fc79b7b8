use async_trait::async_trait;
use tracing::debug;

use crate::assertion::{evaluate_assertion, extract_text, parse_assertion, parse_value_path};
use crate::http::Response;
use crate::script::{ScriptError, ScriptInput, ScriptKind, ScriptOutcome, ScriptSandbox, TestOutcome};
use crate::variable::{ScopeStore, VariableResolver, VariableScope, VariableWrite};

/// 行式指令沙箱
///
/// 每行一条指令，`#` 或 `//` 开头为注释。执行前先用变量快照替换 `{{name}}`。
///
/// - `assert <断言表达式>`：对响应求值，结果以表达式文本命名
/// - `set <scope> <name> = <来源>`：来源为 `body.<path>`、`header.<name>`、`status`、
///   `response.time` 或带引号的字面量
/// - `unset <scope> <name>`
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveSandbox;

impl DirectiveSandbox {
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, source: &str, input: &ScriptInput) -> Result<ScriptOutcome, ScriptError> {
        let snapshot = ScopeStore::new(VariableScope::Override, "Snapshot").with_values(
            input
                .variables
                .resolved
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        let mut outcome = ScriptOutcome::default();
        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            let line = VariableResolver::resolve(line, &[&snapshot]);
            let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line.as_str(), ""));

            match directive {
                "assert" => {
                    let response = require_response(input, line_no, directive)?;
                    outcome.assertions.push(assert_line(rest.trim(), response));
                }
                "set" => {
                    let write = set_line(rest, input.response.as_ref(), line_no)?;
                    outcome.writes.push(write);
                }
                "unset" => {
                    let mut parts = rest.split_whitespace();
                    let (Some(scope), Some(name), None) = (parts.next(), parts.next(), parts.next())
                    else {
                        return Err(syntax(line_no, "expected `unset <scope> <name>`"));
                    };
                    outcome
                        .writes
                        .push(VariableWrite::unset(parse_scope(scope, line_no)?, name));
                }
                other => {
                    return Err(syntax(line_no, format!("unknown directive '{}'", other)));
                }
            }
        }

        debug!(
            kind = %input.kind,
            writes = outcome.writes.len(),
            assertions = outcome.assertions.len(),
            "directive script finished"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl ScriptSandbox for DirectiveSandbox {
    async fn run(
        &self,
        _kind: ScriptKind,
        source: &str,
        input: &ScriptInput,
    ) -> Result<ScriptOutcome, ScriptError> {
        self.execute(source, input)
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Syntax {
        line,
        message: message.into(),
    }
}

fn require_response<'a>(
    input: &'a ScriptInput,
    line: usize,
    directive: &str,
) -> Result<&'a Response, ScriptError> {
    input.response.as_ref().ok_or_else(|| {
        ScriptError::Runtime(format!(
            "line {}: '{}' needs a response, unavailable in a {} script",
            line, directive, input.kind
        ))
    })
}

fn parse_scope(s: &str, line: usize) -> Result<VariableScope, ScriptError> {
    s.parse().map_err(|e: crate::CollrunError| syntax(line, e.to_string()))
}

/// 断言语法错误记为失败的断言，不中断脚本
fn assert_line(expr: &str, response: &Response) -> TestOutcome {
    match parse_assertion(expr) {
        Ok(assertion) => {
            let result = evaluate_assertion(&assertion, response);
            TestOutcome {
                name: expr.to_string(),
                passed: result.passed,
                message: result.message,
            }
        }
        Err(e) => TestOutcome::fail(expr, e.to_string()),
    }
}

fn set_line(
    rest: &str,
    response: Option<&Response>,
    line: usize,
) -> Result<VariableWrite, ScriptError> {
    let (target, source) = rest
        .split_once('=')
        .ok_or_else(|| syntax(line, "expected `set <scope> <name> = <source>`"))?;

    let mut parts = target.split_whitespace();
    let (Some(scope), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(syntax(line, "expected `set <scope> <name> = <source>`"));
    };
    let scope = parse_scope(scope, line)?;

    let source = source.trim();
    if source.len() >= 2
        && ((source.starts_with('"') && source.ends_with('"'))
            || (source.starts_with('\'') && source.ends_with('\'')))
    {
        return Ok(VariableWrite::set(scope, name, &source[1..source.len() - 1]));
    }

    let path = parse_value_path(source).map_err(|e| syntax(line, e.to_string()))?;
    let response = response.ok_or_else(|| {
        ScriptError::Runtime(format!(
            "line {}: capturing '{}' needs a response",
            line, source
        ))
    })?;
    let value = extract_text(response, &path)
        .map_err(|e| ScriptError::Runtime(format!("line {}: {}", line, e)))?;
    Ok(VariableWrite::set(scope, name, value))
}
