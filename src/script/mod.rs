//! 脚本沙箱边界
//!
//! 执行器与脚本之间只交换可序列化的消息：沙箱收到变量快照、请求与响应，
//! 返回变量写入列表和命名断言结果。沙箱不直接接触执行上下文。

pub mod command;
pub mod directive;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::RequestDef;
use crate::http::{OutgoingRequest, Response};
use crate::variable::{VariableSnapshot, VariableWrite};

pub use command::CommandSandbox;
pub use directive::DirectiveSandbox;

/// 脚本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    #[serde(rename = "prerequest")]
    PreRequest,
    Test,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::PreRequest => write!(f, "prerequest"),
            ScriptKind::Test => write!(f, "test"),
        }
    }
}

/// 交给沙箱的只读输入
#[derive(Debug, Clone, Serialize)]
pub struct ScriptInput {
    pub kind: ScriptKind,
    /// 请求节点名称
    pub name: String,
    /// 脚本所属节点的位置描述，如 `Folder 'Users'`
    pub origin: String,
    pub variables: VariableSnapshot,
    /// 未解析的请求模板
    pub template: RequestDef,
    /// 实际发出的请求，仅测试脚本可见
    pub request: Option<OutgoingRequest>,
    /// 仅测试脚本可见
    pub response: Option<Response>,
}

/// 一个命名断言的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl TestOutcome {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// 沙箱返回的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    #[serde(default)]
    pub writes: Vec<VariableWrite>,
    #[serde(default)]
    pub assertions: Vec<TestOutcome>,
}

impl ScriptOutcome {
    pub fn all_passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }
}

/// 沙箱故障
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("script runtime error: {0}")]
    Runtime(String),

    #[error("malformed sandbox output: {0}")]
    MalformedOutput(String),

    #[error("sandbox did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 脚本解释器协作者
#[async_trait]
pub trait ScriptSandbox: Send + Sync {
    async fn run(
        &self,
        kind: ScriptKind,
        source: &str,
        input: &ScriptInput,
    ) -> Result<ScriptOutcome, ScriptError>;
}

/// 不执行任何脚本的沙箱
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSandbox;

#[async_trait]
impl ScriptSandbox for NoopSandbox {
    async fn run(
        &self,
        _kind: ScriptKind,
        _source: &str,
        _input: &ScriptInput,
    ) -> Result<ScriptOutcome, ScriptError> {
        Ok(ScriptOutcome::default())
    }
}
