use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::script::ScriptKind;

#[derive(Error, Debug)]
pub enum CollrunError {
    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("无效的参数: {0}")]
    InvalidArgument(String),

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    #[error("执行错误: {0}")]
    Execution(#[from] ExecutionError),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL 解析错误: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("TOML 解析错误: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CollrunError {
    fn from(err: anyhow::Error) -> Self {
        CollrunError::Other(err.to_string())
    }
}

/// 单个请求执行流水线中的错误
///
/// 这些错误不会越过编排器边界抛出，而是被包装进失败的 `ExecutionResult`。
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ExecutionError {
    /// 关键字段中存在无法解析（未定义或循环引用）的变量
    #[error("Unresolved variable '{variable}' in {field}: {message}")]
    VariableResolution {
        variable: String,
        field: String,
        message: String,
    },

    /// 认证参数缺失或无法满足
    #[error("Authentication '{auth_type}' failed: {message}")]
    Authentication { auth_type: String, message: String },

    /// 沙箱故障或沙箱返回了格式错误的结果
    #[error("{script_type} script failed: {message}")]
    ScriptExecution {
        script_type: ScriptKind,
        message: String,
    },

    /// 传输层或 URL 层面的失败（与 HTTP 状态码无关）
    #[error("Request failed: {message}")]
    RequestExecution {
        message: String,
        status: Option<u16>,
    },

    /// 超过单请求超时时间
    #[error("Request to {url} timed out after {}ms", timeout.as_millis())]
    Timeout {
        url: String,
        #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
        timeout: Duration,
    },
}

impl ExecutionError {
    /// 错误类别名称，供报告层使用
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::VariableResolution { .. } => "VariableResolutionError",
            ExecutionError::Authentication { .. } => "AuthenticationError",
            ExecutionError::ScriptExecution { .. } => "ScriptExecutionError",
            ExecutionError::RequestExecution { .. } => "RequestExecutionError",
            ExecutionError::Timeout { .. } => "TimeoutError",
        }
    }

    pub fn variable_resolution(
        variable: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ExecutionError::VariableResolution {
            variable: variable.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn authentication(auth_type: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Authentication {
            auth_type: auth_type.into(),
            message: message.into(),
        }
    }

    pub fn script(script_type: ScriptKind, message: impl Into<String>) -> Self {
        ExecutionError::ScriptExecution {
            script_type,
            message: message.into(),
        }
    }

    pub fn request(message: impl Into<String>) -> Self {
        ExecutionError::RequestExecution {
            message: message.into(),
            status: None,
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Result type for collrun crate
pub type Result<T> = std::result::Result<T, CollrunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_kind() {
        let err = ExecutionError::variable_resolution("host", "url", "not defined");
        assert_eq!(err.kind(), "VariableResolutionError");
        assert_eq!(
            err.to_string(),
            "Unresolved variable 'host' in url: not defined"
        );

        let err = ExecutionError::Timeout {
            url: "http://localhost/".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.kind(), "TimeoutError");
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_execution_error_converts_to_root() {
        let err: CollrunError = ExecutionError::authentication("bearer", "missing token").into();
        assert!(matches!(err, CollrunError::Execution(_)));
        assert!(err.to_string().contains("missing token"));
    }
}
