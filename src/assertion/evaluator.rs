use serde::Serialize;

use crate::assertion::extractor::extract_value;
use crate::assertion::types::{AssertError, AssertExpr};
use crate::http::Response;

/// 断言结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionResult {
    /// 规范化后的断言文本
    pub raw: String,
    pub passed: bool,
    /// 实际值（字符串表示）
    pub actual: Option<String>,
    pub expected: String,
    /// 失败消息
    pub message: Option<String>,
}

impl AssertionResult {
    fn success(raw: String, actual: String, expected: String) -> Self {
        Self {
            raw,
            passed: true,
            actual: Some(actual),
            expected,
            message: None,
        }
    }

    fn failure(raw: String, actual: String, expected: String, message: String) -> Self {
        Self {
            raw,
            passed: false,
            actual: Some(actual),
            expected,
            message: Some(message),
        }
    }

    /// 提取或比较本身出错
    pub fn error(raw: String, error: AssertError) -> Self {
        Self {
            raw,
            passed: false,
            actual: None,
            expected: String::new(),
            message: Some(error.to_string()),
        }
    }
}

/// 执行断言求值
pub fn evaluate_assertion(assertion: &AssertExpr, response: &Response) -> AssertionResult {
    let raw = assertion.to_string();

    match assertion {
        AssertExpr::Compare { left, op, right } => {
            let actual = match extract_value(response, left) {
                Ok(v) => v,
                Err(e) => return AssertionResult::error(raw, e),
            };

            let expected = format!("{} {}", op, right);
            match actual.compare(*op, right) {
                Ok(true) => AssertionResult::success(raw, actual.to_string(), expected),
                Ok(false) => {
                    let message = format!(
                        "Expected {} to be {}, but got {}",
                        left, expected, actual
                    );
                    AssertionResult::failure(raw, actual.to_string(), expected, message)
                }
                Err(e) => AssertionResult::error(raw, e),
            }
        }

        AssertExpr::Exists { path, negated } => {
            let found = extract_value(response, path).ok();
            let expected = if *negated { "not exists" } else { "exists" }.to_string();
            let actual = found
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "not found".to_string());

            if found.is_some() != *negated {
                AssertionResult::success(raw, actual, expected)
            } else {
                let message = format!("Expected {} to {}, but got {}", path, expected, actual);
                AssertionResult::failure(raw, actual, expected, message)
            }
        }
    }
}
