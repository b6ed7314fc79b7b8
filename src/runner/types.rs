use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthSource;
use crate::collection::NodeId;
use crate::error::ExecutionError;
use crate::http::{Method, Response};
use crate::script::TestOutcome;
use crate::variable::{VariableSnapshot, VariableWrite};

/// 单个请求的执行结果，生成后不再修改
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub request: NodeId,
    pub name: String,
    /// 从根到叶的节点名称
    pub path: Vec<String>,
    pub method: Method,
    /// 解析后的 URL；解析失败时为模板原文
    pub url: String,
    pub success: bool,
    pub response: Option<Response>,
    pub error: Option<ExecutionError>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    /// 测试脚本产生的命名断言
    pub tests: Vec<TestOutcome>,
    /// 本次执行中脚本请求的变量写入，按应用顺序
    pub variable_writes: Vec<VariableWrite>,
    pub auth_source: AuthSource,
}

impl ExecutionResult {
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status.code())
    }

    pub fn tests_passed(&self) -> bool {
        self.tests.iter().all(|t| t.passed)
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestOutcome> {
        self.tests.iter().filter(|t| !t.passed)
    }
}

/// 汇总计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// 实际尝试执行的请求数
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// 已计划但因 stop_on_error 或取消而未执行的请求数
    pub skipped: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RunStats {
    pub fn from_results(results: &[ExecutionResult], skipped: usize, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            skipped,
            elapsed,
        }
    }

    /// 成功率（0.0 - 1.0），没有执行任何请求时为 0
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    pub fn all_successful(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// 文件夹执行结果
#[derive(Debug, Clone, Serialize)]
pub struct FolderExecutionResult {
    pub folder: NodeId,
    pub name: String,
    pub stats: RunStats,
    /// 按声明顺序排列
    pub results: Vec<ExecutionResult>,
    /// 未执行的请求名称
    pub skipped_requests: Vec<String>,
}

impl FolderExecutionResult {
    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }
}

/// 集合执行结果
#[derive(Debug, Clone, Serialize)]
pub struct CollectionExecutionResult {
    pub run_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub stats: RunStats,
    /// 按声明顺序排列
    pub results: Vec<ExecutionResult>,
    pub skipped_requests: Vec<String>,
    /// 运行结束时的变量，可用于下一次运行
    pub final_variables: VariableSnapshot,
}

impl CollectionExecutionResult {
    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool, elapsed_ms: u64) -> ExecutionResult {
        ExecutionResult {
            request: crate::collection::CollectionTree::new("c").root(),
            name: "r".to_string(),
            path: vec!["c".to_string(), "r".to_string()],
            method: Method::Get,
            url: "http://example.com".to_string(),
            success,
            response: None,
            error: (!success).then(|| ExecutionError::request("connection refused")),
            elapsed: Duration::from_millis(elapsed_ms),
            started_at: Utc::now(),
            tests: Vec::new(),
            variable_writes: Vec::new(),
            auth_source: AuthSource::None,
        }
    }

    #[test]
    fn test_stats_aggregation() {
        let results = vec![result(true, 100), result(false, 200), result(true, 50)];
        let stats = RunStats::from_results(&results, 2, Duration::from_millis(400));

        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 2);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!(!stats.all_successful());
    }

    #[test]
    fn test_success_rate_empty_is_zero() {
        let stats = RunStats::from_results(&[], 0, Duration::ZERO);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_result_serializes_error_kind() {
        let json = serde_json::to_value(result(false, 10)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["elapsed_ms"], 10);
        assert_eq!(json["error"]["kind"], "RequestExecution");
        assert_eq!(json["auth_source"], "none");
        assert_eq!(json["method"], "GET");
    }
}
