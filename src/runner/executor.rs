use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::auth::{AuthResolver, ResolvedAuth, apply_auth};
use crate::collection::{Body, CollectionTree, NodeId, RequestDef};
use crate::error::{CollrunError, ExecutionError, Result};
use crate::http::{
    HttpTransport, OutgoingRequest, Response, Transport, TransportConfig, TransportError,
};
use crate::runner::types::ExecutionResult;
use crate::script::{DirectiveSandbox, ScriptInput, ScriptKind, ScriptSandbox, TestOutcome};
use crate::variable::{ExecutionContext, Settings, VariableResolver, VariableScope, VariableWrite};

/// 单请求执行参数
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub timeout: Duration,
    /// 非 2xx 状态码是否算作失败
    pub fail_on_http_error: bool,
    /// 失败的断言是否算作失败
    pub fail_on_assertion: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            fail_on_http_error: false,
            fail_on_assertion: false,
        }
    }
}

impl From<&Settings> for ExecutorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            timeout: settings.timeout(),
            fail_on_http_error: settings.fail_on_http_error,
            fail_on_assertion: settings.fail_on_assertion,
        }
    }
}

/// 一个附加的 Header 或查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionField {
    pub key: String,
    pub value: String,
    /// 为 true 时覆盖请求中已有的值
    pub override_existing: bool,
}

/// 调用方附加到请求上的字段
///
/// 默认只补充缺失、为空或仍含占位符的字段；标记为覆盖的字段总是生效。
/// 值本身也会经过变量解析。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestExtensions {
    pub url: Option<String>,
    pub override_url: bool,
    pub headers: Vec<ExtensionField>,
    pub query: Vec<ExtensionField>,
    pub body: Option<String>,
    pub override_body: bool,
}

impl RequestExtensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supplement_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self.override_url = false;
        self
    }

    pub fn replace_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self.override_url = true;
        self
    }

    pub fn supplement_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(field(key, value, false));
        self
    }

    pub fn replace_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(field(key, value, true));
        self
    }

    pub fn supplement_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push(field(key, value, false));
        self
    }

    pub fn replace_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push(field(key, value, true));
        self
    }

    pub fn supplement_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.override_body = false;
        self
    }

    pub fn replace_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.override_body = true;
        self
    }

    fn apply(&self, context: &ExecutionContext, request: &mut OutgoingRequest) {
        if let Some(url) = &self.url
            && (self.override_url || needs_supplement(Some(request.url.as_str())))
        {
            request.url = context.resolve_variables(url);
        }

        for ext in &self.headers {
            if ext.override_existing || needs_supplement(request.header(&ext.key)) {
                request.set_header(&ext.key, &context.resolve_variables(&ext.value));
            }
        }

        for ext in &self.query {
            if ext.override_existing || needs_supplement(request.query_param(&ext.key)) {
                request.set_query(&ext.key, &context.resolve_variables(&ext.value));
            }
        }

        if let Some(body) = &self.body
            && (self.override_body || needs_supplement(request.body.as_deref()))
        {
            request.body = Some(context.resolve_variables(body));
        }
    }
}

fn field(key: impl Into<String>, value: impl Into<String>, override_existing: bool) -> ExtensionField {
    ExtensionField {
        key: key.into(),
        value: value.into(),
        override_existing,
    }
}

fn needs_supplement(current: Option<&str>) -> bool {
    match current {
        None => true,
        Some(v) => v.trim().is_empty() || VariableResolver::has_placeholders(v),
    }
}

/// 单请求执行过程中逐步积累的状态
#[derive(Debug, Default)]
struct Attempt {
    url: String,
    response: Option<Response>,
    tests: Vec<TestOutcome>,
    writes: Vec<VariableWrite>,
}

/// 解析、认证、发送并评估单个请求
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    sandbox: Arc<dyn ScriptSandbox>,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        sandbox: Arc<dyn ScriptSandbox>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            transport,
            sandbox,
            config,
        }
    }

    /// reqwest 传输 + 指令沙箱
    pub fn with_http(config: ExecutorConfig, transport_config: &TransportConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(HttpTransport::with_config(transport_config)?),
            Arc::new(DirectiveSandbox::new()),
            config,
        ))
    }

    /// 由配置文件的 `[settings]` 构建
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::with_http(
            ExecutorConfig::from(settings),
            &TransportConfig::from(settings),
        )
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// 释放传输层的连接池
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// 执行单个请求
    ///
    /// 流水线中的失败都会变成 `success = false` 的结果；只有传入的节点不是请求时返回 `Err`。
    /// `substitutions` 在本次执行期间作为最高优先级的临时层。
    pub async fn execute_request(
        &self,
        tree: &CollectionTree,
        request: NodeId,
        context: &mut ExecutionContext,
        extensions: Option<&RequestExtensions>,
        substitutions: Option<&HashMap<String, String>>,
    ) -> Result<ExecutionResult> {
        let node = tree.get(request).filter(|n| n.is_request()).ok_or_else(|| {
            CollrunError::InvalidArgument(format!("node {} is not a request", request.index()))
        })?;
        let def = node.request.as_ref().ok_or_else(|| {
            CollrunError::InvalidArgument(format!("{} has no request definition", node.label()))
        })?;

        let started_at = Utc::now();
        let start = Instant::now();

        let saved_overrides = substitutions.map(|subs| {
            let mut merged = context.overrides().clone();
            for (key, value) in subs {
                merged.insert(key.clone(), value.clone());
            }
            context.replace_overrides(merged)
        });
        let layering = context.enter_lineage(tree, request);
        let auth = AuthResolver::effective_auth(tree, request);

        let mut attempt = Attempt {
            url: def.url.clone(),
            ..Default::default()
        };
        let outcome = self
            .run_pipeline(tree, request, def, &auth, context, extensions, &mut attempt)
            .await;

        context.leave_lineage(layering);
        if let Some(saved) = saved_overrides {
            context.replace_overrides(saved);
            // 脚本对 Override 层的写入在临时层撤销后仍然保留
            for write in attempt.writes.iter().filter(|w| w.scope == VariableScope::Override) {
                context.apply_writes(std::slice::from_ref(write));
            }
        }

        let error = outcome.err();
        let success = error.is_none() && self.passes_policy(&attempt);
        let elapsed = start.elapsed();

        match &error {
            Some(e) => warn!(request = %node.name, kind = e.kind(), error = %e, "request failed"),
            None => info!(
                request = %node.name,
                status = ?attempt.response.as_ref().map(|r| r.status.code()),
                success,
                elapsed_ms = elapsed.as_millis() as u64,
                "request finished"
            ),
        }

        Ok(ExecutionResult {
            request,
            name: node.name.clone(),
            path: auth.path.clone(),
            method: def.method,
            url: attempt.url,
            success,
            response: attempt.response,
            error,
            elapsed,
            started_at,
            tests: attempt.tests,
            variable_writes: attempt.writes,
            auth_source: auth.source,
        })
    }

    /// 同步调用约定：在临时的单线程运行时上执行同一条流水线
    ///
    /// 在 tokio 运行时内部调用返回 `InvalidArgument`，应改用 `execute_request`。
    pub fn execute_request_blocking(
        &self,
        tree: &CollectionTree,
        request: NodeId,
        context: &mut ExecutionContext,
        extensions: Option<&RequestExtensions>,
        substitutions: Option<&HashMap<String, String>>,
    ) -> Result<ExecutionResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(CollrunError::InvalidArgument(
                "execute_request_blocking called inside an async runtime; use execute_request"
                    .to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.execute_request(tree, request, context, extensions, substitutions))
    }

    fn passes_policy(&self, attempt: &Attempt) -> bool {
        let http_ok = !self.config.fail_on_http_error
            || attempt.response.as_ref().is_some_and(Response::is_success);
        let tests_ok = !self.config.fail_on_assertion || attempt.tests.iter().all(|t| t.passed);
        http_ok && tests_ok
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        tree: &CollectionTree,
        request: NodeId,
        def: &RequestDef,
        auth: &ResolvedAuth,
        context: &mut ExecutionContext,
        extensions: Option<&RequestExtensions>,
        attempt: &mut Attempt,
    ) -> std::result::Result<(), ExecutionError> {
        let lineage = script_lineage(tree, request);
        let name = tree.node(request).name.clone();

        self.run_scripts(ScriptKind::PreRequest, tree, &lineage, &name, def, context, None, attempt)
            .await?;

        let mut outgoing = build_outgoing(def, context);
        if let Some(ext) = extensions {
            ext.apply(context, &mut outgoing);
        }
        attempt.url = outgoing.url.clone();
        check_resolved(&outgoing)?;
        outgoing.full_url().map_err(|e| {
            ExecutionError::request(format!("invalid URL '{}': {}", outgoing.url, e))
        })?;

        if let Some(auth_def) = &auth.auth {
            apply_auth(auth_def, context, &mut outgoing)?;
        }

        let response = self.send(outgoing.clone()).await?;
        attempt.response = Some(response);

        self.run_scripts(
            ScriptKind::Test,
            tree,
            &lineage,
            &name,
            def,
            context,
            Some(outgoing),
            attempt,
        )
        .await
    }

    /// 按集合 → 文件夹（外 → 内）→ 请求的顺序运行脚本，每个脚本的写入立即生效
    #[allow(clippy::too_many_arguments)]
    async fn run_scripts(
        &self,
        kind: ScriptKind,
        tree: &CollectionTree,
        lineage: &[NodeId],
        name: &str,
        def: &RequestDef,
        context: &mut ExecutionContext,
        sent: Option<OutgoingRequest>,
        attempt: &mut Attempt,
    ) -> std::result::Result<(), ExecutionError> {
        for id in lineage {
            let node = tree.node(*id);
            let source = match kind {
                ScriptKind::PreRequest => node.scripts.pre_request.as_deref(),
                ScriptKind::Test => node.scripts.test.as_deref(),
            };
            let Some(source) = source.filter(|s| !s.trim().is_empty()) else {
                continue;
            };

            let input = ScriptInput {
                kind,
                name: name.to_string(),
                origin: node.label(),
                variables: context.snapshot(),
                template: def.clone(),
                request: sent.clone(),
                response: attempt.response.clone(),
            };
            debug!(origin = %input.origin, kind = %kind, "running script");

            let outcome = self
                .sandbox
                .run(kind, source, &input)
                .await
                .map_err(|e| ExecutionError::script(kind, format!("{}: {}", input.origin, e)))?;

            context.apply_writes(&outcome.writes);
            attempt.writes.extend(outcome.writes);
            attempt.tests.extend(outcome.assertions);
        }
        Ok(())
    }

    async fn send(&self, request: OutgoingRequest) -> std::result::Result<Response, ExecutionError> {
        let timeout = self.config.timeout;
        let url = request.url.clone();

        match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(TransportError::Timeout(limit))) => Err(ExecutionError::Timeout {
                url,
                timeout: limit,
            }),
            Ok(Err(e)) => Err(ExecutionError::request(e.to_string())),
            Err(_) => Err(ExecutionError::Timeout { url, timeout }),
        }
    }
}

/// 请求节点的脚本来源：集合、文件夹（外 → 内）、请求自身
fn script_lineage(tree: &CollectionTree, request: NodeId) -> Vec<NodeId> {
    tree.collection_of(request)
        .into_iter()
        .chain(tree.folder_chain(request).into_iter().rev())
        .chain(std::iter::once(request))
        .collect()
}

/// 用上下文解析请求模板
fn build_outgoing(def: &RequestDef, context: &ExecutionContext) -> OutgoingRequest {
    let resolve = |s: &str| context.resolve_variables(s);

    let bindings: HashMap<&str, String> = def
        .path_variables
        .iter()
        .filter(|p| !p.disabled)
        .map(|p| (p.key.as_str(), resolve(&p.value)))
        .collect();
    let url = VariableResolver::substitute_path_params(&resolve(&def.url), |name| {
        bindings.get(name).cloned()
    });

    let mut outgoing = OutgoingRequest::new(def.method, url);
    for header in def.headers.iter().filter(|h| !h.disabled) {
        outgoing
            .headers
            .push((resolve(&header.key), resolve(&header.value)));
    }
    for param in def.query.iter().filter(|q| !q.disabled) {
        outgoing.query.push((resolve(&param.key), resolve(&param.value)));
    }

    match &def.body {
        Some(Body::Raw {
            content,
            content_type,
        }) => {
            outgoing.body = Some(resolve(content));
            if let Some(content_type) = content_type
                && !outgoing.has_header("Content-Type")
            {
                outgoing.set_header("Content-Type", content_type);
            }
        }
        Some(Body::UrlEncoded { fields }) => {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(
                    fields
                        .iter()
                        .filter(|f| !f.disabled)
                        .map(|f| (resolve(&f.key), resolve(&f.value))),
                )
                .finish();
            outgoing.body = Some(encoded);
            if !outgoing.has_header("Content-Type") {
                outgoing.set_header("Content-Type", "application/x-www-form-urlencoded");
            }
        }
        None => {}
    }

    for (key, value) in &outgoing.headers {
        for name in VariableResolver::unresolved(value) {
            warn!(header = %key, variable = %name, "unresolved variable sent verbatim");
        }
    }
    if let Some(body) = &outgoing.body {
        for name in VariableResolver::unresolved(body) {
            warn!(variable = %name, "unresolved variable in body sent verbatim");
        }
    }

    outgoing
}

/// URL 与查询参数中不允许残留占位符
fn check_resolved(request: &OutgoingRequest) -> std::result::Result<(), ExecutionError> {
    if let Some(name) = VariableResolver::unresolved(&request.url).into_iter().next() {
        return Err(ExecutionError::variable_resolution(
            name,
            "url",
            "not defined in any scope or part of a reference cycle",
        ));
    }
    for (key, value) in &request.query {
        if let Some(name) = VariableResolver::unresolved(value).into_iter().next() {
            return Err(ExecutionError::variable_resolution(
                name,
                format!("query '{}'", key),
                "not defined in any scope or part of a reference cycle",
            ));
        }
    }
    Ok(())
}
