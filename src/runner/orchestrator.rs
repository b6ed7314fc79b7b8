use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collection::{CollectionTree, NodeId};
use crate::error::{CollrunError, Result};
use crate::runner::executor::RequestExecutor;
use crate::runner::types::{
    CollectionExecutionResult, ExecutionResult, FolderExecutionResult, RunStats,
};
use crate::variable::{
    ExecutionContext, ScopeStore, Settings, VariableScope, VariableSnapshot, VariableWrite,
};

/// 运行中可随时触发的取消信号，克隆后共享同一状态
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 等待取消；已取消时立即返回
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// 文件夹/集合运行参数
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub parallel: bool,
    pub stop_on_error: bool,
    /// 顺序模式下相邻请求之间的间隔
    pub delay: Duration,
    pub max_concurrency: usize,
    pub cancel: Option<CancellationSignal>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            stop_on_error: false,
            delay: Duration::ZERO,
            max_concurrency: 8,
            cancel: None,
        }
    }
}

impl From<&Settings> for RunOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            parallel: settings.parallel,
            stop_on_error: settings.stop_on_error,
            delay: settings.delay(),
            max_concurrency: settings.max_concurrency,
            cancel: None,
        }
    }
}

impl RunOptions {
    pub fn with_cancel(mut self, signal: CancellationSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationSignal::is_cancelled)
    }
}

/// 一次批量运行的产出
struct Batch {
    results: Vec<ExecutionResult>,
    skipped: Vec<String>,
    /// 撤销运行层之前的变量快照
    final_variables: VariableSnapshot,
}

/// 按声明顺序运行文件夹或整个集合
pub struct CollectionRunner {
    executor: Arc<RequestExecutor>,
}

impl CollectionRunner {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// 运行文件夹下的全部请求（含子文件夹）
    pub async fn execute_folder(
        &self,
        tree: &CollectionTree,
        folder: NodeId,
        context: &mut ExecutionContext,
        options: &RunOptions,
    ) -> Result<FolderExecutionResult> {
        let node = tree.get(folder).filter(|n| n.is_folder()).ok_or_else(|| {
            CollrunError::InvalidArgument(format!("node {} is not a folder", folder.index()))
        })?;

        info!(folder = %node.name, parallel = options.parallel, "running folder");
        let start = Instant::now();
        let batch = self.run(tree, folder, context, options).await;
        let stats = RunStats::from_results(&batch.results, batch.skipped.len(), start.elapsed());
        log_stats(&node.name, &stats);

        Ok(FolderExecutionResult {
            folder,
            name: node.name.clone(),
            stats,
            results: batch.results,
            skipped_requests: batch.skipped,
        })
    }

    /// 运行整个集合
    pub async fn execute_collection(
        &self,
        tree: &CollectionTree,
        context: &mut ExecutionContext,
        options: &RunOptions,
    ) -> Result<CollectionExecutionResult> {
        let root = tree.root();
        let name = tree.node(root).name.clone();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(collection = %name, %run_id, parallel = options.parallel, "running collection");
        let start = Instant::now();

        let batch = self.run(tree, root, context, options).await;

        let stats = RunStats::from_results(&batch.results, batch.skipped.len(), start.elapsed());
        log_stats(&name, &stats);

        Ok(CollectionExecutionResult {
            run_id,
            name,
            started_at,
            stats,
            results: batch.results,
            skipped_requests: batch.skipped,
            final_variables: batch.final_variables,
        })
    }

    async fn run(
        &self,
        tree: &CollectionTree,
        start: NodeId,
        context: &mut ExecutionContext,
        options: &RunOptions,
    ) -> Batch {
        let planned: Vec<NodeId> = tree
            .walk(start)
            .into_iter()
            .filter(|id| tree.node(*id).is_request())
            .collect();
        debug!(planned = planned.len(), "execution plan built");

        let layering = context.enter_lineage(tree, start);
        let mut batch = if options.parallel {
            self.run_parallel(tree, &planned, context, options).await
        } else {
            self.run_sequential(tree, start, &planned, context, options).await
        };
        batch.final_variables = context.snapshot();
        context.leave_lineage(layering);
        batch
    }

    /// 单一上下文顺序执行；写入对后续请求立即可见
    async fn run_sequential(
        &self,
        tree: &CollectionTree,
        start: NodeId,
        planned: &[NodeId],
        context: &mut ExecutionContext,
        options: &RunOptions,
    ) -> Batch {
        let base_folders = if tree.node(start).is_folder() {
            tree.folder_chain_from(Some(start))
        } else {
            Vec::new()
        };
        // 当前由运行器压入的文件夹层，外 → 内
        let mut stack: Vec<NodeId> = Vec::new();
        let mut batch = Batch {
            results: Vec::with_capacity(planned.len()),
            skipped: Vec::new(),
            final_variables: VariableSnapshot::default(),
        };

        for (index, &request) in planned.iter().enumerate() {
            if index > 0 && !options.delay.is_zero() {
                pause(options).await;
            }
            if options.is_cancelled() {
                warn!(remaining = planned.len() - index, "run cancelled");
                batch.skipped.extend(names(tree, &planned[index..]));
                break;
            }

            let desired: Vec<NodeId> = tree
                .folder_chain(request)
                .into_iter()
                .rev()
                .filter(|f| !base_folders.contains(f))
                .collect();
            let common = stack
                .iter()
                .zip(&desired)
                .take_while(|(a, b)| a == b)
                .count();
            while stack.len() > common {
                stack.pop();
                context.pop_folder();
            }
            for folder in &desired[common..] {
                context.push_folder(ScopeStore::from_node(*folder, tree.node(*folder)));
                stack.push(*folder);
            }

            let result = match self
                .executor
                .execute_request(tree, request, context, None, None)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!(request = %tree.node(request).name, error = %e, "request skipped");
                    batch.skipped.push(tree.node(request).name.clone());
                    continue;
                }
            };
            let failed = !result.success;
            batch.results.push(result);

            if failed && options.stop_on_error {
                info!(
                    request = %tree.node(request).name,
                    remaining = planned.len() - index - 1,
                    "stopping on first failure"
                );
                batch.skipped.extend(names(tree, &planned[index + 1..]));
                break;
            }
        }

        for _ in stack.drain(..) {
            context.pop_folder();
        }
        batch
    }

    /// 有界并发执行
    ///
    /// 每个请求从共享基础上下文（Override/集合/环境/全局）克隆一份，
    /// 结束后只把这些层上的写入发布回去；文件夹与请求层的写入留在本分支。
    async fn run_parallel(
        &self,
        tree: &CollectionTree,
        planned: &[NodeId],
        context: &mut ExecutionContext,
        options: &RunOptions,
    ) -> Batch {
        if !options.delay.is_zero() {
            debug!("delay is ignored in parallel mode");
        }
        let shared = Mutex::new(context.shared());
        let halted = AtomicBool::new(false);
        let executor = self.executor.as_ref();
        let concurrency = options.max_concurrency.max(1);

        let mut outcomes: Vec<(usize, Option<ExecutionResult>)> =
            stream::iter(planned.iter().copied().enumerate())
                .map(|(index, request)| {
                    let shared = &shared;
                    let halted = &halted;
                    async move {
                        if halted.load(Ordering::SeqCst) || options.is_cancelled() {
                            return (index, None);
                        }
                        let mut local = shared.lock().await.shared();
                        let result = match executor
                            .execute_request(tree, request, &mut local, None, None)
                            .await
                        {
                            Ok(result) => result,
                            Err(e) => {
                                warn!(request = %tree.node(request).name, error = %e, "request skipped");
                                return (index, None);
                            }
                        };

                        let published: Vec<VariableWrite> = result
                            .variable_writes
                            .iter()
                            .filter(|w| is_shared_scope(w.scope))
                            .cloned()
                            .collect();
                        if !published.is_empty() {
                            shared.lock().await.apply_writes(&published);
                        }
                        if !result.success && options.stop_on_error {
                            halted.store(true, Ordering::SeqCst);
                        }
                        (index, Some(result))
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        outcomes.sort_by_key(|(index, _)| *index);
        let mut batch = Batch {
            results: Vec::with_capacity(planned.len()),
            skipped: Vec::new(),
            final_variables: VariableSnapshot::default(),
        };
        for (index, outcome) in outcomes {
            match outcome {
                Some(result) => batch.results.push(result),
                None => batch.skipped.push(tree.node(planned[index]).name.clone()),
            }
        }

        // 共享层的最终状态写回调用方上下文
        let merged = shared.into_inner();
        context.replace_overrides(merged.overrides().clone());
        for scope in [
            VariableScope::Collection,
            VariableScope::Environment,
            VariableScope::Global,
        ] {
            sync_scope(context, &merged, scope);
        }
        batch
    }
}

fn is_shared_scope(scope: VariableScope) -> bool {
    matches!(
        scope,
        VariableScope::Override
            | VariableScope::Collection
            | VariableScope::Environment
            | VariableScope::Global
    )
}

fn sync_scope(context: &mut ExecutionContext, source: &ExecutionContext, scope: VariableScope) {
    let Some(store) = source.store(scope) else {
        return;
    };
    let stale: Vec<String> = context
        .store(scope)
        .map(|s| s.keys().filter(|k| !store.contains(k)).map(String::from).collect())
        .unwrap_or_default();
    for key in stale {
        context.unset_variable(&key, scope);
    }
    for (key, value) in store.to_map() {
        context.set_variable(&key, &value, scope);
    }
}

/// 顺序模式的间隔，取消时提前结束
async fn pause(options: &RunOptions) {
    match &options.cancel {
        Some(signal) => {
            tokio::select! {
                _ = tokio::time::sleep(options.delay) => {}
                _ = signal.cancelled() => {}
            }
        }
        None => tokio::time::sleep(options.delay).await,
    }
}

fn names(tree: &CollectionTree, ids: &[NodeId]) -> Vec<String> {
    ids.iter().map(|id| tree.node(*id).name.clone()).collect()
}

fn log_stats(name: &str, stats: &RunStats) {
    info!(
        run = %name,
        total = stats.total,
        successful = stats.successful,
        failed = stats.failed,
        skipped = stats.skipped,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "run finished"
    );
}
