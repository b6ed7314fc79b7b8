pub mod executor;
pub mod orchestrator;
pub mod types;

pub use executor::{ExecutorConfig, ExtensionField, RequestExecutor, RequestExtensions};
pub use orchestrator::{CancellationSignal, CollectionRunner, RunOptions};
pub use types::{CollectionExecutionResult, ExecutionResult, FolderExecutionResult, RunStats};
