pub mod config;
pub mod context;
pub mod resolver;
pub mod tracer;
pub mod types;

pub use config::{ConfigLoader, Environment, RunConfig, Settings};
pub use context::{ExecutionContext, Layering};
pub use resolver::VariableResolver;
pub use tracer::{VariableReference, VariableTracer};
pub use types::{ScopeSnapshot, ScopeStore, VariableScope, VariableSnapshot, VariableWrite};
