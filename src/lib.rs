pub mod assertion;
pub mod auth;
pub mod collection;
pub mod error;
pub mod http;
pub mod logger;
pub mod runner;
pub mod script;
pub mod variable;

// Re-export commonly used types
pub use error::{CollrunError, ExecutionError, Result};
