pub mod apply;
pub mod resolver;

pub use apply::{AuthInjection, apply_auth, build_injection};
pub use resolver::{AuthResolver, AuthSource, ResolvedAuth};
