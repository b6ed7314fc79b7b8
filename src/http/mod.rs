pub mod client;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types for convenient access
pub use client::{HttpTransport, Transport, TransportConfig, TransportError};
pub use request::{Credential, OutgoingRequest};
pub use response::Response;
pub use types::{Method, Status, build_url};
