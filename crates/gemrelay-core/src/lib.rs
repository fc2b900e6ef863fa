pub mod auth;
pub mod error;
pub mod orchestrator;
pub mod stream;
pub mod upstream;

pub use error::ProxyError;
pub use orchestrator::{MAX_RETRIES, Orchestrator, Reply};
pub use upstream::{GenerativeClient, WreqGenerativeClient};
