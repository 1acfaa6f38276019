pub mod candidates;
mod http_transport;
mod retry_policy;

pub use candidates::{ordered_candidates, BackendCandidate, CHAT_PATH, IMAGE_GENERATION_PATH};
pub use http_transport::HttpTransport;
pub use retry_policy::RetryPolicy;
