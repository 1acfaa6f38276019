pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod reconcile;
pub mod stream;
pub mod transport;
pub mod turn;

pub use client::{EventStream, FailoverStreamClient, StreamCanceller};
pub use error::{ClientError, ErrorCategory};
pub use protocol::StreamEvent;
pub use reconcile::{MessageAccumulator, MessageUpdate, ReconciliationEngine};
