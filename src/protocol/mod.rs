pub mod codec;
pub mod event;
pub mod request;

pub use codec::{decode, decode_chunk};
pub use event::{StreamEvent, ToolCall, WebSearchResult};
pub use request::{Attachment, ChatMessage, ChatRequest, Role};
