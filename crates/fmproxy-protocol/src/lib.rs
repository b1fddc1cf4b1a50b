//! Wire types for the OpenAI-compatible client-facing surface, plus the
//! dialect-agnostic shapes the core pipeline passes between layers. Mirrors
//! the role `gproxy-protocol` plays in the teacher workspace: plain
//! serde-only types, no HTTP client or transport dependency.

pub mod error;
pub mod message;
pub mod openai;
pub mod sse;
pub mod unified;

pub use error::{ErrorBody, ErrorDetail, ErrorKind};
pub use message::{ContentPart, ImageUrl, Message, MessageContent, Role};
pub use openai::{
    ChatCompletion, ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkChoice,
    ChatRequest, ChunkDelta, Model as ModelListing, ModelsList, Usage,
};
pub use unified::UnifiedResponse;
