pub mod chat_completions;
pub mod sse;

pub use chat_completions::ChatCompletionsClient;
pub use sse::{SseDecoder, SseEvent};
