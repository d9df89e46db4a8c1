use crate::GenerationError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Answer text as it arrives. An `Err` item ends the stream.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Opens a streamed completion for `prompt`. Failures before the first
    /// byte are returned here; later failures arrive as the final item.
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;
}
