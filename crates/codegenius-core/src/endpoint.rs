use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;

use crate::error::Result;

/// One call handed to the model endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointCall {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

/// Complete (non-streaming) endpoint reply.
#[derive(Debug, Clone)]
pub struct EndpointReply {
    pub text: String,
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
}

/// Finite, non-restartable sequence of text chunks. Stream termination is the
/// end-of-stream signal; dropping the stream is the cancellation signal.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability interface over the model. Injected into the scheduler so test
/// doubles can stand in for a live model server.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Run one prompt to completion.
    async fn invoke(&self, call: EndpointCall) -> Result<EndpointReply>;

    /// Run one prompt, yielding incremental chunks. The default wraps
    /// `invoke` in a single-chunk stream for endpoints without native
    /// streaming.
    async fn invoke_stream(&self, call: EndpointCall) -> Result<ChunkStream> {
        let reply = self.invoke(call).await?;
        Ok(stream::iter(vec![Ok(reply.text)]).boxed())
    }

    /// Dispatch a whole batch in one call. The default runs sequentially for
    /// endpoints without batched input.
    async fn invoke_batch(&self, calls: Vec<EndpointCall>) -> Vec<Result<EndpointReply>> {
        let mut replies = Vec::with_capacity(calls.len());
        for call in calls {
            replies.push(self.invoke(call).await);
        }
        replies
    }

    fn supports_batch(&self) -> bool {
        false
    }

    /// Declared context window in tokens.
    fn context_window(&self) -> usize;

    async fn is_available(&self) -> bool {
        true
    }
}
