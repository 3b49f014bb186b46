use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codegenius_core::error::Result;
use codegenius_core::{
    ChunkStream, EndpointCall, EndpointReply, GenerationParams, GenerationRequest, GeniusError,
    ModelEndpoint, SchedulerConfig,
};
use codegenius_scheduler::InferenceScheduler;

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        batch_token_budget: 100_000,
        flush_interval_ms: 20,
        dispatch_workers: 2,
        max_retries: 3,
        backoff_base_ms: 1,
        request_timeout_secs: 5,
        queue_capacity: 64,
    }
}

fn request(prompt: &str) -> GenerationRequest {
    let params = GenerationParams {
        max_tokens: 64,
        ..GenerationParams::default()
    };
    GenerationRequest::snippet(prompt, &params)
}

/// Deterministic endpoint echoing the prompt; prompts containing "hang" never
/// complete.
struct EchoEndpoint {
    calls: AtomicU32,
}

impl EchoEndpoint {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ModelEndpoint for EchoEndpoint {
    async fn invoke(&self, call: EndpointCall) -> Result<EndpointReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if call.prompt.contains("hang") {
            std::future::pending::<()>().await;
        }
        Ok(EndpointReply {
            text: format!("echo: {}", call.prompt),
            prompt_tokens: None,
            completion_tokens: Some(7),
        })
    }

    fn context_window(&self) -> usize {
        4096
    }
}

/// Fails the first `failures` invocations with a transient fault.
struct FlakyEndpoint {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl ModelEndpoint for FlakyEndpoint {
    async fn invoke(&self, call: EndpointCall) -> Result<EndpointReply> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(GeniusError::EndpointUnavailable("loading weights".into()));
        }
        Ok(EndpointReply {
            text: format!("ok: {}", call.prompt),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    fn context_window(&self) -> usize {
        4096
    }
}

/// Always fails with a non-transient fault.
struct BrokenEndpoint {
    calls: AtomicU32,
}

#[async_trait]
impl ModelEndpoint for BrokenEndpoint {
    async fn invoke(&self, _call: EndpointCall) -> Result<EndpointReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GeniusError::Io("malformed request".into()))
    }

    fn context_window(&self) -> usize {
        4096
    }
}

/// Batch-capable endpoint recording the size of every batch it receives.
struct BatchRecorderEndpoint {
    batch_sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl ModelEndpoint for BatchRecorderEndpoint {
    async fn invoke(&self, call: EndpointCall) -> Result<EndpointReply> {
        self.batch_sizes.lock().push(1);
        Ok(EndpointReply {
            text: format!("one: {}", call.prompt),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    async fn invoke_batch(&self, calls: Vec<EndpointCall>) -> Vec<Result<EndpointReply>> {
        self.batch_sizes.lock().push(calls.len());
        calls
            .into_iter()
            .map(|call| {
                Ok(EndpointReply {
                    text: format!("batched: {}", call.prompt),
                    prompt_tokens: None,
                    completion_tokens: None,
                })
            })
            .collect()
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn context_window(&self) -> usize {
        4096
    }
}

/// Streams a reply in fixed chunks.
struct ChunkingEndpoint;

#[async_trait]
impl ModelEndpoint for ChunkingEndpoint {
    async fn invoke(&self, call: EndpointCall) -> Result<EndpointReply> {
        Ok(EndpointReply {
            text: format!("whole: {}", call.prompt),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    async fn invoke_stream(&self, _call: EndpointCall) -> Result<ChunkStream> {
        let chunks: Vec<Result<String>> =
            vec![Ok("fn main".into()), Ok("() {".into()), Ok("}".into())];
        Ok(futures::stream::iter(chunks).boxed())
    }

    fn context_window(&self) -> usize {
        4096
    }
}

#[tokio::test]
async fn submit_returns_generated_text() {
    let scheduler = InferenceScheduler::new(EchoEndpoint::new(), fast_config());
    let generated = scheduler.submit(request("hello")).await.unwrap();
    assert_eq!(generated.text, "echo: hello");
    assert_eq!(generated.completion_tokens, 7);
}

#[tokio::test]
async fn every_request_receives_exactly_one_terminal_result() {
    let scheduler = InferenceScheduler::new(EchoEndpoint::new(), fast_config());
    let mut handles = Vec::new();
    for i in 0..20 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move {
            scheduler.submit(request(&format!("req-{}", i))).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let generated = handle.await.unwrap().unwrap();
        assert_eq!(generated.text, format!("echo: req-{}", i));
    }
}

#[tokio::test]
async fn transient_faults_are_retried_with_backoff() {
    let endpoint = Arc::new(FlakyEndpoint {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let scheduler = InferenceScheduler::new(Arc::clone(&endpoint) as _, fast_config());
    let generated = scheduler.submit(request("retry me")).await.unwrap();
    assert_eq!(generated.text, "ok: retry me");
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transient_faults_exhaust_the_retry_budget() {
    let endpoint = Arc::new(FlakyEndpoint {
        failures: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let scheduler = InferenceScheduler::new(Arc::clone(&endpoint) as _, fast_config());
    let err = scheduler.submit(request("doomed")).await.unwrap_err();
    assert!(matches!(err, GeniusError::EndpointUnavailable(_)));
    // initial attempt plus max_retries
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn non_transient_faults_are_never_retried() {
    let endpoint = Arc::new(BrokenEndpoint {
        calls: AtomicU32::new(0),
    });
    let scheduler = InferenceScheduler::new(Arc::clone(&endpoint) as _, fast_config());
    let err = scheduler.submit(request("bad")).await.unwrap_err();
    assert!(matches!(err, GeniusError::Io(_)));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oversized_prompt_fails_before_dispatch() {
    let scheduler = InferenceScheduler::new(EchoEndpoint::new(), fast_config());
    let params = GenerationParams {
        max_tokens: 4096,
        ..GenerationParams::default()
    };
    let huge = GenerationRequest::snippet("x".repeat(20_000), &params);
    let err = scheduler.submit(huge).await.unwrap_err();
    assert!(matches!(err, GeniusError::ContextLengthExceeded { .. }));
}

#[tokio::test]
async fn timeout_does_not_block_unrelated_submissions() {
    let endpoint = EchoEndpoint::new();
    let mut config = fast_config();
    config.request_timeout_secs = 1;
    let scheduler = InferenceScheduler::new(endpoint, config);

    let hanging = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.submit(request("please hang")).await })
    };
    // let the hanging request flush into its own batch first
    tokio::time::sleep(Duration::from_millis(60)).await;

    let generated = scheduler.submit(request("still alive")).await.unwrap();
    assert_eq!(generated.text, "echo: still alive");

    let err = hanging.await.unwrap().unwrap_err();
    assert!(matches!(err, GeniusError::RequestTimeout(_)));
}

#[tokio::test]
async fn queued_request_can_be_cancelled_before_dispatch() {
    let endpoint = EchoEndpoint::new();
    let mut config = fast_config();
    config.flush_interval_ms = 300;
    let scheduler = InferenceScheduler::new(endpoint, config);

    let req = request("cancel me");
    let id = req.id;
    let waiting = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.submit(req).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.cancel(id);

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, GeniusError::Cancelled));
}

#[tokio::test]
async fn concurrent_requests_share_a_batch() {
    let endpoint = Arc::new(BatchRecorderEndpoint {
        batch_sizes: Mutex::new(Vec::new()),
    });
    let mut config = fast_config();
    config.flush_interval_ms = 100;
    let scheduler = InferenceScheduler::new(Arc::clone(&endpoint) as _, config);

    let mut handles = Vec::new();
    for i in 0..3 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move {
            scheduler.submit(request(&format!("batched-{}", i))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let sizes = endpoint.batch_sizes.lock().clone();
    assert_eq!(sizes.iter().sum::<usize>(), 3);
    assert!(
        sizes.iter().any(|&s| s >= 2),
        "expected at least one multi-request batch, got {:?}",
        sizes
    );
}

#[tokio::test]
async fn streaming_yields_chunks_then_ends() {
    let scheduler = InferenceScheduler::new(Arc::new(ChunkingEndpoint), fast_config());
    let mut stream = scheduler
        .submit_streaming(request("stream it"))
        .await
        .unwrap();

    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap());
    }
    assert_eq!(text, "fn main() {}");
}
