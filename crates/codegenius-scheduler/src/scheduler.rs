use dashmap::DashMap;
use futures::StreamExt;
use metrics::{counter, histogram};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use codegenius_core::error::Result;
use codegenius_core::{
    estimate_tokens, ChunkStream, EndpointCall, Generated, GenerationRequest, GenerationResult,
    GeniusError, ModelEndpoint, RequestId, SchedulerConfig,
};

use crate::batch::{BatchBuilder, Delivery, PendingRequest};

/// Process-wide batched inference scheduler.
///
/// One logical FIFO queue shared by every caller. A batcher task groups
/// pending requests under the batch token budget, flushing early once the
/// oldest request has waited the flush interval, and hands batches to a
/// bounded pool of dispatch workers. Transient endpoint faults are retried
/// here with exponential backoff and never reach callers unless retries are
/// exhausted.
pub struct InferenceScheduler {
    queue_tx: mpsc::Sender<PendingRequest>,
    cancelled: Arc<DashMap<RequestId, Instant>>,
    endpoint: Arc<dyn ModelEndpoint>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    seq: AtomicU64,
}

impl InferenceScheduler {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, config: SchedulerConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let cancelled = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let scheduler = Arc::new(Self {
            queue_tx,
            cancelled: Arc::clone(&cancelled),
            endpoint: Arc::clone(&endpoint),
            config: config.clone(),
            shutdown: shutdown.clone(),
            seq: AtomicU64::new(0),
        });

        tokio::spawn(run_batcher(queue_rx, endpoint, config, cancelled, shutdown));
        scheduler
    }

    /// Submit a request and wait for its complete terminal result. Suspends
    /// only the calling task; other callers keep enqueuing freely. Fails with
    /// `RequestTimeout` once the configured wait bound elapses.
    pub async fn submit(&self, request: GenerationRequest) -> GenerationResult {
        self.check_context(&request)?;
        let id = request.id;
        let wait = self.config.request_timeout();
        let (tx, rx) = oneshot::channel();
        self.enqueue(request, Delivery::Complete(tx)).await?;

        match timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            // responder dropped without a result: the request was discarded
            Ok(Err(_)) => Err(GeniusError::Cancelled),
            Err(_) => {
                self.cancelled.insert(id, Instant::now());
                counter!("scheduler_requests_timed_out").increment(1);
                Err(GeniusError::RequestTimeout(wait))
            }
        }
    }

    /// Submit a request and consume its output incrementally. The returned
    /// stream is finite and non-restartable; dropping it before the end
    /// signals cancellation, which also abandons any pending backoff retries.
    pub async fn submit_streaming(&self, request: GenerationRequest) -> Result<ChunkStream> {
        self.check_context(&request)?;
        let (tx, rx) = mpsc::channel(32);
        self.enqueue(request, Delivery::Stream(tx)).await?;
        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Cancel a still-queued request by correlation id. A request already
    /// dispatched to the endpoint runs to completion.
    pub fn cancel(&self, id: RequestId) {
        self.cancelled.insert(id, Instant::now());
        counter!("scheduler_requests_cancelled").increment(1);
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn enqueue(&self, request: GenerationRequest, delivery: Delivery) -> Result<()> {
        let pending = PendingRequest {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            request,
            delivery,
            enqueued_at: Instant::now(),
        };
        self.queue_tx
            .send(pending)
            .await
            .map_err(|_| GeniusError::EndpointUnavailable("scheduler stopped".into()))?;
        counter!("scheduler_requests_enqueued").increment(1);
        Ok(())
    }

    /// Reject prompts the model cannot fit before they consume queue or
    /// endpoint capacity. Shrinking the prompt is the caller's move.
    fn check_context(&self, request: &GenerationRequest) -> Result<()> {
        let prompt_tokens = estimate_tokens(&request.prompt);
        let window = self.endpoint.context_window();
        if prompt_tokens + request.max_tokens > window {
            return Err(GeniusError::ContextLengthExceeded {
                prompt_tokens,
                max_tokens: request.max_tokens,
                context_window: window,
            });
        }
        Ok(())
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_batcher(
    mut queue_rx: mpsc::Receiver<PendingRequest>,
    endpoint: Arc<dyn ModelEndpoint>,
    config: SchedulerConfig,
    cancelled: Arc<DashMap<RequestId, Instant>>,
    shutdown: CancellationToken,
) {
    let limiter = Arc::new(Semaphore::new(config.dispatch_workers));
    let mut carry: Option<PendingRequest> = None;
    let mut queue_closed = false;
    // an id cancelled after its request left the queue can never be matched
    // against a pending request again; sweep such entries once they are
    // older than any request they could still refer to
    let stale_after = config.request_timeout() + config.flush_interval();

    info!(
        workers = config.dispatch_workers,
        budget = config.batch_token_budget,
        "inference scheduler started"
    );

    'outer: loop {
        if !cancelled.is_empty() {
            cancelled.retain(|_, inserted| inserted.elapsed() < stale_after);
        }

        let first = match carry.take() {
            Some(req) => req,
            None => tokio::select! {
                _ = shutdown.cancelled() => break 'outer,
                item = queue_rx.recv() => match item {
                    Some(req) => req,
                    None => break 'outer,
                },
            },
        };
        let Some(first) = survive_cancel(&cancelled, first) else {
            continue;
        };

        let mut builder = BatchBuilder::new(config.batch_token_budget);
        let deadline = tokio::time::Instant::from_std(first.enqueued_at + config.flush_interval());
        builder.seed(first);

        // fill until the budget is hit or the oldest request has waited long
        // enough
        while carry.is_none() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                item = queue_rx.recv() => match item {
                    Some(req) => {
                        if let Some(req) = survive_cancel(&cancelled, req) {
                            carry = builder.try_push(req);
                        }
                    }
                    None => {
                        queue_closed = true;
                        break;
                    }
                },
            }
        }

        let batch = builder.take();
        counter!("scheduler_batches_flushed").increment(1);
        debug!(size = batch.len(), "flushing batch");

        let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
            break;
        };
        let endpoint = Arc::clone(&endpoint);
        let worker_config = config.clone();
        let worker_cancelled = Arc::clone(&cancelled);
        tokio::spawn(async move {
            let started = Instant::now();
            dispatch_batch(endpoint, &worker_config, batch, worker_cancelled).await;
            histogram!("scheduler_batch_dispatch_time").record(started.elapsed());
            drop(permit);
        });

        if queue_closed && carry.is_none() {
            break;
        }
    }

    // every queued request still gets a terminal result
    while let Ok(req) = queue_rx.try_recv() {
        finish(&cancelled, req, Err(GeniusError::Cancelled)).await;
    }
    info!("inference scheduler stopped");
}

/// Drop a request whose caller cancelled it or stopped waiting; hand it back
/// otherwise.
fn survive_cancel(
    cancelled: &Arc<DashMap<RequestId, Instant>>,
    req: PendingRequest,
) -> Option<PendingRequest> {
    if cancelled.remove(&req.request.id).is_some() || req.delivery.is_abandoned() {
        debug!(id = %req.request.id, origin = %req.request.origin, "discarding cancelled request");
        let cancelled = Arc::clone(cancelled);
        tokio::spawn(async move { finish(&cancelled, req, Err(GeniusError::Cancelled)).await });
        return None;
    }
    Some(req)
}

async fn dispatch_batch(
    endpoint: Arc<dyn ModelEndpoint>,
    config: &SchedulerConfig,
    batch: Vec<PendingRequest>,
    cancelled: Arc<DashMap<RequestId, Instant>>,
) {
    let mut complete = Vec::new();
    let mut streaming = Vec::new();
    for req in batch {
        // last point at which a cancel can still take effect
        let Some(req) = survive_cancel(&cancelled, req) else {
            continue;
        };
        match req.delivery {
            Delivery::Complete(_) => complete.push(req),
            Delivery::Stream(_) => streaming.push(req),
        }
    }

    if endpoint.supports_batch() && complete.len() > 1 {
        let calls: Vec<EndpointCall> = complete.iter().map(|p| call_of(&p.request)).collect();
        let replies = endpoint.invoke_batch(calls).await;
        for (pending, reply) in complete.into_iter().zip(replies) {
            match reply {
                Ok(reply) => finish(&cancelled, pending, Ok(generated(reply))).await,
                // one attempt already consumed by the batched call
                Err(err) if err.is_transient() => {
                    let result = invoke_with_retry(&endpoint, config, &pending, 1).await;
                    finish(&cancelled, pending, result).await;
                }
                Err(err) => finish(&cancelled, pending, Err(err)).await,
            }
        }
    } else {
        for pending in complete {
            let result = invoke_with_retry(&endpoint, config, &pending, 0).await;
            finish(&cancelled, pending, result).await;
        }
    }

    for pending in streaming {
        let id = pending.request.id;
        stream_request(&endpoint, config, pending).await;
        cancelled.remove(&id);
    }
}

async fn invoke_with_retry(
    endpoint: &Arc<dyn ModelEndpoint>,
    config: &SchedulerConfig,
    pending: &PendingRequest,
    attempts_used: u32,
) -> GenerationResult {
    let call = call_of(&pending.request);
    let mut attempt = attempts_used;
    loop {
        if pending.delivery.is_abandoned() {
            return Err(GeniusError::Cancelled);
        }
        match endpoint.invoke(call.clone()).await {
            Ok(reply) => return Ok(generated(reply)),
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                counter!("scheduler_endpoint_retries").increment(1);
                let delay = backoff_delay(config.backoff_base(), attempt);
                warn!(
                    id = %pending.request.id,
                    attempt,
                    ?delay,
                    error = %err,
                    "transient endpoint fault, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run one streaming request, forwarding chunks until the endpoint signals
/// end-of-stream or the consumer stops pulling.
async fn stream_request(
    endpoint: &Arc<dyn ModelEndpoint>,
    config: &SchedulerConfig,
    pending: PendingRequest,
) {
    let Delivery::Stream(tx) = pending.delivery else {
        return;
    };
    let call = call_of(&pending.request);
    let mut attempt = 0;
    loop {
        if tx.is_closed() {
            debug!(id = %pending.request.id, "stream consumer gone, abandoning");
            return;
        }
        match endpoint.invoke_stream(call.clone()).await {
            Ok(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    let failed = chunk.is_err();
                    if tx.send(chunk).await.is_err() {
                        // consumer ceased to pull; nothing left to deliver
                        return;
                    }
                    if failed {
                        return;
                    }
                }
                counter!("scheduler_requests_completed").increment(1);
                return;
            }
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                counter!("scheduler_endpoint_retries").increment(1);
                tokio::time::sleep(backoff_delay(config.backoff_base(), attempt)).await;
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

/// Deliver the terminal result for one request. Also drops any cancellation
/// entry for it: once terminal, the id can never match a queued request, and
/// a `submit` timeout racing this delivery would otherwise pin its entry in
/// the map forever.
async fn finish(
    cancelled: &DashMap<RequestId, Instant>,
    pending: PendingRequest,
    result: GenerationResult,
) {
    cancelled.remove(&pending.request.id);
    match result {
        Ok(_) => counter!("scheduler_requests_completed").increment(1),
        Err(_) => counter!("scheduler_requests_failed").increment(1),
    }
    match pending.delivery {
        Delivery::Complete(tx) => {
            if tx.send(result).is_err() {
                debug!(id = %pending.request.id, "caller stopped waiting before delivery");
            }
        }
        Delivery::Stream(tx) => match result {
            Ok(generated) => {
                let _ = tx.send(Ok(generated.text)).await;
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
            }
        },
    }
}

fn call_of(request: &GenerationRequest) -> EndpointCall {
    EndpointCall {
        prompt: request.prompt.clone(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
    }
}

fn generated(reply: codegenius_core::EndpointReply) -> Generated {
    let completion_tokens = reply
        .completion_tokens
        .unwrap_or_else(|| estimate_tokens(&reply.text));
    Generated {
        text: reply.text,
        completion_tokens,
    }
}

/// Exponential backoff with up to 25% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(10));
    let jitter_cap = (exp.as_millis() as u64 / 4).max(1);
    let jitter = rand::rng().random_range(0..jitter_cap);
    exp + Duration::from_millis(jitter)
}
