use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use codegenius_core::error::Result;
use codegenius_core::{estimate_request_cost, GenerationRequest, GenerationResult};

/// How a queued request wants its outcome delivered.
pub(crate) enum Delivery {
    /// Caller waits for one complete terminal result.
    Complete(oneshot::Sender<GenerationResult>),
    /// Caller consumes incremental chunks; dropping the receiver cancels.
    Stream(mpsc::Sender<Result<String>>),
}

impl Delivery {
    /// True when the caller stopped waiting (timeout or dropped stream).
    pub(crate) fn is_abandoned(&self) -> bool {
        match self {
            Delivery::Complete(tx) => tx.is_closed(),
            Delivery::Stream(tx) => tx.is_closed(),
        }
    }
}

/// A request sitting in the scheduler queue, with its delivery channel and
/// queue position.
pub(crate) struct PendingRequest {
    /// Monotonic enqueue sequence, primary FIFO key.
    pub seq: u64,
    pub request: GenerationRequest,
    pub delivery: Delivery,
    pub enqueued_at: Instant,
}

impl PendingRequest {
    pub(crate) fn cost(&self) -> usize {
        estimate_request_cost(&self.request.prompt, self.request.max_tokens)
    }
}

/// Accumulates pending requests under the batch token budget.
pub(crate) struct BatchBuilder {
    budget: usize,
    cost: usize,
    items: Vec<PendingRequest>,
}

impl BatchBuilder {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            budget,
            cost: 0,
            items: Vec::new(),
        }
    }

    /// Seed the batch with its first request. The first request is always
    /// accepted, even when it alone exceeds the budget; oversized prompts are
    /// rejected earlier by the context-window check.
    pub(crate) fn seed(&mut self, req: PendingRequest) {
        self.cost = req.cost();
        self.items.push(req);
    }

    /// Add a request if it fits the remaining budget; hand it back otherwise
    /// so it can seed the next batch.
    pub(crate) fn try_push(&mut self, req: PendingRequest) -> Option<PendingRequest> {
        let cost = req.cost();
        if !self.items.is_empty() && self.cost + cost > self.budget {
            return Some(req);
        }
        self.cost += cost;
        self.items.push(req);
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Drain the batch in dispatch order: first-submitted-first-served, ties
    /// broken by correlation id for determinism.
    pub(crate) fn take(&mut self) -> Vec<PendingRequest> {
        let mut items = std::mem::take(&mut self.items);
        self.cost = 0;
        items.sort_by(|a, b| a.seq.cmp(&b.seq).then(a.request.id.cmp(&b.request.id)));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegenius_core::{GenerationParams, RequestOrigin};

    fn pending(seq: u64, prompt: &str, max_tokens: usize) -> PendingRequest {
        let params = GenerationParams {
            max_tokens,
            ..GenerationParams::default()
        };
        let (tx, _rx) = oneshot::channel();
        PendingRequest {
            seq,
            request: GenerationRequest::new(prompt, &params, RequestOrigin::Snippet),
            delivery: Delivery::Complete(tx),
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn rejects_over_budget_push() {
        // each request costs ~2 prompt tokens + 40 output tokens
        let mut builder = BatchBuilder::new(100);
        builder.seed(pending(0, "12345678", 40));
        assert!(builder.try_push(pending(1, "12345678", 40)).is_none());
        // third request would exceed 100
        assert!(builder.try_push(pending(2, "12345678", 40)).is_some());
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn first_request_accepted_even_over_budget() {
        let mut builder = BatchBuilder::new(10);
        builder.seed(pending(0, "long prompt text", 4096));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn take_orders_by_sequence() {
        let mut builder = BatchBuilder::new(100_000);
        builder.seed(pending(3, "c", 1));
        assert!(builder.try_push(pending(1, "a", 1)).is_none());
        assert!(builder.try_push(pending(2, "b", 1)).is_none());
        let seqs: Vec<u64> = builder.take().iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(builder.len(), 0);
    }
}
