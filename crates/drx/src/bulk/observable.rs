//! 👀 The consumer side of `bulk_all`: pull outcomes, or subscribe and be told.
//!
//! Every call to [`BulkAllObservable::next`] is one unit of demand. The worker answers each
//! unit with exactly one outcome (or the terminal error), then goes back to waiting. A
//! consumer that stops asking stops the ingestion. A consumer that drops the observable
//! cancels it.
//!
//! ⚠️ A closed outcome channel is not proof of a happy ending. The worker's `JoinHandle` is
//! consulted first: a worker that panicked mid-run becomes a terminal `StreamTerminated`.

use std::any::Any;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_channel::{Receiver, Sender, TrySendError};
use futures::Stream;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace, warn};

use crate::bulk::{BulkOutcome, BulkSummary};
use crate::errors::{RepositoryError, Result};

/// 🛑 A handle that stops a bulk stream at its next checkpoint. Clone it anywhere.
#[derive(Debug, Clone)]
pub struct BulkAllCancellation {
    signal: Arc<watch::Sender<bool>>,
}

impl BulkAllCancellation {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (signal, listener) = watch::channel(false);
        (Self { signal: Arc::new(signal) }, listener)
    }

    /// 🛑 Idempotent. A batch already on the wire still completes and is still delivered.
    pub fn cancel(&self) {
        if !self.signal.send_replace(true) {
            debug!("🛑 bulk cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }
}

/// 📣 Callbacks for [`BulkAllObservable::subscribe`].
///
/// Return `ControlFlow::Break(())` from `on_next` to stop the run after that outcome.
pub trait BulkAllObserver: Send {
    fn on_next(&mut self, _outcome: &BulkOutcome) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_error(&mut self, _error: &RepositoryError) {}

    fn on_completed(&mut self, _summary: &BulkSummary) {}
}

struct OnNext<F>(F);

impl<F> BulkAllObserver for OnNext<F>
where
    F: FnMut(&BulkOutcome) -> ControlFlow<()> + Send,
{
    fn on_next(&mut self, outcome: &BulkOutcome) -> ControlFlow<()> {
        (self.0)(outcome)
    }
}

/// 🌊 A lazy, cancellable sequence of [`BulkOutcome`]s. Also a [`Stream`].
pub struct BulkAllObservable {
    index: String,
    demand: Sender<()>,
    outcomes: Pin<Box<Receiver<Result<BulkOutcome>>>>,
    cancellation: BulkAllCancellation,
    worker: JoinHandle<()>,
    /// 🔢 outcomes handed out so far, i.e. the sequence of the batch being worked on
    delivered: u64,
    demand_pending: bool,
    finished: bool,
}

impl std::fmt::Debug for BulkAllObservable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkAllObservable")
            .field("index", &self.index)
            .field("delivered", &self.delivered)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("demand_pending", &self.demand_pending)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl BulkAllObservable {
    pub(crate) fn new(
        index: String,
        demand: Sender<()>,
        outcomes: Receiver<Result<BulkOutcome>>,
        cancellation: BulkAllCancellation,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            index,
            demand,
            outcomes: Box::pin(outcomes),
            cancellation,
            worker,
            delivered: 0,
            demand_pending: false,
            finished: false,
        }
    }

    pub fn cancellation(&self) -> BulkAllCancellation {
        self.cancellation.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn request_more(&mut self) {
        if self.demand_pending {
            return;
        }
        if let Err(TrySendError::Closed(())) = self.demand.try_send(()) {
            // -- 🪦 worker already gone. the outcome channel will report the end.
            trace!("🪦 bulk worker is gone, demand not delivered");
        }
        self.demand_pending = true;
    }

    fn settle(&mut self, received: Option<Result<BulkOutcome>>) -> Option<Result<BulkOutcome>> {
        self.demand_pending = false;
        match &received {
            None | Some(Err(_)) => self.finished = true,
            Some(Ok(_)) => self.delivered += 1,
        }
        received
    }

    /// 🩺 The outcome channel closed. Ask the worker how it went before calling it a day.
    fn post_mortem(&self, joined: std::result::Result<(), JoinError>) -> Option<Result<BulkOutcome>> {
        let error = joined.err()?;
        // -- 💀 the worker died holding a batch. everything from here on was never ingested.
        let reason = if error.is_panic() {
            format!("bulk worker panicked: {}", panic_message(error.into_panic()))
        } else {
            format!("bulk worker stopped unexpectedly: {error}")
        };
        warn!("💀 bulk stream for '{}' died after {} batches: {reason}", self.index, self.delivered);
        Some(Err(RepositoryError::StreamTerminated {
            index: self.index.clone(),
            sequence: self.delivered,
            completed_batches: self.delivered,
            reason,
        }))
    }

    /// ⏭️ Ask for one more batch and wait for its outcome.
    ///
    /// `None` once the input is exhausted, the run was cancelled, or after the terminal
    /// `StreamTerminated` error has been handed out. Dropping this future mid-wait is fine:
    /// the pending outcome is picked up by the next call.
    pub async fn next(&mut self) -> Option<Result<BulkOutcome>> {
        if self.finished {
            return None;
        }
        self.request_more();
        let delivered = self.outcomes.recv().await;
        let received = match delivered {
            Ok(received) => Some(received),
            Err(_closed) => {
                let joined = (&mut self.worker).await;
                self.post_mortem(joined)
            }
        };
        self.settle(received)
    }

    /// 📣 Drive the run to completion, reporting to `observer`.
    ///
    /// Returns the summary, or the terminal error after `on_error` has seen it.
    pub async fn subscribe(mut self, mut observer: impl BulkAllObserver) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        while let Some(received) = self.next().await {
            match received {
                Ok(outcome) => {
                    summary.record(&outcome);
                    if observer.on_next(&outcome).is_break() {
                        self.cancellation.cancel();
                        break;
                    }
                }
                Err(error) => {
                    observer.on_error(&error);
                    return Err(error);
                }
            }
        }
        summary.cancelled = self.cancellation.is_cancelled();
        observer.on_completed(&summary);
        Ok(summary)
    }

    /// ⏳ [`BulkAllObservable::subscribe`] with just an `on_next` closure.
    pub async fn wait<F>(self, on_next: F) -> Result<BulkSummary>
    where
        F: FnMut(&BulkOutcome) -> ControlFlow<()> + Send,
    {
        self.subscribe(OnNext(on_next)).await
    }
}

impl Stream for BulkAllObservable {
    type Item = Result<BulkOutcome>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        self.request_more();
        match self.outcomes.as_mut().poll_next(cx) {
            Poll::Ready(Some(received)) => Poll::Ready(self.settle(Some(received))),
            Poll::Ready(None) => match Pin::new(&mut self.worker).poll(cx) {
                Poll::Ready(joined) => {
                    let received = self.post_mortem(joined);
                    Poll::Ready(self.settle(received))
                }
                Poll::Pending => Poll::Pending,
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send + 'static>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|| "no panic message".to_string()),
    }
}

impl Drop for BulkAllObservable {
    fn drop(&mut self) {
        if !self.worker.is_finished() {
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::{StreamExt, stream};

    use super::*;
    use crate::backends::InMemorySearchClient;
    use crate::bulk::BulkBatcher;
    use crate::common::{IndexName, JsonDocument, RefreshPolicy};

    fn observable(client: &Arc<InMemorySearchClient>, batch_size: usize, count: usize) -> BulkAllObservable {
        let documents: Vec<JsonDocument> = (0..count)
            .map(|n| JsonDocument(serde_json::json!({"id": n})))
            .collect();
        BulkBatcher::new(Arc::clone(client), IndexName::new("orders").unwrap(), batch_size, RefreshPolicy::Refresh)
            .stream(stream::iter(documents))
    }

    #[derive(Default)]
    struct Notebook {
        sequences: Vec<u64>,
        errors: usize,
        completed: Option<BulkSummary>,
        stop_after: Option<u64>,
    }

    impl BulkAllObserver for &mut Notebook {
        fn on_next(&mut self, outcome: &BulkOutcome) -> ControlFlow<()> {
            self.sequences.push(outcome.sequence);
            match self.stop_after {
                Some(last) if outcome.sequence >= last => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }

        fn on_error(&mut self, _error: &RepositoryError) {
            self.errors += 1;
        }

        fn on_completed(&mut self, summary: &BulkSummary) {
            self.completed = Some(summary.clone());
        }
    }

    #[tokio::test]
    async fn the_one_where_the_observer_hears_everything_in_order() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let mut notebook = Notebook::default();
        let summary = observable(&client, 2, 5).subscribe(&mut notebook).await?;
        assert_eq!(notebook.sequences, vec![0, 1, 2]);
        assert_eq!(summary.submitted, 5);
        assert!(!summary.cancelled);
        assert_eq!(notebook.completed, Some(summary));
        assert!(client.recorded_bulks().await.iter().all(|bulk| bulk.refresh == RefreshPolicy::Refresh));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_observer_says_enough() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let mut notebook = Notebook { stop_after: Some(1), ..Notebook::default() };
        let summary = observable(&client, 2, 10).subscribe(&mut notebook).await?;
        assert_eq!(notebook.sequences, vec![0, 1]);
        assert!(summary.cancelled);
        assert_eq!(summary.batches, 2);
        assert_eq!(client.recorded_bulks().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_observer_gets_the_bad_news() {
        let client = Arc::new(InMemorySearchClient::new().failing_bulk_call(1));
        let mut notebook = Notebook::default();
        let result = observable(&client, 2, 4).subscribe(&mut notebook).await;
        assert!(matches!(result, Err(RepositoryError::StreamTerminated { .. })));
        assert_eq!(notebook.errors, 1);
        assert!(notebook.completed.is_none());
    }

    #[tokio::test]
    async fn the_one_where_wait_takes_a_closure() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let mut seen = 0;
        let summary = observable(&client, 3, 7)
            .wait(|outcome| {
                seen += outcome.submitted;
                ControlFlow::Continue(())
            })
            .await?;
        assert_eq!(seen, 7);
        assert_eq!(summary.batches, 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_it_is_also_just_a_stream() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let outcomes: Vec<Result<BulkOutcome>> = observable(&client, 4, 10).collect().await;
        let sizes: Vec<usize> = outcomes.into_iter().map(|o| o.map(|o| o.submitted)).collect::<Result<_>>()?;
        assert_eq!(sizes, vec![4, 4, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_dropping_the_observable_stops_the_worker() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let mut run = observable(&client, 2, 10);
        run.next().await.expect("💀 first batch")?;
        let cancellation = run.cancellation();
        drop(run);
        assert!(cancellation.is_cancelled());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.recorded_bulks().await.len(), 1);
        Ok(())
    }
}
