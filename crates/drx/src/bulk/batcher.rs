//! 🧺 The batcher: slices documents into bounded batches and feeds them to the engine.
//!
//! 🎬 *[the worker sits by the demand channel. it waits to be asked.]*
//! *[it is asked. it pulls exactly one batch. it sends it. it reports back. it waits again.]*
//!
//! 🧠 Knowledge graph:
//! - `submit_batch`: serialize, build one bulk request, hand the answer to the adapter.
//!   Documents that cannot be serialized fail locally (status 0) and never leave the process.
//! - `stream`: spawns the worker. The worker is demand-driven: one demand token from the
//!   consumer = one batch pulled, one bulk call, one outcome. Nothing is read ahead.
//! - Cancellation is checked while waiting for demand and while pulling input. It is never
//!   raced against a bulk call that is already on the wire. In-flight batches finish.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::backends::{BulkOperation, SearchClient};
use crate::bulk::observable::{BulkAllCancellation, BulkAllObservable};
use crate::bulk::{BulkItemFailure, BulkOutcome};
use crate::common::{Document, IndexName, RefreshPolicy};
use crate::errors::{RepositoryError, Result};
use crate::responses::{BatchContext, adapt_bulk};

/// 🧺 Turns documents into bulk requests against one resolved index.
pub struct BulkBatcher<C: SearchClient> {
    client: Arc<C>,
    index: IndexName,
    batch_size: usize,
    refresh: RefreshPolicy,
}

impl<C: SearchClient> Clone for BulkBatcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            index: self.index.clone(),
            batch_size: self.batch_size,
            refresh: self.refresh,
        }
    }
}

impl<C: SearchClient> fmt::Debug for BulkBatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkBatcher")
            .field("index", &self.index)
            .field("batch_size", &self.batch_size)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl<C: SearchClient> BulkBatcher<C> {
    /// 🏗️ A `batch_size` of zero is bumped to one. An empty batch loop helps nobody.
    pub fn new(client: Arc<C>, index: IndexName, batch_size: usize, refresh: RefreshPolicy) -> Self {
        if batch_size == 0 {
            warn!("⚠️ bulk batch size 0 makes no sense, using 1 instead");
        }
        Self {
            client,
            index,
            batch_size: batch_size.max(1),
            refresh,
        }
    }

    pub fn index(&self) -> &IndexName {
        &self.index
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 📡 Send one batch as one bulk request.
    ///
    /// Batches are numbered by the caller and submitted strictly one after another, so every
    /// earlier batch has completed by the time batch `sequence` goes out.
    pub async fn submit_batch<T: Document>(&self, sequence: u64, batch: Vec<T>) -> Result<BulkOutcome> {
        let submitted = batch.len();
        let mut sent = Vec::with_capacity(submitted);
        let mut operations = Vec::with_capacity(submitted);
        let mut local_failures = Vec::new();

        for (position, document) in batch.iter().enumerate() {
            // -- 🧾 one serialization per document: the id is read off the same value that ships
            match serde_json::to_value(document) {
                Ok(source) => {
                    let id = document.id_from_source(&source);
                    sent.push((position, id.clone()));
                    operations.push(BulkOperation {
                        id,
                        source: source.to_string(),
                    });
                }
                Err(error) => {
                    let id = document.id_from_source(&serde_json::Value::Null);
                    warn!("⚠️ batch {sequence}: document at position {position} could not be serialized: {error}");
                    local_failures.push(BulkItemFailure {
                        position,
                        id,
                        status: 0,
                        error_type: Some("serialization".to_string()),
                        reason: error.to_string(),
                    });
                }
            }
        }
        drop(batch);

        if operations.is_empty() {
            debug!("📭 batch {sequence}: nothing serializable, skipping the bulk call");
            let failed = local_failures.len();
            return Ok(BulkOutcome {
                sequence,
                submitted,
                succeeded: submitted - failed,
                failed,
                failures: local_failures,
                took_ms: None,
            });
        }

        debug!(
            "📦 batch {sequence}: sending {} documents to '{}'",
            operations.len(),
            self.index
        );
        let context = BatchContext {
            index: &self.index,
            sequence,
            completed_batches: sequence,
            submitted,
            sent: &sent,
            local_failures,
        };
        let raw = match self.client.bulk(&self.index, operations, self.refresh).await {
            Ok(raw) => raw,
            Err(error) => {
                return Err(RepositoryError::StreamTerminated {
                    index: self.index.to_string(),
                    sequence,
                    completed_batches: sequence,
                    reason: format!("{error:#}"),
                });
            }
        };
        let outcome = adapt_bulk(raw, context)?;
        trace!(
            "✅ batch {sequence}: {} succeeded, {} failed",
            outcome.succeeded,
            outcome.failed
        );
        Ok(outcome)
    }

    /// 🌊 Lazily bulk-index `documents`. Nothing is pulled until the consumer asks.
    pub fn stream<T, S>(&self, documents: S) -> BulkAllObservable
    where
        T: Document,
        S: Stream<Item = T> + Send + 'static,
    {
        let (demand_tx, demand_rx) = async_channel::bounded(1);
        let (outcome_tx, outcome_rx) = async_channel::bounded(1);
        let (cancellation, signal) = BulkAllCancellation::new();
        let worker = tokio::spawn(run_worker(self.clone(), documents, demand_rx, outcome_tx, signal));
        BulkAllObservable::new(self.index.to_string(), demand_tx, outcome_rx, cancellation, worker)
    }
}

/// ⏳ Resolves once cancellation was requested, or once nobody can request it anymore.
async fn cancellation_requested(signal: &mut watch::Receiver<bool>) {
    loop {
        let cancelled = *signal.borrow_and_update();
        if cancelled {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}

async fn run_worker<C, T, S>(
    batcher: BulkBatcher<C>,
    documents: S,
    demand: Receiver<()>,
    outcomes: Sender<Result<BulkOutcome>>,
    mut signal: watch::Receiver<bool>,
) where
    C: SearchClient,
    T: Document,
    S: Stream<Item = T> + Send + 'static,
{
    let mut documents = pin!(documents);
    let mut sequence = 0_u64;
    let mut exhausted = false;
    debug!("🚀 bulk worker for '{}' started (batch size {})", batcher.index, batcher.batch_size);

    while !exhausted {
        // -- 🙋 one demand token = one batch. no token, no pull.
        tokio::select! {
            biased;
            _ = cancellation_requested(&mut signal) => {
                debug!("🛑 bulk worker cancelled after {sequence} batches");
                break;
            }
            asked = demand.recv() => {
                if asked.is_err() {
                    debug!("👋 bulk consumer went away after {sequence} batches");
                    break;
                }
            }
        }

        let mut batch = Vec::with_capacity(batcher.batch_size);
        let mut interrupted = false;
        while batch.len() < batcher.batch_size {
            tokio::select! {
                biased;
                _ = cancellation_requested(&mut signal) => {
                    interrupted = true;
                    break;
                }
                next = documents.next() => match next {
                    Some(document) => batch.push(document),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
        }
        if interrupted {
            debug!("🛑 bulk worker cancelled while filling batch {sequence}, dropping {} pulled documents", batch.len());
            break;
        }
        if batch.is_empty() {
            debug!("🏁 input exhausted after {sequence} batches");
            break;
        }

        // -- 📡 from here on the batch is committed. cancellation waits its turn.
        let outcome = batcher.submit_batch(sequence, batch).await;
        let terminal = outcome.is_err();
        if outcomes.send(outcome).await.is_err() {
            debug!("👋 bulk consumer dropped outcome {sequence} on the floor");
            break;
        }
        if terminal {
            debug!("💀 bulk worker stopping: batch {sequence} could not be submitted");
            break;
        }
        sequence += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::stream;
    use serde::{Deserialize, Serialize, Serializer};
    use tokio::sync::Notify;

    use crate::backends::{InMemorySearchClient, RawResponse};
    use crate::common::JsonDocument;

    fn docs(count: usize) -> Vec<JsonDocument> {
        (1..=count)
            .map(|n| JsonDocument(serde_json::json!({"id": format!("d{n}"), "n": n})))
            .collect()
    }

    fn batcher<C: SearchClient>(client: Arc<C>, batch_size: usize) -> BulkBatcher<C> {
        BulkBatcher::new(client, IndexName::new("orders").unwrap(), batch_size, RefreshPolicy::Unspecified)
    }

    #[tokio::test]
    async fn the_one_where_five_documents_become_two_two_one() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let mut observable = batcher(Arc::clone(&client), 2).stream(stream::iter(docs(5)));

        let mut sizes = Vec::new();
        let mut sequences = Vec::new();
        while let Some(outcome) = observable.next().await {
            let outcome = outcome?;
            assert_eq!(outcome.succeeded + outcome.failed, outcome.submitted);
            sizes.push(outcome.submitted);
            sequences.push(outcome.sequence);
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(sequences, vec![0, 1, 2]);

        let recorded = client.recorded_bulks().await;
        let ids: Vec<Option<String>> = recorded.into_iter().flat_map(|bulk| bulk.ids).collect();
        let expected: Vec<Option<String>> = (1..=5).map(|n| Some(format!("d{n}"))).collect();
        assert_eq!(ids, expected, "input order survives batching");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_batch_count_is_always_the_ceiling() -> Result<()> {
        for (length, batch_size, expected) in [(0, 3, 0), (1, 3, 1), (3, 3, 1), (7, 3, 3), (9, 4, 3), (4, 1, 4)] {
            let client = Arc::new(InMemorySearchClient::new());
            let mut observable = batcher(Arc::clone(&client), batch_size).stream(stream::iter(docs(length)));
            let mut batches = 0;
            while let Some(outcome) = observable.next().await {
                outcome?;
                batches += 1;
            }
            assert_eq!(batches, expected, "L={length} B={batch_size}");
            assert_eq!(client.recorded_bulks().await.len(), expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_bad_document_does_not_stop_the_party() -> Result<()> {
        let client = Arc::new(
            InMemorySearchClient::new().with_validator(|doc| doc.get("bad").map(|_| "validation error".to_string())),
        );
        let mut input = docs(4);
        input[1] = JsonDocument(serde_json::json!({"id": "d2", "bad": true}));
        let mut observable = batcher(Arc::clone(&client), 3).stream(stream::iter(input));

        let first = observable.next().await.expect("💀 first outcome")?;
        assert_eq!((first.submitted, first.succeeded, first.failed), (3, 2, 1));
        assert_eq!(first.failures[0].position, 1);
        assert_eq!(first.failures[0].reason, "validation error");

        let second = observable.next().await.expect("💀 the stream keeps going")?;
        assert_eq!((second.submitted, second.failed), (1, 0));
        assert!(observable.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_network_dies_and_the_stream_says_goodbye() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new().failing_bulk_call(2));
        let mut observable = batcher(Arc::clone(&client), 2).stream(stream::iter(docs(6)));

        let first = observable.next().await.expect("💀 batch 0 arrives before the disaster")?;
        assert_eq!(first.sequence, 0);
        match observable.next().await {
            Some(Err(RepositoryError::StreamTerminated { sequence, completed_batches, reason, .. })) => {
                assert_eq!(sequence, 1);
                assert_eq!(completed_batches, 1);
                assert!(reason.contains("connection reset"));
            }
            plot_twist => panic!("💀 expected StreamTerminated, got {plot_twist:?}"),
        }
        assert!(observable.next().await.is_none(), "nothing after the terminal error");
        assert_eq!(client.recorded_bulks().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_cancel_lands_between_batches() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let mut observable = batcher(Arc::clone(&client), 2).stream(stream::iter(docs(10)));

        assert_eq!(observable.next().await.expect("💀 batch 0")?.sequence, 0);
        assert_eq!(observable.next().await.expect("💀 batch 1")?.sequence, 1);
        observable.cancellation().cancel();
        assert!(observable.next().await.is_none(), "batch 2 is never submitted");
        assert_eq!(client.recorded_bulks().await.len(), 2);
        assert_eq!(client.document_count("orders").await, 4);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nothing_is_read_until_someone_asks() -> Result<()> {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let input = stream::iter(docs(10)).map(move |doc| {
            counter.fetch_add(1, Ordering::SeqCst);
            doc
        });
        let client = Arc::new(InMemorySearchClient::new());
        let mut observable = batcher(Arc::clone(&client), 3).stream(input);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 0, "no demand, no reads");

        observable.next().await.expect("💀 first outcome")?;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 3, "exactly one batch was pulled");
        assert_eq!(client.recorded_bulks().await.len(), 1);
        Ok(())
    }

    /// 🚧 A client whose bulk call blocks until the test opens the gate.
    #[derive(Debug, Default)]
    struct GatedClient {
        inner: InMemorySearchClient,
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl SearchClient for GatedClient {
        async fn get_document(&self, index: &IndexName, id: &str) -> anyhow::Result<RawResponse> {
            self.inner.get_document(index, id).await
        }
        async fn index_document(
            &self,
            index: &IndexName,
            id: Option<&str>,
            source: &serde_json::Value,
            refresh: RefreshPolicy,
        ) -> anyhow::Result<RawResponse> {
            self.inner.index_document(index, id, source, refresh).await
        }
        async fn delete_document(&self, index: &IndexName, id: &str, refresh: RefreshPolicy) -> anyhow::Result<RawResponse> {
            self.inner.delete_document(index, id, refresh).await
        }
        async fn document_exists(&self, index: &IndexName, id: &str) -> anyhow::Result<RawResponse> {
            self.inner.document_exists(index, id).await
        }
        async fn bulk(
            &self,
            index: &IndexName,
            operations: Vec<BulkOperation>,
            refresh: RefreshPolicy,
        ) -> anyhow::Result<RawResponse> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.bulk(index, operations, refresh).await
        }
        async fn search(&self, index: &IndexName, body: &serde_json::Value) -> anyhow::Result<RawResponse> {
            self.inner.search(index, body).await
        }
    }

    #[tokio::test]
    async fn the_one_where_cancel_arrives_mid_flight_and_the_batch_still_lands() -> anyhow::Result<()> {
        let client = Arc::new(GatedClient::default());
        let mut observable = batcher(Arc::clone(&client), 2).stream(stream::iter(docs(6)));
        let cancellation = observable.cancellation();

        let consumer = tokio::spawn(async move {
            let first = observable.next().await;
            let second = observable.next().await;
            (first, second)
        });

        client.entered.notified().await;
        cancellation.cancel();
        client.gate.notify_one();

        let (first, second) = consumer.await?;
        let first = first.expect("💀 the in-flight batch is delivered")?;
        assert_eq!(first.submitted, 2);
        assert_eq!(first.succeeded, 2);
        assert!(second.is_none(), "nothing after the cancelled checkpoint");
        assert_eq!(client.inner.recorded_bulks().await.len(), 1);
        Ok(())
    }

    /// 💣 Serializes fine, unless told to explode.
    #[derive(Debug, Deserialize)]
    struct Touchy {
        id: String,
        explode: bool,
    }

    impl Serialize for Touchy {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            if self.explode {
                return Err(serde::ser::Error::custom("💥 kaboom"));
            }
            serializer.serialize_str(&self.id)
        }
    }

    impl Document for Touchy {
        fn id_from_source(&self, _source: &serde_json::Value) -> Option<String> {
            Some(self.id.clone())
        }
    }

    /// 🧨 Serializes fine until document 3, which takes the whole worker down with it.
    #[derive(Debug, Deserialize)]
    struct Grenade {
        n: usize,
    }

    impl Serialize for Grenade {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            if self.n == 3 {
                panic!("💥 pin pulled on document {}", self.n);
            }
            serializer.serialize_u64(self.n as u64)
        }
    }

    impl Document for Grenade {
        fn id_from_source(&self, _source: &serde_json::Value) -> Option<String> {
            Some(format!("g{}", self.n))
        }
    }

    fn grenades(count: usize) -> impl Stream<Item = Grenade> + Send + 'static {
        stream::iter((1..=count).map(|n| Grenade { n }))
    }

    #[tokio::test]
    async fn the_one_where_the_worker_panics_and_nobody_calls_it_a_success() {
        let client = Arc::new(InMemorySearchClient::new());
        let mut seen = Vec::new();
        let result = batcher(Arc::clone(&client), 2)
            .stream(grenades(6))
            .wait(|outcome| {
                seen.push(outcome.sequence);
                std::ops::ControlFlow::Continue(())
            })
            .await;

        match result {
            Err(RepositoryError::StreamTerminated { index, sequence, completed_batches, reason }) => {
                assert_eq!(index, "orders");
                assert_eq!(sequence, 1, "batch 1 held the grenade");
                assert_eq!(completed_batches, 1);
                assert!(reason.contains("pin pulled on document 3"), "{reason}");
            }
            plot_twist => panic!("💀 a dead worker must not look like a clean run, got {plot_twist:?}"),
        }
        assert_eq!(seen, vec![0]);
        assert_eq!(client.recorded_bulks().await.len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_the_stream_side_also_hears_about_the_panic() {
        let client = Arc::new(InMemorySearchClient::new());
        let outcomes: Vec<Result<BulkOutcome>> = batcher(Arc::clone(&client), 2).stream(grenades(6)).collect().await;
        assert_eq!(outcomes.len(), 2, "one good batch, then the terminal error, then nothing");
        assert!(outcomes[0].is_ok());
        assert!(matches!(
            outcomes[1],
            Err(RepositoryError::StreamTerminated { sequence: 1, .. })
        ));
    }

    /// 🧮 Counts how many times serde came knocking.
    #[derive(Debug, Deserialize)]
    struct Tally {
        id: String,
        #[serde(skip)]
        knocks: Arc<AtomicUsize>,
    }

    impl Serialize for Tally {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            self.knocks.fetch_add(1, Ordering::SeqCst);
            serde_json::json!({"id": self.id}).serialize(serializer)
        }
    }

    impl Document for Tally {}

    #[tokio::test]
    async fn the_one_where_each_document_is_serialized_exactly_once() -> Result<()> {
        let knocks = Arc::new(AtomicUsize::new(0));
        let batch: Vec<Tally> = (1..=3)
            .map(|n| Tally { id: format!("t{n}"), knocks: Arc::clone(&knocks) })
            .collect();
        let client = Arc::new(InMemorySearchClient::new());
        let outcome = batcher(Arc::clone(&client), 3).submit_batch(0, batch).await?;

        assert_eq!(outcome.succeeded, 3);
        assert_eq!(knocks.load(Ordering::SeqCst), 3, "the id comes off the same serialized value");
        let expected: Vec<Option<String>> = (1..=3).map(|n| Some(format!("t{n}"))).collect();
        assert_eq!(client.recorded_bulks().await[0].ids, expected);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_unserializable_documents_never_leave_the_building() -> Result<()> {
        let client = Arc::new(InMemorySearchClient::new());
        let batcher = batcher(Arc::clone(&client), 10);
        let outcome = batcher
            .submit_batch(
                0,
                vec![
                    Touchy { id: "a".into(), explode: false },
                    Touchy { id: "b".into(), explode: true },
                ],
            )
            .await?;
        assert_eq!((outcome.submitted, outcome.succeeded, outcome.failed), (2, 1, 1));
        assert_eq!(outcome.failures[0].position, 1);
        assert_eq!(outcome.failures[0].status, 0);
        assert_eq!(outcome.failures[0].id.as_deref(), Some("b"), "local failures still know who they are");
        assert_eq!(client.recorded_bulks().await[0].ids, vec![Some("a".to_string())]);

        let hopeless = batcher
            .submit_batch(1, vec![Touchy { id: "c".into(), explode: true }])
            .await?;
        assert_eq!(hopeless.failed, 1);
        assert_eq!(client.recorded_bulks().await.len(), 1, "an all-local-failure batch is not sent");
        Ok(())
    }
}
