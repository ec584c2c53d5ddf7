use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveCodec, ZipCodec};
use crate::config::{EnhanceConfig, PairingPolicy};
use crate::error::{EnhanceError, Result};
use crate::events::BatchEvent;
use crate::metrics::{CompletionReport, MetricsSource, PlaceholderMetrics};
use crate::progress::ProgressEstimator;
use crate::store::{ResultStore, Ticket};
use crate::transport::{EnhanceTransport, TransportResponse};
use crate::types::{
    BatchId, BatchSnapshot, Download, EnhanceOutcome, FailureKind, InputImage, Metrics,
    OutputHandle, OutputImage, Phase,
};

/// The one message users see for any failed request.
pub const FAILURE_NOTICE: &str = "Enhancement failed. Please try again or check your connection.";

type SharedStore = Arc<Mutex<ResultStore>>;

fn lock(store: &Mutex<ResultStore>) -> MutexGuard<'_, ResultStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure_kind(err: &EnhanceError) -> FailureKind {
    match err {
        EnhanceError::Timeout(_) => FailureKind::Timeout,
        EnhanceError::Decode(_) => FailureKind::Decode,
        EnhanceError::PairingOverflow { .. } => FailureKind::PairingOverflow,
        EnhanceError::PairingShortfall { .. } => FailureKind::PairingShortfall,
        _ => FailureKind::Transport,
    }
}

/// Drives one batch at a time through select → enhance → results.
///
/// All control operations take `&self`; share the orchestrator behind an
/// `Arc` to call [`reset`](Self::reset) or [`select`](Self::select) while an
/// [`enhance`](Self::enhance) call is awaiting the service.
///
/// # Example
/// ```no_run
/// use enhance_client::{BatchOrchestrator, EnhanceConfig, HttpTransport, InputImage};
///
/// # async fn example() -> enhance_client::Result<()> {
/// let config = EnhanceConfig::from_env()?;
/// let orchestrator = BatchOrchestrator::new(HttpTransport::new(&config)?, config);
///
/// orchestrator.select(vec![InputImage::from_path("photo.jpg").await?])?;
/// let outcome = orchestrator.enhance().await;
/// println!("{:?}", outcome);
///
/// let download = orchestrator.download(0)?;
/// std::fs::write(&download.file_name, &download.bytes)?;
/// # Ok(())
/// # }
/// ```
pub struct BatchOrchestrator<T, C = ZipCodec, M = PlaceholderMetrics> {
    transport: T,
    codec: Arc<C>,
    metrics: M,
    estimator: ProgressEstimator,
    config: EnhanceConfig,
    store: SharedStore,
    events: broadcast::Sender<BatchEvent>,
}

impl<T, C, M> std::fmt::Debug for BatchOrchestrator<T, C, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = lock(&self.store);
        f.debug_struct("BatchOrchestrator")
            .field("phase", &store.phase())
            .field("batch_id", &store.batch_id())
            .field("inputs", &store.inputs().len())
            .field("pairing", &self.config.pairing)
            .field("request_timeout", &self.config.request_timeout)
            .finish()
    }
}

impl<T: EnhanceTransport> BatchOrchestrator<T> {
    /// Create an orchestrator with the zip codec and placeholder metrics.
    pub fn new(transport: T, config: EnhanceConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            codec: Arc::new(ZipCodec),
            metrics: PlaceholderMetrics::default(),
            estimator: ProgressEstimator::new(config.progress.clone()),
            config,
            store: Arc::new(Mutex::new(ResultStore::new())),
            events,
        }
    }
}

impl<T, C, M> BatchOrchestrator<T, C, M>
where
    T: EnhanceTransport,
    C: ArchiveCodec + 'static,
    M: MetricsSource,
{
    /// Use a different archive format.
    pub fn with_codec<C2: ArchiveCodec + 'static>(self, codec: C2) -> BatchOrchestrator<T, C2, M> {
        BatchOrchestrator {
            transport: self.transport,
            codec: Arc::new(codec),
            metrics: self.metrics,
            estimator: self.estimator,
            config: self.config,
            store: self.store,
            events: self.events,
        }
    }

    /// Use a different metrics source.
    pub fn with_metrics<M2: MetricsSource>(self, metrics: M2) -> BatchOrchestrator<T, C, M2> {
        BatchOrchestrator {
            transport: self.transport,
            codec: self.codec,
            metrics,
            estimator: self.estimator,
            config: self.config,
            store: self.store,
            events: self.events,
        }
    }

    /// Replace the progress estimator built from the config.
    pub fn with_estimator(mut self, estimator: ProgressEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive lifecycle and progress events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: BatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Replace the current batch with `inputs`, in selection order.
    ///
    /// Fails without touching the current batch if `inputs` is empty or
    /// contains a non-image. A request still in flight for the previous
    /// batch is left running, but its result will be discarded.
    pub fn select(&self, inputs: Vec<InputImage>) -> Result<BatchId> {
        let count = inputs.len();
        let mut store = lock(&self.store);
        let (batch_id, orphaned) = store.select(inputs)?;

        if let Some(old) = orphaned {
            tracing::info!(
                old_batch = %old,
                new_batch = %batch_id,
                "Selection replaced a batch with a request in flight; its result will be discarded"
            );
        }
        tracing::debug!(batch_id = %batch_id, inputs = count, "Batch selected");

        self.emit(BatchEvent::Selected {
            batch_id,
            inputs: count,
        });
        Ok(batch_id)
    }

    /// Send the current batch to the enhancement service and wait for it.
    ///
    /// Never returns an error: failures move the batch to
    /// [`Phase::Failed`] and come back as [`EnhanceOutcome::Failed`]. Calling
    /// this with no batch, or while a request is already outstanding, is a
    /// no-op that returns [`EnhanceOutcome::Rejected`].
    pub async fn enhance(&self) -> EnhanceOutcome {
        let cancel = CancellationToken::new();

        let (ticket, inputs) = {
            let mut store = lock(&self.store);
            match store.begin(cancel.clone()) {
                Ok((ticket, inputs)) => {
                    self.emit(BatchEvent::Started {
                        batch_id: ticket.batch_id,
                        attempt: ticket.attempt,
                    });
                    (ticket, inputs)
                }
                Err(rejection) => {
                    tracing::debug!(?rejection, "Enhance request rejected");
                    return EnhanceOutcome::Rejected(rejection);
                }
            }
        };
        tracing::info!(
            batch_id = %ticket.batch_id,
            attempt = ticket.attempt,
            inputs = inputs.len(),
            "Enhancing batch"
        );

        let _abandon = AbandonGuard {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            ticket,
        };

        let progress = {
            let store = Arc::clone(&self.store);
            let events = self.events.clone();
            self.estimator.start_linked(&cancel, move |percent| {
                let mut store = lock(&store);
                if store.set_progress(ticket, percent) {
                    let _ = events.send(BatchEvent::Progress {
                        batch_id: ticket.batch_id,
                        percent,
                    });
                }
            })
        };

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.submit(&inputs) => Some(result),
        };
        progress.stop();

        let Some(response) = response else {
            tracing::info!(batch_id = %ticket.batch_id, "Enhance request cancelled");
            return EnhanceOutcome::Superseded {
                batch_id: ticket.batch_id,
            };
        };

        let completion = match response {
            Ok(resp) => self.unpack(&inputs, resp, started.elapsed()).await,
            Err(err) => Err(err),
        };
        self.finish(ticket, completion)
    }

    /// Discard the batch and cancel any outstanding request.
    ///
    /// Output handles issued before the reset stop working.
    pub fn reset(&self) {
        let mut store = lock(&self.store);
        let discarded = store.reset();
        tracing::debug!(batch_id = ?discarded, "Batch reset");
        self.emit(BatchEvent::Reset {
            batch_id: discarded,
        });
    }

    async fn submit(&self, inputs: &[InputImage]) -> Result<TransportResponse> {
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.submit(inputs))
                .await
                .map_err(|_| EnhanceError::Timeout(limit))?,
            None => self.transport.submit(inputs).await,
        }
    }

    /// Decode the archive off the async workers and pair entry `i` with
    /// input `i`.
    async fn unpack(
        &self,
        inputs: &[InputImage],
        response: TransportResponse,
        elapsed: Duration,
    ) -> Result<(Vec<OutputImage>, Metrics)> {
        let codec = Arc::clone(&self.codec);
        let archive = response.archive;
        let entries = tokio::task::spawn_blocking(move || codec.decode(&archive))
            .await
            .map_err(|e| EnhanceError::Decode(format!("archive decoder stopped: {}", e)))??;

        if entries.len() > inputs.len() {
            return Err(EnhanceError::PairingOverflow {
                outputs: entries.len(),
                inputs: inputs.len(),
            });
        }
        if entries.len() < inputs.len() {
            match self.config.pairing {
                PairingPolicy::Strict => {
                    return Err(EnhanceError::PairingShortfall {
                        outputs: entries.len(),
                        inputs: inputs.len(),
                    });
                }
                PairingPolicy::Lenient => tracing::warn!(
                    outputs = entries.len(),
                    inputs = inputs.len(),
                    "Archive is short; trailing inputs have no result"
                ),
            }
        }

        let outputs: Vec<OutputImage> = inputs
            .iter()
            .zip(entries)
            .map(|(input, entry)| OutputImage {
                index: input.index(),
                entry_name: entry.name,
                content: entry.bytes,
            })
            .collect();

        let metrics = self.metrics.metrics(&CompletionReport {
            inputs: inputs.len(),
            outputs: outputs.len(),
            elapsed,
            reported: response.reported_metrics,
        });

        Ok((outputs, metrics))
    }

    /// Publish the terminal state, unless the request went stale meanwhile.
    fn finish(
        &self,
        ticket: Ticket,
        completion: Result<(Vec<OutputImage>, Metrics)>,
    ) -> EnhanceOutcome {
        let mut store = lock(&self.store);
        if !store.is_current(ticket) {
            tracing::info!(
                batch_id = %ticket.batch_id,
                attempt = ticket.attempt,
                "Discarding result for a batch that is no longer active"
            );
            return EnhanceOutcome::Superseded {
                batch_id: ticket.batch_id,
            };
        }

        match completion {
            Ok((outputs, metrics)) => {
                let count = outputs.len();
                store.succeed(ticket, outputs, metrics);
                let unpaired = store.unpaired();
                tracing::info!(
                    batch_id = %ticket.batch_id,
                    outputs = count,
                    unpaired,
                    "Batch enhanced"
                );

                self.emit(BatchEvent::Progress {
                    batch_id: ticket.batch_id,
                    percent: 100.0,
                });
                self.emit(BatchEvent::Succeeded {
                    batch_id: ticket.batch_id,
                    outputs: count,
                    unpaired,
                    metrics,
                });
                EnhanceOutcome::Succeeded {
                    batch_id: ticket.batch_id,
                    outputs: count,
                    unpaired,
                }
            }
            Err(err) => {
                let kind = failure_kind(&err);
                tracing::warn!(
                    batch_id = %ticket.batch_id,
                    attempt = ticket.attempt,
                    ?kind,
                    error = %err,
                    "Enhancement failed"
                );
                store.fail(ticket, kind, FAILURE_NOTICE.to_string());

                self.emit(BatchEvent::Failed {
                    batch_id: ticket.batch_id,
                    kind,
                    notice: FAILURE_NOTICE.to_string(),
                });
                EnhanceOutcome::Failed {
                    batch_id: ticket.batch_id,
                    kind,
                    notice: FAILURE_NOTICE.to_string(),
                }
            }
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> BatchSnapshot {
        lock(&self.store).snapshot()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.store).phase()
    }

    pub fn progress(&self) -> f64 {
        lock(&self.store).progress()
    }

    pub fn inputs(&self) -> Vec<InputImage> {
        lock(&self.store).inputs().to_vec()
    }

    pub fn outputs(&self) -> Vec<OutputImage> {
        lock(&self.store).outputs().to_vec()
    }

    /// Each input with its result, if it has one.
    pub fn pairs(&self) -> Vec<(InputImage, Option<OutputImage>)> {
        lock(&self.store)
            .pairs()
            .into_iter()
            .map(|(input, output)| (input.clone(), output.cloned()))
            .collect()
    }

    pub fn output_handle(&self, index: usize) -> Option<OutputHandle> {
        lock(&self.store).output_handle(index)
    }

    pub fn read_output(&self, handle: &OutputHandle) -> Result<Bytes> {
        lock(&self.store).read(handle)
    }

    /// One result under a generated file name.
    pub fn download(&self, index: usize) -> Result<Download> {
        lock(&self.store).download(index)
    }

    /// All results packed into one archive.
    pub fn download_all(&self) -> Result<Download> {
        lock(&self.store).download_all(self.codec.as_ref())
    }
}

/// Fails the attempt if `enhance` is dropped before it publishes a result.
struct AbandonGuard {
    store: SharedStore,
    events: broadcast::Sender<BatchEvent>,
    ticket: Ticket,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let mut store = lock(&self.store);
        if store.fail(self.ticket, FailureKind::Abandoned, FAILURE_NOTICE.to_string()) {
            tracing::warn!(batch_id = %self.ticket.batch_id, "Enhance request dropped before completion");
            let _ = self.events.send(BatchEvent::Failed {
                batch_id: self.ticket.batch_id,
                kind: FailureKind::Abandoned,
                notice: FAILURE_NOTICE.to_string(),
            });
        }
    }
}
