use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveCodec, ArchiveEntry};
use crate::error::{EnhanceError, Result};
use crate::types::{
    extension_for_media_type, sniff_media_type, BatchId, BatchSnapshot, Download, FailureKind,
    InputImage, InputSummary, Metrics, OutputHandle, OutputImage, Phase, Rejection,
};

/// File name offered for the whole-batch download, minus extension.
const BATCH_DOWNLOAD_STEM: &str = "enhanced-images";

/// Identity a single request is tagged with. Results carrying a ticket that
/// no longer matches the store are stale and must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub batch_id: BatchId,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
struct Batch {
    id: BatchId,
    inputs: Arc<[InputImage]>,
    attempts: u32,
}

#[derive(Debug)]
enum BatchState {
    Idle,
    Ready {
        batch: Batch,
    },
    Enhancing {
        batch: Batch,
        cancel: CancellationToken,
        progress: f64,
    },
    Succeeded {
        batch: Batch,
        outputs: Vec<OutputImage>,
        metrics: Metrics,
        completed_at: DateTime<Utc>,
    },
    Failed {
        batch: Batch,
        kind: FailureKind,
        notice: String,
    },
}

/// Current batch, its results, and where it is in its lifecycle.
///
/// Only the orchestrator mutates the store; everything public here is a
/// read.
#[derive(Debug)]
pub struct ResultStore {
    state: BatchState,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            state: BatchState::Idle,
        }
    }

    fn batch(&self) -> Option<&Batch> {
        match &self.state {
            BatchState::Idle => None,
            BatchState::Ready { batch }
            | BatchState::Enhancing { batch, .. }
            | BatchState::Succeeded { batch, .. }
            | BatchState::Failed { batch, .. } => Some(batch),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            BatchState::Idle => Phase::Idle,
            BatchState::Ready { .. } => Phase::Ready,
            BatchState::Enhancing { .. } => Phase::Enhancing,
            BatchState::Succeeded { .. } => Phase::Succeeded,
            BatchState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch().map(|b| b.id)
    }

    pub fn inputs(&self) -> &[InputImage] {
        self.batch().map(|b| &b.inputs[..]).unwrap_or(&[])
    }

    /// Enhanced results, in input order. Empty unless the batch succeeded.
    pub fn outputs(&self) -> &[OutputImage] {
        match &self.state {
            BatchState::Succeeded { outputs, .. } => outputs.as_slice(),
            _ => &[],
        }
    }

    pub fn metrics(&self) -> Option<Metrics> {
        match &self.state {
            BatchState::Succeeded { metrics, .. } => Some(*metrics),
            _ => None,
        }
    }

    /// 0 outside a request, the estimate while enhancing, 100 on success.
    pub fn progress(&self) -> f64 {
        match &self.state {
            BatchState::Enhancing { progress, .. } => *progress,
            BatchState::Succeeded { .. } => 100.0,
            _ => 0.0,
        }
    }

    /// User-facing failure message, if the batch failed.
    pub fn notice(&self) -> Option<&str> {
        match &self.state {
            BatchState::Failed { notice, .. } => Some(notice),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match &self.state {
            BatchState::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Inputs the archive had no result for.
    pub fn unpaired(&self) -> usize {
        match &self.state {
            BatchState::Succeeded { batch, outputs, .. } => {
                batch.inputs.len().saturating_sub(outputs.len())
            }
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            batch_id: self.batch_id(),
            phase: self.phase(),
            inputs: self
                .inputs()
                .iter()
                .map(|i| InputSummary {
                    index: i.index(),
                    name: i.name().to_string(),
                    media_type: i.media_type().to_string(),
                    size: i.content().len(),
                })
                .collect(),
            outputs: self.outputs().len(),
            unpaired: self.unpaired(),
            metrics: self.metrics(),
            progress: self.progress(),
            notice: self.notice().map(String::from),
            failure: self.failure(),
            completed_at: match &self.state {
                BatchState::Succeeded { completed_at, .. } => Some(*completed_at),
                _ => None,
            },
        }
    }

    /// Each input alongside its result, if it has one.
    pub fn pairs(&self) -> Vec<(&InputImage, Option<&OutputImage>)> {
        let outputs = self.outputs();
        self.inputs()
            .iter()
            .map(|input| (input, outputs.get(input.index())))
            .collect()
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Handle to the result at `index`, if the batch succeeded and has one.
    pub fn output_handle(&self, index: usize) -> Option<OutputHandle> {
        match &self.state {
            BatchState::Succeeded { batch, outputs, .. } if index < outputs.len() => {
                Some(OutputHandle {
                    batch_id: batch.id,
                    attempt: batch.attempts,
                    index,
                })
            }
            _ => None,
        }
    }

    /// Read a result through a handle issued earlier.
    pub fn read(&self, handle: &OutputHandle) -> Result<Bytes> {
        match &self.state {
            BatchState::Succeeded { batch, outputs, .. }
                if batch.id == handle.batch_id && batch.attempts == handle.attempt =>
            {
                outputs
                    .get(handle.index)
                    .map(|o| o.content.clone())
                    .ok_or(EnhanceError::OutputNotFound(handle.index))
            }
            _ => Err(EnhanceError::StaleHandle),
        }
    }

    /// The result at `index` under a generated file name.
    pub fn download(&self, index: usize) -> Result<Download> {
        let outputs = match &self.state {
            BatchState::Succeeded { outputs, .. } => outputs.as_slice(),
            _ => return Err(EnhanceError::NoResults),
        };
        let output = outputs
            .get(index)
            .ok_or(EnhanceError::OutputNotFound(index))?;
        let input = &self.inputs()[output.index];

        let media_type = sniff_media_type(&output.content)
            .map(String::from)
            .unwrap_or_else(|| input.media_type().to_string());

        Ok(Download {
            file_name: download_name(input, &media_type),
            media_type,
            bytes: output.content.clone(),
        })
    }

    /// Every result packed into one archive.
    pub fn download_all(&self, codec: &dyn ArchiveCodec) -> Result<Download> {
        if self.outputs().is_empty() {
            return Err(EnhanceError::NoResults);
        }

        let entries = (0..self.outputs().len())
            .map(|i| {
                self.download(i)
                    .map(|d| ArchiveEntry::new(d.file_name, d.bytes))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Download {
            file_name: format!("{}.{}", BATCH_DOWNLOAD_STEM, codec.extension()),
            media_type: codec.media_type().to_string(),
            bytes: codec.encode(&entries)?,
        })
    }

    // ── Transitions (orchestrator only) ─────────────────────────────

    /// Replace the current batch with a new selection.
    ///
    /// Returns the new id, and the id of a batch whose request was still in
    /// flight when it was replaced.
    pub(crate) fn select(&mut self, inputs: Vec<InputImage>) -> Result<(BatchId, Option<BatchId>)> {
        if inputs.is_empty() {
            return Err(EnhanceError::NoInput);
        }
        if let Some(bad) = inputs.iter().find(|i| !i.is_image()) {
            return Err(EnhanceError::InvalidMediaType {
                name: bad.name().to_string(),
                media_type: bad.media_type().to_string(),
            });
        }

        let orphaned = match &self.state {
            BatchState::Enhancing { batch, .. } => Some(batch.id),
            _ => None,
        };

        let inputs: Arc<[InputImage]> = inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| input.admitted_at(i))
            .collect();
        let batch = Batch {
            id: BatchId::new(),
            inputs,
            attempts: 0,
        };
        let id = batch.id;
        self.state = BatchState::Ready { batch };
        Ok((id, orphaned))
    }

    /// Move to `Enhancing`, discarding any earlier results.
    pub(crate) fn begin(
        &mut self,
        cancel: CancellationToken,
    ) -> std::result::Result<(Ticket, Arc<[InputImage]>), Rejection> {
        let state = std::mem::replace(&mut self.state, BatchState::Idle);
        let mut batch = match state {
            BatchState::Idle => return Err(Rejection::NoInput),
            enhancing @ BatchState::Enhancing { .. } => {
                self.state = enhancing;
                return Err(Rejection::AlreadyEnhancing);
            }
            BatchState::Ready { batch }
            | BatchState::Succeeded { batch, .. }
            | BatchState::Failed { batch, .. } => batch,
        };

        batch.attempts += 1;
        let ticket = Ticket {
            batch_id: batch.id,
            attempt: batch.attempts,
        };
        let inputs = Arc::clone(&batch.inputs);
        self.state = BatchState::Enhancing {
            batch,
            cancel,
            progress: 0.0,
        };
        Ok((ticket, inputs))
    }

    /// Whether `ticket` is the request currently in flight.
    pub(crate) fn is_current(&self, ticket: Ticket) -> bool {
        matches!(
            &self.state,
            BatchState::Enhancing { batch, .. }
                if batch.id == ticket.batch_id && batch.attempts == ticket.attempt
        )
    }

    /// Record a progress estimate. Ignored unless `ticket` is current.
    pub(crate) fn set_progress(&mut self, ticket: Ticket, value: f64) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        if let BatchState::Enhancing { progress, .. } = &mut self.state {
            *progress = value.clamp(*progress, 100.0);
        }
        true
    }

    /// Finish the current request successfully.
    pub(crate) fn succeed(
        &mut self,
        ticket: Ticket,
        outputs: Vec<OutputImage>,
        metrics: Metrics,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        if let BatchState::Enhancing { batch, .. } = std::mem::replace(&mut self.state, BatchState::Idle) {
            self.state = BatchState::Succeeded {
                batch,
                outputs,
                metrics,
                completed_at: Utc::now(),
            };
        }
        true
    }

    /// Finish the current request with a failure. Inputs stay selected.
    pub(crate) fn fail(&mut self, ticket: Ticket, kind: FailureKind, notice: String) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        if let BatchState::Enhancing { batch, .. } = std::mem::replace(&mut self.state, BatchState::Idle) {
            self.state = BatchState::Failed {
                batch,
                kind,
                notice,
            };
        }
        true
    }

    /// Drop everything. Cancels the in-flight request, if any, and returns
    /// the id of the discarded batch.
    pub(crate) fn reset(&mut self) -> Option<BatchId> {
        let discarded = self.batch_id();
        if let BatchState::Enhancing { cancel, .. } = &self.state {
            cancel.cancel();
        }
        self.state = BatchState::Idle;
        discarded
    }
}

fn download_name(input: &InputImage, media_type: &str) -> String {
    let path = Path::new(input.name());
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    let ext = extension_for_media_type(media_type)
        .map(String::from)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string());
    format!("enhanced-{}-{}.{}", input.index() + 1, stem, ext)
}
