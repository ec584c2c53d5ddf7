use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::error::Result;

/// Identity of one selected batch. A fresh id is minted on every selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user-selected image.
///
/// The position index is assigned when the image is admitted to a batch and
/// defines which archive entry it is paired with.
#[derive(Debug, Clone)]
pub struct InputImage {
    name: String,
    media_type: String,
    content: Bytes,
    index: usize,
}

impl InputImage {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            content: content.into(),
            index: 0,
        }
    }

    /// Read an image from disk, inferring its media type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        let media_type = media_type_for_path(path);
        Ok(Self::new(name, media_type, content))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Position within the batch (0-based, order of selection).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub(crate) fn admitted_at(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

/// One enhanced result, paired with the input at the same index.
#[derive(Debug, Clone)]
pub struct OutputImage {
    /// Position of the input this result belongs to.
    pub index: usize,
    /// Archive entry name. Diagnostic only; never used for pairing.
    pub entry_name: String,
    pub content: Bytes,
}

/// Aggregate quality figures for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Peak signal-to-noise ratio in decibels.
    pub psnr: f64,
    /// Structural similarity, 0.0..=1.0.
    pub ssim: f64,
    /// Model confidence, 0.0..=1.0.
    pub confidence: f64,
    /// Processing time in seconds.
    pub processing_time: f64,
}

/// Lifecycle phase of the active batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Ready,
    Enhancing,
    Succeeded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Ready => "ready",
            Phase::Enhancing => "enhancing",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a batch failed. Kept for diagnostics; users see one generic notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Transport,
    Timeout,
    Decode,
    PairingOverflow,
    PairingShortfall,
    /// The caller dropped the request before it resolved.
    Abandoned,
}

/// Result of one [`enhance`](crate::BatchOrchestrator::enhance) invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EnhanceOutcome {
    /// Results were decoded and paired. `unpaired` counts trailing inputs
    /// the archive had no entry for.
    Succeeded {
        batch_id: BatchId,
        outputs: usize,
        unpaired: usize,
    },
    /// The batch moved to `Failed`; inputs stay selected for a retry.
    Failed {
        batch_id: BatchId,
        kind: FailureKind,
        notice: String,
    },
    /// Nothing was sent.
    Rejected(Rejection),
    /// The batch was reset or replaced while the request was in flight and
    /// the late result was discarded.
    Superseded { batch_id: BatchId },
}

/// Reason an enhance invocation was refused without issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No batch is selected.
    NoInput,
    /// A request for this batch is already outstanding.
    AlreadyEnhancing,
}

/// Read-only reference to one output of a specific batch run.
///
/// Reads fail with [`StaleHandle`](crate::EnhanceError::StaleHandle) once the
/// batch is reset, replaced, or enhanced again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputHandle {
    pub batch_id: BatchId,
    pub attempt: u32,
    pub index: usize,
}

/// A file offered for download.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Bytes,
}

/// Presentation-facing description of one input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSummary {
    pub index: usize,
    pub name: String,
    pub media_type: String,
    pub size: usize,
}

/// Serializable view of the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: Option<BatchId>,
    pub phase: Phase,
    pub inputs: Vec<InputSummary>,
    pub outputs: usize,
    pub unpaired: usize,
    pub metrics: Option<Metrics>,
    pub progress: f64,
    pub notice: Option<String>,
    pub failure: Option<FailureKind>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Guess a media type from a file extension.
pub fn media_type_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Detect an image media type from magic bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else {
        None
    }
}

/// Preferred file extension for an image media type.
pub fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}
