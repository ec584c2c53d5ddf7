//! # enhance-client
//!
//! Async batch client for remote image-enhancement services.
//!
//! Select a set of images, send them to an enhancement endpoint in a single
//! multipart request, and get back individually addressable results paired
//! with their inputs, plus quality metrics. While the request is in flight a
//! fake progress estimate keeps the caller informed.
//!
//! ## Features
//!
//! - **One request per batch**: all images go out in one multipart POST;
//!   any failure fails the whole batch
//! - **Positional pairing**: archive entry `i` belongs to input `i`,
//!   regardless of entry names
//! - **Explicit lifecycle**: `Idle → Ready → Enhancing → Succeeded | Failed`,
//!   as a single state enum rather than loose flags
//! - **Cancellable progress**: estimator ticks stop the moment a request
//!   resolves or the batch is reset
//! - **Stale-result protection**: results for a batch that was reset or
//!   replaced mid-request are discarded
//! - **Pluggable metrics**: placeholder figures, backend-reported figures,
//!   or your own [`MetricsSource`]
//! - **Events**: subscribe to lifecycle and progress notifications
//!
//! ## Quick Start
//!
//! ```no_run
//! use enhance_client::{BatchOrchestrator, EnhanceConfig, EnhanceOutcome, HttpTransport, InputImage};
//!
//! # async fn example() -> enhance_client::Result<()> {
//! // ENHANCE_BACKEND_URL=http://127.0.0.1:8000
//! let config = EnhanceConfig::from_env()?;
//! let orchestrator = BatchOrchestrator::new(HttpTransport::new(&config)?, config);
//!
//! let mut events = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! orchestrator.select(vec![
//!     InputImage::from_path("a.jpg").await?,
//!     InputImage::from_path("b.png").await?,
//! ])?;
//!
//! match orchestrator.enhance().await {
//!     EnhanceOutcome::Succeeded { outputs, .. } => {
//!         for i in 0..outputs {
//!             let file = orchestrator.download(i)?;
//!             std::fs::write(&file.file_name, &file.bytes)?;
//!         }
//!     }
//!     other => eprintln!("{:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod store;
pub mod stub;
pub mod transport;
pub mod types;

pub use archive::{ArchiveCodec, ArchiveEntry, ZipCodec};
pub use config::{EnhanceConfig, EnhanceConfigBuilder, PairingPolicy, ProgressConfig};
pub use error::{EnhanceError, Result};
pub use events::BatchEvent;
pub use metrics::{CompletionReport, MetricsSource, PlaceholderMetrics, ReportedMetrics};
pub use orchestrator::{BatchOrchestrator, FAILURE_NOTICE};
pub use progress::{ProgressEstimator, ProgressHandle};
pub use store::ResultStore;
pub use stub::EchoTransport;
pub use transport::{EnhanceTransport, HttpTransport, TransportResponse};
pub use types::{
    BatchId, BatchSnapshot, Download, EnhanceOutcome, FailureKind, InputImage, InputSummary,
    Metrics, OutputHandle, OutputImage, Phase, Rejection,
};
