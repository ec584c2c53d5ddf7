use std::time::Duration;

use crate::archive::{ArchiveCodec, ArchiveEntry, ZipCodec};
use crate::error::{EnhanceError, Result};
use crate::transport::{EnhanceTransport, TransportResponse};
use crate::types::InputImage;

/// Stand-in for a real enhancement service.
///
/// Waits an artificial delay, then hands every input back unchanged as one
/// zip entry each, in input order. Useful for demos and for wiring up a
/// presentation layer before a backend exists. Pair it with
/// [`PlaceholderMetrics`](crate::PlaceholderMetrics) for the figures.
#[derive(Debug, Clone)]
pub struct EchoTransport {
    delay: Duration,
}

impl Default for EchoTransport {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
        }
    }
}

impl EchoTransport {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl EnhanceTransport for EchoTransport {
    async fn submit(&self, inputs: &[InputImage]) -> Result<TransportResponse> {
        if inputs.is_empty() {
            return Err(EnhanceError::NoInput);
        }

        tokio::time::sleep(self.delay).await;

        // Prefix with the position so duplicate file names stay distinct.
        let entries: Vec<ArchiveEntry> = inputs
            .iter()
            .map(|input| {
                ArchiveEntry::new(
                    format!("{:03}-{}", input.index(), input.name()),
                    input.content().clone(),
                )
            })
            .collect();

        Ok(TransportResponse::new(ZipCodec.encode(&entries)?))
    }
}
