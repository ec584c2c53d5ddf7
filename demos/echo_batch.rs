//! Run a batch against the built-in echo service and watch the events.
//!
//! No backend needed: the echo transport waits two seconds and hands the
//! inputs back as the "enhanced" results.
//!
//! ```sh
//! RUST_LOG=enhance_client=debug cargo run --example echo_batch
//! ```

use enhance_client::{
    BatchEvent, BatchOrchestrator, EchoTransport, EnhanceConfig, EnhanceOutcome, InputImage,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png";
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let orchestrator = Arc::new(BatchOrchestrator::new(
        EchoTransport::default(),
        EnhanceConfig::default(),
    ));

    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                BatchEvent::Progress { percent, .. } => println!("  {:>5.1}%", percent),
                other => println!("{}", serde_json::to_string(other).unwrap_or_default()),
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    orchestrator.select(vec![
        InputImage::new("sunset.png", "image/png", PNG),
        InputImage::new("portrait.jpg", "image/jpeg", JPEG),
    ])?;

    match orchestrator.enhance().await {
        EnhanceOutcome::Succeeded { outputs, .. } => {
            printer.await?;
            println!("Enhanced {} image(s)", outputs);
            for (input, output) in orchestrator.pairs() {
                if let Some(output) = output {
                    println!(
                        "  {} -> {} ({} bytes)",
                        input.name(),
                        output.entry_name,
                        output.content.len()
                    );
                }
            }
            if let Some(metrics) = orchestrator.snapshot().metrics {
                println!(
                    "PSNR {:.1} dB, SSIM {:.3}, confidence {:.0}%, {:.1}s",
                    metrics.psnr,
                    metrics.ssim,
                    metrics.confidence * 100.0,
                    metrics.processing_time
                );
            }
        }
        other => eprintln!("Not enhanced: {:?}", other),
    }

    orchestrator.reset();
    println!("Phase after reset: {}", orchestrator.phase());

    Ok(())
}
