//! Enhance image files on disk through a real enhancement service.
//!
//! Reads the service location from the environment and writes one
//! `enhanced-*` file per result, plus a zip of all of them, into the
//! output directory.
//!
//! ```sh
//! ENHANCE_BACKEND_URL=http://127.0.0.1:8000 \
//!     cargo run --example enhance_files -- out/ photo1.jpg photo2.png
//! ```

use anyhow::{bail, Context};
use enhance_client::{
    BatchEvent, BatchOrchestrator, EnhanceConfig, EnhanceOutcome, HttpTransport, InputImage,
    ReportedMetrics,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().context("usage: enhance_files <out-dir> <image>...")?);
    let paths: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if paths.is_empty() {
        bail!("no images given");
    }

    let config = EnhanceConfig::from_env()?;
    let transport = HttpTransport::new(&config)?;
    println!("Sending to {}", transport.url());

    let orchestrator =
        BatchOrchestrator::new(transport, config).with_metrics(<ReportedMetrics>::default());

    let mut inputs = Vec::with_capacity(paths.len());
    for path in &paths {
        inputs.push(
            InputImage::from_path(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        );
    }
    orchestrator.select(inputs)?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let BatchEvent::Progress { percent, .. } = event {
                println!("  {:.0}%", percent);
            }
        }
    });

    match orchestrator.enhance().await {
        EnhanceOutcome::Succeeded {
            outputs, unpaired, ..
        } => {
            tokio::fs::create_dir_all(&out_dir).await?;
            for i in 0..outputs {
                let file = orchestrator.download(i)?;
                let target = out_dir.join(&file.file_name);
                tokio::fs::write(&target, &file.bytes).await?;
                println!("Wrote {}", target.display());
            }

            let bundle = orchestrator.download_all()?;
            tokio::fs::write(out_dir.join(&bundle.file_name), &bundle.bytes).await?;

            if unpaired > 0 {
                eprintln!("{} image(s) came back without a result", unpaired);
            }
            if let Some(metrics) = orchestrator.snapshot().metrics {
                println!("Metrics: {}", serde_json::to_string_pretty(&metrics)?);
            }
        }
        EnhanceOutcome::Failed { notice, kind, .. } => {
            bail!("{} ({:?})", notice, kind);
        }
        other => bail!("nothing enhanced: {:?}", other),
    }

    Ok(())
}
