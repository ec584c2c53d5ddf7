use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use std::future::Future;

use crate::config::EnhanceConfig;
use crate::error::{EnhanceError, Result};
use crate::types::{InputImage, Metrics};

/// Response header a backend may use to report real quality metrics.
pub const METRICS_HEADER: &str = "x-enhance-metrics";

/// What a successful submission hands back.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Opaque archive with one entry per enhanced image.
    pub archive: Bytes,
    /// Metrics reported by the backend, if it sent any.
    pub reported_metrics: Option<Metrics>,
}

impl TransportResponse {
    pub fn new(archive: impl Into<Bytes>) -> Self {
        Self {
            archive: archive.into(),
            reported_metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.reported_metrics = Some(metrics);
        self
    }
}

/// Sends a whole batch to an enhancement service in one exchange.
///
/// Implementations must not retry, split the batch, or report partial
/// success: any failure fails the batch as a whole.
pub trait EnhanceTransport: Send + Sync {
    fn submit(
        &self,
        inputs: &[InputImage],
    ) -> impl Future<Output = Result<TransportResponse>> + Send;
}

fn normalize(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

/// [`EnhanceTransport`] that POSTs a multipart form to an HTTP endpoint.
///
/// # Example
/// ```no_run
/// use enhance_client::{EnhanceConfig, HttpTransport};
///
/// # fn example() -> enhance_client::Result<()> {
/// let config = EnhanceConfig::builder()
///     .with_endpoint("http://127.0.0.1:8000")
///     .build();
/// let transport = HttpTransport::new(&config)?;
/// assert_eq!(transport.url(), "http://127.0.0.1:8000/enhance-image/");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    url: Url,
    field_name: String,
}

impl HttpTransport {
    /// Build a transport from config. Fails if no valid endpoint is set.
    pub fn new(config: &EnhanceConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(normalize)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                EnhanceError::Configuration("no enhancement endpoint configured".into())
            })?;

        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };

        let url = Url::parse(&format!("{}{}", endpoint, path)).map_err(|e| {
            EnhanceError::Configuration(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;

        if config.field_name.is_empty() {
            return Err(EnhanceError::Configuration(
                "multipart field name must not be empty".into(),
            ));
        }

        Ok(Self {
            http: Client::new(),
            url,
            field_name: config.field_name.clone(),
        })
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Full URL requests are sent to.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    fn build_form(&self, inputs: &[InputImage]) -> Result<Form> {
        let mut form = Form::new();
        for input in inputs {
            let part = Part::bytes(input.content().to_vec())
                .file_name(input.name().to_string())
                .mime_str(input.media_type())
                .map_err(|_| EnhanceError::InvalidMediaType {
                    name: input.name().to_string(),
                    media_type: input.media_type().to_string(),
                })?;
            form = form.part(self.field_name.clone(), part);
        }
        Ok(form)
    }
}

fn decode_metrics(text: &str) -> Result<Metrics> {
    Ok(serde_json::from_str(text)?)
}

fn parse_reported_metrics(headers: &reqwest::header::HeaderMap) -> Option<Metrics> {
    let raw = headers.get(METRICS_HEADER)?;
    let text = match raw.to_str() {
        Ok(t) => t,
        Err(_) => {
            tracing::warn!("Ignoring non-ASCII {} header", METRICS_HEADER);
            return None;
        }
    };
    match decode_metrics(text) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed {} header", METRICS_HEADER);
            None
        }
    }
}

impl EnhanceTransport for HttpTransport {
    async fn submit(&self, inputs: &[InputImage]) -> Result<TransportResponse> {
        if inputs.is_empty() {
            return Err(EnhanceError::NoInput);
        }

        let form = self.build_form(inputs)?;
        tracing::debug!(url = %self.url, inputs = inputs.len(), "Submitting enhancement request");

        let resp = self
            .http
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| EnhanceError::Network {
                context: format!(
                    "Cannot reach enhancement service at {} (is it running?)",
                    self.url
                ),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(EnhanceError::Http { status, body });
        }

        let reported_metrics = parse_reported_metrics(resp.headers());

        let archive = resp.bytes().await.map_err(|e| EnhanceError::Network {
            context: "Failed to read enhancement response body".into(),
            source: e,
        })?;

        Ok(TransportResponse {
            archive,
            reported_metrics,
        })
    }
}
