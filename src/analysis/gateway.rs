use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;

use crate::sampler::FramePayload;

use super::{
    fallback::{degradation_reason, demo_metrics},
    MetricsFailurePolicy, MetricsOutcome, MetricsResult, OverlayImage, ServiceHealth,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    MetricsJson,
    Overlay,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::MetricsJson => "/analyze_frame_json",
            Endpoint::Overlay => "/analyze_frame",
        }
    }
}

/// Raw request/response exchange with the analysis service. Non-success
/// statuses come back as errors; interpretation is left to the gateway.
pub trait AnalysisTransport: Send + Sync {
    fn post_frame<'a>(
        &'a self,
        endpoint: Endpoint,
        frame: &'a FramePayload,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;

    fn get_health(&self) -> BoxFuture<'_, Result<Vec<u8>>>;
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl AnalysisTransport for HttpTransport {
    fn post_frame<'a>(
        &'a self,
        endpoint: Endpoint,
        frame: &'a FramePayload,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            let url = self.url(endpoint.path());
            let part = Part::bytes(frame.jpeg.clone())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")
                .context("invalid frame mime type")?;
            let form = Form::new().part("file", part);

            let response = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .with_context(|| format!("failed to reach {url}"))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("analysis service returned {status}: {body}");
            }

            let body = response
                .bytes()
                .await
                .context("failed to read analysis response body")?;
            Ok(body.to_vec())
        }
        .boxed()
    }

    fn get_health(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
        async move {
            let url = self.url("/health");
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("failed to reach {url}"))?;
            let status = response.status();
            if !status.is_success() {
                bail!("health check returned {status}");
            }
            Ok(response.bytes().await?.to_vec())
        }
        .boxed()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetricsResponse {
    Wrapped { analysis: MetricsResult },
    Flat(MetricsResult),
}

fn parse_metrics(body: &[u8]) -> Result<MetricsResult> {
    let response: MetricsResponse =
        serde_json::from_slice(body).context("malformed metrics response")?;
    let result = match response {
        MetricsResponse::Wrapped { analysis } => analysis,
        MetricsResponse::Flat(result) => result,
    };
    Ok(result.normalized())
}

/// Applies the fallback policy on top of a transport. Neither fetch ever
/// returns an error to the caller.
pub struct AnalysisGateway {
    transport: Arc<dyn AnalysisTransport>,
    failure_policy: MetricsFailurePolicy,
    request_timeout: Option<Duration>,
}

impl AnalysisGateway {
    pub fn new(
        transport: Arc<dyn AnalysisTransport>,
        failure_policy: MetricsFailurePolicy,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            failure_policy,
            request_timeout,
        }
    }

    pub fn failure_policy(&self) -> MetricsFailurePolicy {
        self.failure_policy
    }

    pub async fn fetch_metrics(&self, frame: &FramePayload) -> MetricsOutcome {
        let parsed = self
            .round_trip(Endpoint::MetricsJson, frame)
            .await
            .and_then(|body| parse_metrics(&body));

        match parsed {
            Ok(result) => MetricsOutcome::Live(result),
            Err(err) => {
                log_warn!("metrics request failed: {err:#}");
                let reason = degradation_reason(&err);
                match self.failure_policy {
                    MetricsFailurePolicy::Fallback => MetricsOutcome::Degraded {
                        result: demo_metrics(),
                        reason,
                    },
                    MetricsFailurePolicy::Surface => MetricsOutcome::Failed {
                        reason: format!("Analysis failed: {err:#}"),
                    },
                }
            }
        }
    }

    /// `None` leaves whatever overlay is already on screen in place.
    pub async fn fetch_overlay(&self, frame: &FramePayload) -> Option<OverlayImage> {
        let body = match self.round_trip(Endpoint::Overlay, frame).await {
            Ok(body) => body,
            Err(err) => {
                log_debug!("overlay request failed: {err:#}");
                return None;
            }
        };

        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&body))
            .await
            .map_err(|err| anyhow!("overlay decode worker join failed: {err}"))
            .and_then(|res| res.context("overlay body is not an image"));

        match decoded {
            Ok(image) => Some(OverlayImage::new(image.to_rgba8())),
            Err(err) => {
                log_warn!("discarding overlay response: {err:#}");
                None
            }
        }
    }

    pub async fn health(&self) -> Result<ServiceHealth> {
        let body = self.transport.get_health().await?;
        serde_json::from_slice(&body).context("malformed health response")
    }

    async fn round_trip(&self, endpoint: Endpoint, frame: &FramePayload) -> Result<Vec<u8>> {
        let call = self.transport.post_frame(endpoint, frame);
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| anyhow!("request timed out after {} ms", limit.as_millis()))?,
            None => call.await,
        }
    }
}
