//! Request Pipeline (spec.md §4.7): the top-level flow wiring every other
//! component together. `Pipeline::dispatch` is the single entry point the
//! router hands a parsed, not-yet-validated `ChatRequest` to.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fmproxy_protocol::{ChatRequest, ErrorKind, UnifiedResponse};

use crate::credential::CredentialBroker;
use crate::dialect::{self, DialectError};
use crate::deployment::{DeploymentError, DeploymentRegistry};
use crate::ledger::{parse_retry_after, RateLimitLedger};
use crate::model_table::ModelRouter;
use crate::pool::ModelPool;
use crate::streaming::{self, StreamChunk, StreamingCapability, StreamingDetector};
use crate::upstream_client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamHttpRequest};
use crate::validation::{self, ValidationLimits};
use crate::PipelineError;

/// Phrases that indicate a vision-capable model could not process an
/// attached image. Preserved as plain data, not inferred intent, per
/// spec.md §9's explicit instruction to document this as heuristic phrase
/// matching and nothing more.
pub const VISION_FAILURE_PHRASES: &[&str] = &[
    "i cannot see",
    "i can't see",
    "i am unable to view",
    "i'm unable to view",
    "no image was provided",
    "i don't have the ability to view images",
];

pub struct PipelineConfig {
    pub base_url: String,
    pub limits: ValidationLimits,
}

pub enum PipelineOutcome {
    Buffered(UnifiedResponse),
    Streamed {
        chunks: std::pin::Pin<Box<dyn futures_util::Stream<Item = StreamChunk> + Send>>,
    },
}

pub struct Pipeline {
    pub credentials: Arc<CredentialBroker>,
    pub deployments: Arc<DeploymentRegistry>,
    pub ledger: Arc<RateLimitLedger>,
    pub pool: Arc<ModelPool>,
    pub router: Arc<ModelRouter>,
    pub streaming: Arc<StreamingDetector>,
    pub client: Arc<dyn UpstreamClient>,
    pub config: PipelineConfig,
}

impl Pipeline {
    pub async fn dispatch(&self, mut request: ChatRequest) -> Result<PipelineOutcome, PipelineError> {
        validation::sanitize_chat_request(&mut request);

        let model = self
            .router
            .get(&request.model)
            .ok_or_else(|| PipelineError::not_found(format!("unknown model \"{}\"", request.model)))?
            .clone();

        validation::validate_chat_request(&request, Some(&model), &self.config.limits)
            .map_err(|err| PipelineError::validation(err.messages.join("; ")))?;

        let admission = self.ledger.can_retry(&model.name).await;
        if !admission.allowed {
            return Err(PipelineError::rate_limited(admission.seconds_until_retry));
        }

        self.pool.touch(&model.name);

        let has_images = request.messages.iter().any(|m| m.content.has_image_parts());
        let wants_stream = request.is_stream();

        let capability = self.streaming.capability(&model.name);
        // Vision carve-out (spec.md §4.8): none of the three dialects' native
        // streaming transports are treated as reliable for vision inputs, so
        // any image part forces the synthesized path regardless of dialect.
        let use_native_stream = wants_stream && capability != StreamingCapability::None && !has_images;

        let deployment_id = self.resolve_deployment(&model.name).await?;
        let deployment_base = format!(
            "{}/v2/inference/deployments/{deployment_id}",
            self.config.base_url.trim_end_matches('/')
        );

        let dialect = model.dialect();
        let built = dialect::build_request(&deployment_base, &model, &request.messages, use_native_stream);

        let response = self.call_with_retry(&model.name, &built.url, &built.body, use_native_stream).await?;

        if use_native_stream {
            let body = match response.body {
                UpstreamBody::Stream(rx) => rx,
                UpstreamBody::Bytes(_) => {
                    return Err(PipelineError::upstream(response.status, "expected a streamed body"));
                }
            };
            let chunks = streaming::true_stream(body, dialect);
            self.ledger.record_success(&model.name).await;
            return Ok(PipelineOutcome::Streamed { chunks });
        }

        let body_bytes = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(_) => {
                return Err(PipelineError::upstream(response.status, "expected a buffered body"));
            }
        };

        let mut unified = dialect::parse_response(dialect, &body_bytes).map_err(map_dialect_error)?;
        self.ledger.record_success(&model.name).await;
        postprocess(&mut unified, has_images);

        if wants_stream {
            let chunks = streaming::synthesize_stream(unified.text, unified.usage, streaming::SYNTHESIZED_CHUNK_CHARS);
            Ok(PipelineOutcome::Streamed { chunks })
        } else {
            Ok(PipelineOutcome::Buffered(unified))
        }
    }

    async fn resolve_deployment(&self, model_name: &str) -> Result<String, PipelineError> {
        self.deployments
            .resolve(model_name, &self.credentials, self.client.as_ref())
            .await
            .map_err(map_deployment_error)
    }

    /// Sends the dialect request, retrying on 429 under the ledger's
    /// admission control, until success, a non-retryable upstream error, or
    /// the retry budget is exhausted (spec.md §4.7 step 5).
    async fn call_with_retry(
        &self,
        model_name: &str,
        url: &str,
        body: &serde_json::Value,
        is_stream: bool,
    ) -> Result<crate::upstream_client::UpstreamHttpResponse, PipelineError> {
        loop {
            let token = self
                .credentials
                .get_token(self.client.as_ref())
                .await
                .map_err(|err| PipelineError::authentication("upstream_auth_failed", err.to_string()))?;

            let request = UpstreamHttpRequest {
                method: HttpMethod::Post,
                url: url.to_string(),
                headers: vec![
                    ("Authorization".to_string(), format!("Bearer {token}")),
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("AI-Resource-Group".to_string(), "default".to_string()),
                ],
                body: Some(Bytes::from(serde_json::to_vec(body).unwrap_or_default())),
                is_stream,
            };

            let response = self
                .client
                .send(request)
                .await
                .map_err(|err| PipelineError::upstream(502, err.to_string()))?;

            if (200..300).contains(&response.status) {
                return Ok(response);
            }

            if response.status == 429 {
                let retry_after = response.header("retry-after").and_then(parse_retry_after);
                match self.ledger.record_rate_limited(model_name, retry_after).await {
                    Some(delay) => {
                        self.ledger.mark_recovering(model_name).await;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        let seconds = retry_after.map(|d| d.as_secs()).unwrap_or(0);
                        return Err(PipelineError::rate_limited(seconds));
                    }
                }
            }

            let body_text = match response.body {
                UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                UpstreamBody::Stream(_) => "<streamed error body>".to_string(),
            };
            return Err(PipelineError::upstream(response.status, body_text));
        }
    }
}

/// Enforces the post-processing invariants from spec.md §4.7 step 6:
/// non-empty text, non-negative (clamped) usage, and vision-failure
/// detection. Vision-failure detection only flips a flag on the response —
/// it's surfaced to the caller via the returned `success` marker remaining
/// `true` and the text unchanged; the *decision* to fall back to another
/// model belongs to the request layer, not this pipeline.
fn postprocess(response: &mut UnifiedResponse, has_images: bool) {
    response.clamp_usage();
    if has_images && is_vision_failure(&response.text) {
        response.success = false;
    }
}

fn is_vision_failure(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    VISION_FAILURE_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

fn map_dialect_error(err: DialectError) -> PipelineError {
    PipelineError::new(ErrorKind::Upstream, "dialect_parse_error", err.to_string())
}

fn map_deployment_error(err: DeploymentError) -> PipelineError {
    match err {
        DeploymentError::NotDeployed(model) => PipelineError::not_found(format!("model {model} has no running deployment")),
        DeploymentError::NotRunning(model) => PipelineError::not_found(format!("model {model} deployment is not running")),
        DeploymentError::DiscoveryFailed(detail) => PipelineError::upstream(502, detail),
    }
}

/// Re-exported so bootstrap code can construct a probe loop at startup
/// without importing `std::time::Duration` separately.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(3600);
