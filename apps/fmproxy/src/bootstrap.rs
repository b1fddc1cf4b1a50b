use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fmproxy_common::RateLimitConfig;
use fmproxy_core::validation::ValidationLimits;
use fmproxy_core::{
    CredentialBroker, DeploymentRegistry, LocalApiKeyAuthority, ModelPool, ModelRouter, Pipeline, PipelineConfig,
    RateLimitLedger, StreamingDetector, WreqUpstreamClient,
};
use fmproxy_router::RouterState;

use crate::cli::CliArgs;
use crate::models_file;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Bootstrap {
    pub state: Arc<RouterState>,
    pub pool_sweeper: tokio::task::JoinHandle<()>,
}

/// Wires every component named in spec.md §2 into shared state, the way
/// `gproxy_core::bootstrap::bootstrap` assembles `AppState` from its
/// constituent pieces, then runs the one-time streaming-capability probe
/// (spec.md §4.8) for every configured model before accepting traffic.
pub async fn bootstrap(args: &CliArgs) -> Result<Bootstrap> {
    let models = models_file::load(&args.models_file).context("load model table")?;
    let router = Arc::new(ModelRouter::new(models));

    let credentials = Arc::new(CredentialBroker::new(
        args.upstream_auth_url.clone(),
        args.upstream_client_id.clone(),
        args.upstream_client_secret.clone(),
        Duration::from_secs(args.credential_skew_secs),
    ));

    let deployments = Arc::new(DeploymentRegistry::new(
        args.upstream_base_url.clone(),
        Duration::from_secs(args.deployment_cache_ttl_secs),
    ));

    let ledger = Arc::new(RateLimitLedger::new(RateLimitConfig {
        max_retries: args.rate_limit_max_retries,
        base_delay_ms: args.rate_limit_base_delay_ms,
        max_delay_ms: args.rate_limit_max_delay_ms,
        exponential_base: args.rate_limit_exponential_base,
        jitter_factor: args.rate_limit_jitter_factor,
    }));

    let pool = Arc::new(ModelPool::new(Duration::from_secs(args.pool_idle_threshold_secs)));
    let pool_sweeper = fmproxy_core::pool::spawn_sweeper(pool.clone(), Duration::from_secs(args.pool_idle_threshold_secs));

    let streaming = Arc::new(StreamingDetector::new());
    for config in router.list() {
        let dialect = config.dialect();
        let has_direct_key = args.has_direct_api_key(dialect);
        let capability = streaming.probe(&config.name, dialect, config.supports_streaming, has_direct_key);
        if args.streaming_debug {
            tracing::debug!(model = %config.name, ?dialect, ?capability, "probed streaming capability");
        }
    }

    let client = Arc::new(WreqUpstreamClient::new(CONNECT_TIMEOUT, REQUEST_TIMEOUT, STREAM_IDLE_TIMEOUT)?);

    let authority = Arc::new(
        LocalApiKeyAuthority::ensure_initialized(std::path::Path::new(&args.api_key_file))
            .context("initialize local API key")?,
    );

    let pipeline = Arc::new(Pipeline {
        credentials,
        deployments,
        ledger,
        pool,
        router: router.clone(),
        streaming,
        client,
        config: PipelineConfig {
            base_url: args.upstream_base_url.clone(),
            limits: ValidationLimits {
                max_messages_per_request: args.max_messages_per_request,
                max_content_length: args.max_content_length,
            },
        },
    });

    let state = Arc::new(RouterState {
        pipeline,
        router,
        authority,
        max_request_size: args.max_request_size,
    });

    Ok(Bootstrap { state, pool_sweeper })
}
