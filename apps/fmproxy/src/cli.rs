use clap::Parser;

/// Process configuration, resolved CLI-over-ENV per field (clap's `env`
/// feature). Mirrors the shape of `gproxy_core::bootstrap::CliArgs`, scoped
/// to what this proxy's upstream contracts and ambient limits need
/// (spec.md §6).
#[derive(Debug, Clone, Parser)]
#[command(name = "fmproxy", version, about = "OpenAI-compatible reverse proxy for a multi-dialect model upstream")]
pub struct CliArgs {
    /// Bind host.
    #[arg(long, env = "FMPROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "FMPROXY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// OAuth2 client-credentials token endpoint.
    #[arg(long, env = "UPSTREAM_AUTH_URL")]
    pub upstream_auth_url: String,

    #[arg(long, env = "UPSTREAM_CLIENT_ID")]
    pub upstream_client_id: String,

    #[arg(long, env = "UPSTREAM_CLIENT_SECRET")]
    pub upstream_client_secret: String,

    /// Base URL the deployment catalog and inference endpoints hang off of.
    #[arg(long, env = "UPSTREAM_BASE_URL")]
    pub upstream_base_url: String,

    /// JSON file listing the known models (name, deployment_id, dialect, …).
    #[arg(long, env = "FMPROXY_MODELS_FILE")]
    pub models_file: String,

    /// Where the generated/loaded local bearer key is persisted.
    #[arg(long, env = "FMPROXY_API_KEY_FILE", default_value = "./fmproxy_api_key.env")]
    pub api_key_file: String,

    #[arg(long, env = "MAX_MESSAGES_PER_REQUEST", default_value_t = 200)]
    pub max_messages_per_request: usize,

    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value_t = 200_000)]
    pub max_content_length: usize,

    #[arg(long, env = "MAX_REQUEST_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_request_size: usize,

    #[arg(long, env = "RATE_LIMIT_MAX_RETRIES", default_value_t = 3)]
    pub rate_limit_max_retries: u32,

    #[arg(long, env = "RATE_LIMIT_BASE_DELAY_MS", default_value_t = 1_000)]
    pub rate_limit_base_delay_ms: u64,

    #[arg(long, env = "RATE_LIMIT_MAX_DELAY_MS", default_value_t = 60_000)]
    pub rate_limit_max_delay_ms: u64,

    #[arg(long, env = "RATE_LIMIT_EXPONENTIAL_BASE", default_value_t = 2.0)]
    pub rate_limit_exponential_base: f64,

    #[arg(long, env = "RATE_LIMIT_JITTER_FACTOR", default_value_t = 0.2)]
    pub rate_limit_jitter_factor: f64,

    #[arg(long, env = "POOL_IDLE_THRESHOLD_SECS", default_value_t = 600)]
    pub pool_idle_threshold_secs: u64,

    #[arg(long, env = "DEPLOYMENT_CACHE_TTL_SECS", default_value_t = 300)]
    pub deployment_cache_ttl_secs: u64,

    #[arg(long, env = "CREDENTIAL_SKEW_SECS", default_value_t = 60)]
    pub credential_skew_secs: u64,

    /// Verbose logging of streaming-capability detection decisions.
    #[arg(long, env = "STREAMING_DEBUG", default_value_t = false)]
    pub streaming_debug: bool,

    /// Presence enables native streaming probes for the Anthropic dialect.
    #[arg(long, env = "ANTHROPIC_DIRECT_API_KEY")]
    pub anthropic_direct_api_key: Option<String>,

    /// Presence enables native streaming probes for the Gemini dialect.
    #[arg(long, env = "GEMINI_DIRECT_API_KEY")]
    pub gemini_direct_api_key: Option<String>,

    /// Presence enables native streaming probes for the OpenAI dialect.
    #[arg(long, env = "OPENAI_DIRECT_API_KEY")]
    pub openai_direct_api_key: Option<String>,
}

impl CliArgs {
    pub fn has_direct_api_key(&self, dialect: fmproxy_core::Dialect) -> bool {
        match dialect {
            fmproxy_core::Dialect::Openai => self.openai_direct_api_key.is_some(),
            fmproxy_core::Dialect::Anthropic => self.anthropic_direct_api_key.is_some(),
            fmproxy_core::Dialect::Gemini => self.gemini_direct_api_key.is_some(),
        }
    }
}
