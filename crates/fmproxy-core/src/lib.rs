//! The request-processing core: credential lifecycle, deployment
//! resolution, dialect translation, rate-limit coordination, streaming
//! adaptation, local authentication, and the pipeline tying them together.
//! Mirrors the role `gproxy-core` (plus the scope of `gproxy-provider-core`/
//! `gproxy-provider-impl`/`gproxy-transform` this proxy actually needs) plays
//! in the teacher workspace.

pub mod credential;
pub mod dialect;
pub mod deployment;
pub mod error;
pub mod ledger;
pub mod local_auth;
pub mod model_table;
pub mod pipeline;
pub mod pool;
pub mod streaming;
pub mod upstream_client;
pub mod validation;

pub use credential::{CredentialBroker, CredentialError};
pub use deployment::{Deployment, DeploymentError, DeploymentRegistry, DeploymentStatus};
pub use error::PipelineError;
pub use ledger::{RateLimitLedger, RateState};
pub use local_auth::{LocalApiKeyAuthority, LocalAuthError};
pub use model_table::{Dialect, ModelConfig, ModelRouter};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome};
pub use pool::ModelPool;
pub use streaming::{StreamChunk, StreamingCapability, StreamingDetector};
pub use upstream_client::{UpstreamClient, WreqUpstreamClient};
