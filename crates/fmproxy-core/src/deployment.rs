use std::collections::HashMap;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tokio::time::Instant;

use crate::credential::CredentialBroker;
use crate::upstream_client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamHttpRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    Running,
    Pending,
    Stopped,
    Other(String),
}

impl DeploymentStatus {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "RUNNING" => DeploymentStatus::Running,
            "PENDING" => DeploymentStatus::Pending,
            "STOPPED" => DeploymentStatus::Stopped,
            other => DeploymentStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub deployment_id: String,
    pub model_name: String,
    pub status: DeploymentStatus,
    pub consumption_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("model {0} has no running deployment")]
    NotDeployed(String),
    #[error("model {0} deployment is not running")]
    NotRunning(String),
    #[error("deployment discovery failed: {0}")]
    DiscoveryFailed(String),
}

struct CacheEntry {
    by_model: HashMap<String, Deployment>,
    fetched_at: Instant,
}

/// Known nested attribute paths probed, in order, against each catalog entry
/// to recover its model name — the target encodes the source's duck-typed
/// `any` shapes as an explicit, ordered probe list (spec.md §9).
const MODEL_NAME_ATTRIBUTE_PATHS: &[&[&str]] = &[
    &["details", "resources", "backend_details", "model", "name"],
    &["details", "resources", "artifact_name"],
    &["details", "resources", "model", "name"],
    &["name"],
];

/// Resolves a model name to an upstream deployment id: environment override
/// first, then an in-memory TTL cache refreshed from the upstream catalog
/// (spec.md §4.2).
pub struct DeploymentRegistry {
    base_url: String,
    cache: ArcSwap<Option<CacheEntry>>,
    refresh_lock: tokio::sync::Mutex<()>,
    ttl: Duration,
}

impl DeploymentRegistry {
    pub fn new(base_url: String, ttl: Duration) -> Self {
        Self {
            base_url,
            cache: ArcSwap::from_pointee(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            ttl,
        }
    }

    /// Derives the environment variable name consulted for a model's
    /// deployment-id override: uppercase, non-alphanumerics become `_`,
    /// runs of `_` collapse, edges are trimmed, suffix `_DEPLOYMENT_ID`.
    pub fn env_override_var(model_name: &str) -> String {
        let mut out = String::with_capacity(model_name.len() + 16);
        let mut last_was_underscore = false;
        for c in model_name.chars() {
            let mapped = if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            };
            if mapped == '_' {
                if last_was_underscore {
                    continue;
                }
                last_was_underscore = true;
            } else {
                last_was_underscore = false;
            }
            out.push(mapped);
        }
        let trimmed = out.trim_matches('_');
        format!("{trimmed}_DEPLOYMENT_ID")
    }

    pub async fn resolve(
        &self,
        model_name: &str,
        credentials: &CredentialBroker,
        client: &dyn UpstreamClient,
    ) -> Result<String, DeploymentError> {
        let env_var = Self::env_override_var(model_name);
        if let Ok(value) = std::env::var(&env_var) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }

        if let Some(deployment) = self.cached_running(model_name) {
            return Ok(deployment.deployment_id);
        }

        self.refresh(credentials, client).await?;

        match self.cached_running(model_name) {
            Some(deployment) => Ok(deployment.deployment_id),
            None => match self.cached_any(model_name) {
                Some(deployment) => Err(DeploymentError::NotRunning(deployment.model_name)),
                None => Err(DeploymentError::NotDeployed(model_name.to_string())),
            },
        }
    }

    fn cached_running(&self, model_name: &str) -> Option<Deployment> {
        let guard = self.cache.load();
        let entry = guard.as_ref().as_ref()?;
        if entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        let deployment = entry.by_model.get(model_name)?;
        if deployment.status == DeploymentStatus::Running {
            Some(deployment.clone())
        } else {
            None
        }
    }

    /// Looks the model up regardless of status — `by_model` caches every
    /// discovered deployment, not just `RUNNING` ones, so this can surface a
    /// `STOPPED`/`PENDING` deployment for the `NotRunning` distinction in
    /// `resolve`.
    fn cached_any(&self, model_name: &str) -> Option<Deployment> {
        let guard = self.cache.load();
        let entry = guard.as_ref().as_ref()?;
        entry.by_model.get(model_name).cloned()
    }

    async fn refresh(
        &self,
        credentials: &CredentialBroker,
        client: &dyn UpstreamClient,
    ) -> Result<(), DeploymentError> {
        let _guard = self.refresh_lock.lock().await;
        // Another refresh may have already landed while we waited for the lock.
        if let Some(entry) = self.cache.load().as_ref() {
            if entry.fetched_at.elapsed() <= self.ttl {
                return Ok(());
            }
        }

        let token = credentials
            .get_token(client)
            .await
            .map_err(|err| DeploymentError::DiscoveryFailed(err.to_string()))?;

        let url = format!(
            "{}/v2/lm/deployments?scenarioId=foundation-models",
            self.base_url.trim_end_matches('/')
        );
        let response = client
            .send(UpstreamHttpRequest {
                method: HttpMethod::Get,
                url,
                headers: vec![
                    ("Authorization".to_string(), format!("Bearer {token}")),
                    ("AI-Resource-Group".to_string(), "default".to_string()),
                ],
                body: None,
                is_stream: false,
            })
            .await
            .map_err(|err| DeploymentError::DiscoveryFailed(err.to_string()))?;

        let body = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(_) => {
                return Err(DeploymentError::DiscoveryFailed(
                    "catalog endpoint returned a stream".to_string(),
                ));
            }
        };
        if !(200..300).contains(&response.status) {
            return Err(DeploymentError::DiscoveryFailed(format!(
                "status {}",
                response.status
            )));
        }

        let parsed: CatalogResponse = serde_json::from_slice(&body)
            .map_err(|err| DeploymentError::DiscoveryFailed(err.to_string()))?;

        let mut by_model = HashMap::new();
        for resource in parsed.resources {
            let Some(model_name) = probe_model_name(&resource.raw) else {
                continue;
            };
            let status = DeploymentStatus::parse(&resource.status);
            by_model.insert(
                model_name.clone(),
                Deployment {
                    deployment_id: resource.id,
                    model_name,
                    status,
                    consumption_url: resource.deployment_url.unwrap_or_default(),
                },
            );
        }

        self.cache.store(std::sync::Arc::new(Some(CacheEntry {
            by_model,
            fetched_at: Instant::now(),
        })));
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    resources: Vec<CatalogResource>,
}

#[derive(Debug, Deserialize)]
struct CatalogResource {
    id: String,
    status: String,
    #[serde(rename = "deploymentUrl")]
    deployment_url: Option<String>,
    #[serde(flatten)]
    raw: serde_json::Value,
}

fn probe_model_name(entry: &serde_json::Value) -> Option<String> {
    for path in MODEL_NAME_ATTRIBUTE_PATHS {
        let mut cursor = entry;
        let mut ok = true;
        for segment in *path {
            match cursor.get(segment) {
                Some(next) => cursor = next,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok && let Some(name) = cursor.as_str() {
            return Some(name.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_var_uppercases_and_collapses_separators() {
        assert_eq!(
            DeploymentRegistry::env_override_var("gpt-5-nano"),
            "GPT_5_NANO_DEPLOYMENT_ID"
        );
    }

    #[test]
    fn env_override_var_collapses_runs_and_trims_edges() {
        assert_eq!(
            DeploymentRegistry::env_override_var("--claude--3.5--sonnet--"),
            "CLAUDE_3_5_SONNET_DEPLOYMENT_ID"
        );
    }

    #[test]
    fn probes_known_attribute_paths_in_order() {
        let entry = serde_json::json!({
            "details": {"resources": {"backend_details": {"model": {"name": "gpt-5-nano"}}}}
        });
        assert_eq!(probe_model_name(&entry).as_deref(), Some("gpt-5-nano"));

        let fallback = serde_json::json!({"name": "direct-name"});
        assert_eq!(probe_model_name(&fallback).as_deref(), Some("direct-name"));
    }

    struct FakeClient {
        catalog: bytes::Bytes,
    }

    #[async_trait::async_trait]
    impl UpstreamClient for FakeClient {
        async fn fetch_token(
            &self,
            _auth_url: &str,
            _client_id: &str,
            _client_secret: &str,
        ) -> Result<(String, u64), crate::credential::CredentialError> {
            Ok(("tok".to_string(), 3600))
        }

        async fn send(
            &self,
            _req: UpstreamHttpRequest,
        ) -> Result<crate::upstream_client::UpstreamHttpResponse, crate::upstream_client::UpstreamTransportError> {
            Ok(crate::upstream_client::UpstreamHttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: UpstreamBody::Bytes(self.catalog.clone()),
            })
        }
    }

    #[tokio::test]
    async fn a_stopped_deployment_yields_not_running_not_not_deployed() {
        let catalog = serde_json::json!({
            "resources": [
                {"id": "dep-1", "status": "STOPPED", "name": "claude-3-5-sonnet"},
            ]
        });
        let client = FakeClient {
            catalog: bytes::Bytes::from(serde_json::to_vec(&catalog).unwrap()),
        };
        let credentials = CredentialBroker::new(
            "https://auth.example/oauth/token".to_string(),
            "id".to_string(),
            "secret".to_string(),
            Duration::from_secs(60),
        );
        let registry = DeploymentRegistry::new("https://upstream.example".to_string(), Duration::from_secs(300));

        let err = registry
            .resolve("claude-3-5-sonnet", &credentials, &client)
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::NotRunning(model) if model == "claude-3-5-sonnet"));
    }

    #[tokio::test]
    async fn a_model_absent_from_the_catalog_yields_not_deployed() {
        let catalog = serde_json::json!({"resources": []});
        let client = FakeClient {
            catalog: bytes::Bytes::from(serde_json::to_vec(&catalog).unwrap()),
        };
        let credentials = CredentialBroker::new(
            "https://auth.example/oauth/token".to_string(),
            "id".to_string(),
            "secret".to_string(),
            Duration::from_secs(60),
        );
        let registry = DeploymentRegistry::new("https://upstream.example".to_string(), Duration::from_secs(300));

        let err = registry
            .resolve("gpt-5-nano", &credentials, &client)
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::NotDeployed(model) if model == "gpt-5-nano"));
    }
}
