use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::upstream_client::UpstreamClient;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),
    #[error("network error contacting authorization endpoint: {0}")]
    Network(String),
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expiry: Instant,
}

impl CachedToken {
    fn remaining(&self) -> Duration {
        self.expiry.saturating_duration_since(Instant::now())
    }
}

/// Obtains and caches a short-lived bearer token for the upstream via the
/// client-credentials OAuth2 flow. A single in-flight refresh coalesces
/// concurrent callers (spec.md §4.1): every caller first takes the fast
/// path (cached read), and only contends on `refresh_lock` when a refresh
/// is actually needed; holding that lock for the whole refresh means a
/// waiter that wakes up re-checks the now-fresh cache instead of starting
/// its own HTTP round trip.
pub struct CredentialBroker {
    auth_url: String,
    client_id: String,
    client_secret: String,
    skew: Duration,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl CredentialBroker {
    pub fn new(auth_url: String, client_id: String, client_secret: String, skew: Duration) -> Self {
        Self {
            auth_url,
            client_id,
            client_secret,
            skew,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn get_token(&self, client: &dyn UpstreamClient) -> Result<String, CredentialError> {
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Re-check: another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }

        let (token, expires_in) = client
            .fetch_token(&self.auth_url, &self.client_id, &self.client_secret)
            .await?;
        let expiry = Instant::now() + Duration::from_secs(expires_in).saturating_sub(self.skew);
        *self.cached.write().await = Some(CachedToken {
            token: token.clone(),
            expiry,
        });
        Ok(token)
    }

    async fn fresh_cached(&self) -> Option<String> {
        let guard = self.cached.read().await;
        let cached = guard.as_ref()?;
        if cached.remaining() > self.skew {
            Some(cached.token.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream_client::{UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingClient {
        calls: Arc<AtomicUsize>,
        expires_in: u64,
    }

    #[async_trait::async_trait]
    impl UpstreamClient for CountingClient {
        async fn fetch_token(
            &self,
            _auth_url: &str,
            _client_id: &str,
            _client_secret: &str,
        ) -> Result<(String, u64), CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(("tok".to_string(), self.expires_in))
        }

        async fn send(&self, _req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamTransportError> {
            unimplemented!("not exercised by this test")
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce_into_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client: Arc<dyn UpstreamClient> = Arc::new(CountingClient {
            calls: calls.clone(),
            expires_in: 3600,
        });
        let broker = Arc::new(CredentialBroker::new(
            "https://auth.example/oauth/token".to_string(),
            "id".to_string(),
            "secret".to_string(),
            Duration::from_secs(60),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                broker.get_token(client.as_ref()).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_token_never_returned_below_skew_buffer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = CountingClient {
            calls: calls.clone(),
            expires_in: 30, // less than the skew buffer below
        };
        let broker = CredentialBroker::new(
            "https://auth.example/oauth/token".to_string(),
            "id".to_string(),
            "secret".to_string(),
            Duration::from_secs(60),
        );
        let token = broker.get_token(&client).await.unwrap();
        assert_eq!(token, "tok");
        // Immediately asking again must refresh again: the cached expiry is
        // already inside the skew window (expires_in < skew).
        broker.get_token(&client).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
