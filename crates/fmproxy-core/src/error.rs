use bytes::Bytes;
use fmproxy_common::redact_secrets;
use fmproxy_protocol::{ErrorBody, ErrorKind};

/// The one error type the request pipeline can fail with, at every stage
/// from authentication through upstream dispatch. Mirrors the shape of
/// `gproxy_core::error::ProxyError` (status + body) but keeps the kind tag
/// so the HTTP edge can also set headers (e.g. `Retry-After`).
#[derive(Debug)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: redact_secrets(&message.into()),
            retry_after_secs: None,
        }
    }

    pub fn authentication(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, code, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "invalid_request", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, "payload_too_large", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "model_not_found", message)
    }

    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Upstream,
            "upstream_error",
            format!("upstream responded with status {status}: {}", body.into()),
        )
    }

    pub fn rate_limited(seconds_until_retry: u64) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimit,
            "rate_limit_exceeded",
            format!("model is rate limited, retry in {seconds_until_retry}s"),
        );
        err.retry_after_secs = Some(seconds_until_retry);
        err
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn body(&self) -> Bytes {
        let mut body = ErrorBody::new(self.kind, self.code.clone(), self.message.clone());
        if let Some(secs) = self.retry_after_secs {
            body.error.message = format!("{} (seconds_until_retry={secs})", body.error.message);
        }
        Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PipelineError {}
