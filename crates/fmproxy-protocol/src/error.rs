use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Validation,
    PayloadTooLarge,
    RateLimit,
    Upstream,
    NotFound,
}

impl ErrorKind {
    pub fn type_tag(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::PayloadTooLarge => "payload_too_large_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::NotFound => "not_found",
        }
    }

    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Authentication => 401,
            ErrorKind::Validation => 400,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::RateLimit => 429,
            ErrorKind::Upstream => 502,
            ErrorKind::NotFound => 404,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.type_tag(),
                code: code.into(),
            },
        }
    }
}
