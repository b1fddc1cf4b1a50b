//! Extracts the local bearer key from an incoming request. Only
//! `Authorization: Bearer <key>` is recognized (spec.md §6) — unlike the
//! teacher's multi-source `extract_api_key` (`x-api-key` then Bearer, for
//! several provider dialects' own conventions), this proxy has exactly one
//! client-facing auth scheme.

use axum::http::HeaderMap;

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc123"));
    }

    #[test]
    fn rejects_non_bearer_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
