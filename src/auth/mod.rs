//! Teacher authorization for observer endpoints.
//!
//! Students connect anonymously; teacher sockets, SSE streams and the
//! teacher-only REST routes require a JWT carrying the configured teacher role.

mod claims;
mod jwt;

use axum::http::{header, HeaderMap};

pub use claims::Claims;
pub use jwt::JwtValidator;

/// Extract a token from the `token` query parameter or an `Authorization: Bearer` header.
/// The query parameter takes precedence.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_from_query() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(Some("my-token"), &headers), Some("my-token".to_string()));
    }

    #[test]
    fn test_extract_token_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());
        assert_eq!(extract_token(None, &headers), Some("header-token".to_string()));
    }

    #[test]
    fn test_extract_token_query_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());
        assert_eq!(
            extract_token(Some("query-token"), &headers),
            Some("query-token".to_string())
        );
    }

    #[test]
    fn test_extract_token_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(None, &headers), None);

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(extract_token(None, &headers), None);
    }
}
