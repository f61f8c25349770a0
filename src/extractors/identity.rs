//! Extract the authenticated identity set by the upstream auth layer.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated user id. Default: `X-User-Id`.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Optional authenticated identity: an `AuthUser` request extension if present, else the `X-User-Id` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(AuthUser(Some(id))) = parts.extensions.get::<AuthUser>() {
            return Ok(AuthUser(Some(id.clone())));
        }
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(AuthUser(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> AuthUser {
        let (mut parts, _) = req.into_parts();
        AuthUser::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn header_is_trimmed_and_blank_is_none() {
        let req = Request::builder().header(USER_ID_HEADER, " 42 ").body(()).unwrap();
        assert_eq!(extract(req).await, AuthUser(Some("42".into())));
        let req = Request::builder().header(USER_ID_HEADER, "  ").body(()).unwrap();
        assert_eq!(extract(req).await, AuthUser(None));
    }

    #[tokio::test]
    async fn extension_wins_over_header() {
        let mut req = Request::builder().header(USER_ID_HEADER, "42").body(()).unwrap();
        req.extensions_mut().insert(AuthUser(Some("alice".into())));
        assert_eq!(extract(req).await, AuthUser(Some("alice".into())));
    }
}
