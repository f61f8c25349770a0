//! Axum middleware gating a router behind the permission resolver.

use crate::auth::resolver::Decision;
use crate::error::AppError;
use crate::extractors::AuthUser;
use crate::state::AppState;
use axum::{
    extract::{MatchedPath, OriginalUri, Request, State},
    middleware::Next,
    response::Response,
};

/// Path candidates for resource matching: the concrete request path, then the route template.
pub fn path_candidates(uri_path: &str, matched: Option<&str>) -> Vec<String> {
    let mut paths = vec![uri_path.to_string()];
    if let Some(template) = matched {
        if template != uri_path {
            paths.push(template.to_string());
        }
    }
    paths
}

/// Use with `middleware::from_fn_with_state`. On allow, the matched resources are inserted
/// into the request extensions as `PermittedResources`.
pub async fn authorize(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    OriginalUri(uri): OriginalUri,
    matched: Option<MatchedPath>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let method = req.method().as_str().to_uppercase();
    let paths = path_candidates(uri.path(), matched.as_ref().map(MatchedPath::as_str));
    match state.permissions.authorize(identity.as_deref(), &method, &paths).await? {
        Decision::Public => {}
        Decision::Allow(found) => {
            req.extensions_mut().insert(found);
        }
        Decision::Deny(reason) => {
            tracing::info!(method = %method, path = %uri.path(), reason = ?reason, "access denied");
            return Err(reason.into());
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_added_when_it_differs() {
        assert_eq!(
            path_candidates("/api/v2/roles/3", Some("/api/v2/roles/:id")),
            vec!["/api/v2/roles/3", "/api/v2/roles/:id"]
        );
        assert_eq!(path_candidates("/api/v2/roles", Some("/api/v2/roles")), vec!["/api/v2/roles"]);
        assert_eq!(path_candidates("/x", None), vec!["/x"]);
    }
}
