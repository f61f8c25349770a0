//! Per-request permission resolution: ALLOW, DENY or ERROR.

use crate::auth::store::{PermissionStore, Resource, BROWSER_ROUTE};
use crate::error::AppError;
use serde::Serialize;
use std::sync::Arc;

/// Resources matched for the current request, split by kind. Attached to request extensions on allow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermittedResources {
    pub api_endpoints: Vec<Resource>,
    pub browser_routes: Vec<Resource>,
}

impl PermittedResources {
    pub fn from_resources(resources: Vec<Resource>) -> Self {
        let (browser_routes, api_endpoints) = resources.into_iter().partition(|r| r.resource_type == BROWSER_ROUTE);
        PermittedResources {
            api_endpoints,
            browser_routes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_endpoints.is_empty() && self.browser_routes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    UserNotFound,
    NoRoles,
    NoPermissions,
    NoMatchingResource,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::UserNotFound => "User not found",
            DenyReason::NoRoles | DenyReason::NoMatchingResource => {
                "You don't have permission to access this resource"
            }
            DenyReason::NoPermissions => "No permissions assigned to your roles",
        }
    }
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::UserNotFound => AppError::NotFound(reason.message().into()),
            _ => AppError::Forbidden(reason.message().into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Public resource; no identity involved.
    Public,
    Allow(PermittedResources),
    Deny(DenyReason),
}

#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        PermissionResolver { store }
    }

    /// Decide for `method` on any of `paths`. A missing identity on a non-public resource is
    /// `Unauthorized`; store failures are returned as errors, never as denials.
    pub async fn authorize(&self, identity: Option<&str>, method: &str, paths: &[String]) -> Result<Decision, AppError> {
        if self.store.public_resource_exists(paths, method).await? {
            tracing::debug!(method = %method, paths = ?paths, "public resource");
            return Ok(Decision::Public);
        }
        let identity = identity.ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;
        let Some(external_id) = self.store.find_user(identity).await? else {
            return Ok(Decision::Deny(DenyReason::UserNotFound));
        };
        let role_ids = self.store.role_ids(&external_id).await?;
        if role_ids.is_empty() {
            return Ok(Decision::Deny(DenyReason::NoRoles));
        }
        let permission_ids = self.store.permission_ids(&role_ids).await?;
        if permission_ids.is_empty() {
            return Ok(Decision::Deny(DenyReason::NoPermissions));
        }
        let matched = self.store.resources(&permission_ids, Some((paths, method))).await?;
        if matched.is_empty() {
            return Ok(Decision::Deny(DenyReason::NoMatchingResource));
        }
        tracing::debug!(user = %external_id, method = %method, matched = matched.len(), "authorized");
        Ok(Decision::Allow(PermittedResources::from_resources(matched)))
    }

    /// Every resource reachable by the user, regardless of path. No roles or permissions yields an empty set.
    pub async fn permitted_resources(&self, identity: &str) -> Result<PermittedResources, AppError> {
        let external_id = self
            .store
            .find_user(identity)
            .await?
            .ok_or_else(|| AppError::NotFound(DenyReason::UserNotFound.message().into()))?;
        let role_ids = self.store.role_ids(&external_id).await?;
        if role_ids.is_empty() {
            return Ok(PermittedResources::default());
        }
        let permission_ids = self.store.permission_ids(&role_ids).await?;
        if permission_ids.is_empty() {
            return Ok(PermittedResources::default());
        }
        let resources = self.store.resources(&permission_ids, None).await?;
        Ok(PermittedResources::from_resources(resources))
    }
}
