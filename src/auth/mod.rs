//! Role-based access control: store seam, resolver and axum middleware.

pub mod middleware;
pub mod resolver;
pub mod store;

pub use middleware::authorize;
pub use resolver::{Decision, DenyReason, PermissionResolver, PermittedResources};
pub use store::{MemoryPermissionStore, PermissionStore, PgPermissionStore, Resource};
