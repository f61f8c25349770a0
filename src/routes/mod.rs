//! Router builders: common, generic entity and RBAC routes.

pub mod common;
pub mod entity;
pub mod rbac;

pub use common::{common_routes, common_routes_with_ready};
pub use entity::entity_routes;
pub use rbac::rbac_routes;
