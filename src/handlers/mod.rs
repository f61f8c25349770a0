//! HTTP handlers for generic entity CRUD and RBAC management.

pub mod entity;
pub mod rbac;
