//! CrudService: generic CRUD over introspected entities.

mod crud;
mod validation;
pub use crud::{normalize_body, CreateContext, CrudService, ListPage};
pub use validation::RequestValidator;
