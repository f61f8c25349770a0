//! Schema introspection: entity registry and foreign-key associations.

pub mod association;
pub mod entity;
pub mod introspect;

pub use association::{build_associations, resolve_associations, Association, ForeignKey};
pub use entity::{ColumnDef, ColumnType, EntityDefinition, EntityRegistry};
pub use introspect::load_entities;
