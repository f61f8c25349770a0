//! Settings: environment, association rules file, validation.

pub mod types;
pub mod loader;
pub mod validator;

pub use types::*;
pub use loader::*;
pub use validator::*;
