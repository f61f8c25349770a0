//! Query translation: raw request parameters to a structured plan.

pub mod plan;
pub mod translate;

pub use plan::*;
pub use translate::{translate, CONTROL_KEYS};
