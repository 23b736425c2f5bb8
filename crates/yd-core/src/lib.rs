pub mod error;
pub mod model;
pub mod types;

pub use error::YaadeError;
pub use model::*;
pub use types::*;
