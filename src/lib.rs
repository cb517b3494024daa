pub mod error;
pub mod logger;
pub mod variables;
pub mod lookup;
pub mod resources;
pub mod assembly;
pub mod deploy;

pub use error::{Error, Result};
