// Backend Engine Module
// Capability contract, normalized types and the sqlx-backed handlers

pub mod drivers;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use registry::{HandlerConstructor, HandlerRegistry};
pub use traits::BackendHandler;
pub use types::*;
