//! Traffic cop: statement dispatch and the engine's global session state.

pub mod engine;
pub mod pquery;
pub mod utility;
