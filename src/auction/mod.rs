// The auction core: the lot model, the error taxonomy, and the engine that
// serializes every state-changing command.

pub mod engine;
pub mod error;
pub mod state;
