//! Resolution and orchestration core: cache lookup, reference matching,
//! upstream thinking, prompt composition and backend dispatch.

pub mod analysis;
pub mod backends;
pub mod config;
pub mod dispatch;
mod engine;
pub mod error;
pub mod matcher;
pub mod prompt;
pub mod selector;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::EngineConfig;
pub use engine::{
    AvatarEngine, BackendCheck, BackendOutcome, GenerationResult, ResolveOutcome, Timings,
};
pub use error::ResolveError;
