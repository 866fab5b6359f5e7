//! ============================================================================
//! SOLVER-CORE: Faces game auto-solver
//! ============================================================================
//! This crate handles all backend logic for the faces solver:
//! - Content-addressed label cache (JSON snapshot + redb fast store)
//! - Bootstrap discovery of the question id sequence
//! - Concurrent picture precaching
//! - Session orchestration, answer selection and learning
//! ============================================================================

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod digest;
pub mod orchestrator;
pub mod precache;
pub mod retry;
pub mod runlog;
pub mod selector;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use types::*;
pub use api::{Credentials, GameApi, HttpGameApi};
pub use cache::{LabelCache, LabelRecord, LabelStorage};
pub use config::SolverConfig;
pub use digest::ImageDigest;
pub use orchestrator::{Orchestrator, SessionPhase};
pub use retry::RetryConfig;
pub use selector::{select_answer, Selection};
