//! Persistence layer for the agent.
//!
//! Vehicle state lives in per-drone JSON files so a restarted agent resumes
//! where it stopped.

pub mod state_files;

pub use state_files::StateStore;
