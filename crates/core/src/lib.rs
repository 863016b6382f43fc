// Orchestration layer for the Cactus genome alignment tools

pub mod command;
pub mod error;
pub mod events;
pub mod experiment;
pub mod flowers;
pub mod newick;
pub mod pipeline;
pub mod runner;
pub mod storage;
pub mod types;
pub mod workflow;
pub mod workflow_config;
pub mod xml;

pub use error::{CactusError, CactusResult};
pub use types::*;
