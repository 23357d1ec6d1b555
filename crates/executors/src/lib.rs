use thiserror::Error;

pub mod coding_agent;
pub mod env;
pub mod logs;

pub use coding_agent::{CodingAgentRequest, Executable, ExecutorSpawnContext, SpawnedChild};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid agent command line: {0}")]
    InvalidCommand(String),
    #[error("Agent process has no {0} handle")]
    MissingStdio(&'static str),
}
