use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("qmd binary unavailable: {0}")]
    MissingSearchEngine(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("another run holds the lock at {0}")]
    RunLocked(String),
    #[error("`qmd {command}` failed\nstdout: {stdout}\nstderr: {stderr}")]
    SearchEngineFailed {
        command: String,
        stdout: String,
        stderr: String,
    },
}
