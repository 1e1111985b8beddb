use thiserror::Error;
use tool_sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("workspace root is unusable: {0}")]
    Workspace(#[from] SandboxError),
}
