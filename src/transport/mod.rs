//! AL-010/011: Transport. Local process execution and URL download.

pub mod download;
pub mod local;

use crate::core::error::{AlbumError, Result};

/// Output from executing a script or command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`AlbumError::Execution`] naming `target`.
    pub fn check(self, target: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(AlbumError::Execution {
                target: target.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}
