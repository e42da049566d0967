//! AL-010: Local execution transport.

use super::ExecOutput;
use crate::core::error::{AlbumError, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Execute a shell script locally via `bash`, feeding it on stdin.
/// `argv` becomes `$1..$n`; `env_vars` are added to the child environment.
/// Uses bash (not sh/dash) because generated bundles use `set -o pipefail`.
pub fn exec_local(
    script: &str,
    argv: &[String],
    env_vars: &[(String, String)],
    cwd: Option<&Path>,
) -> Result<ExecOutput> {
    let mut cmd = Command::new("bash");
    cmd.arg("-s").arg("--").args(argv);
    for (k, v) in env_vars {
        cmd.env(k, v);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AlbumError::io(Path::new("bash"), e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| AlbumError::io(Path::new("bash"), e))?;
    }
    drop(child.stdin.take());

    let output = child
        .wait_with_output()
        .map_err(|e| AlbumError::io(Path::new("bash"), e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run an external program (git, curl) with arguments.
pub fn exec_command(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<ExecOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| AlbumError::io(Path::new(program), e))?;
    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
