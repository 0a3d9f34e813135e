//! External command execution for check and reload hooks.

use thiserror::Error;

/// Spawn failure or non-zero exit from an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot spawn {shell}: {source}")]
    Spawn {
        shell: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with {status}: {output}")]
    Failed {
        status: std::process::ExitStatus,
        output: String,
    },
}

/// Run `cmd` through the platform shell, capturing combined
/// stdout+stderr: `/bin/sh -c` everywhere except Windows' `cmd /C`.
pub async fn run_command(cmd: &str) -> Result<String, CommandError> {
    tracing::debug!(cmd, "running command");

    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");
    #[cfg(not(windows))]
    let (shell, flag) = ("/bin/sh", "-c");

    let output = tokio::process::Command::new(shell)
        .arg(flag)
        .arg(cmd)
        .output()
        .await
        .map_err(|source| CommandError::Spawn { shell, source })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        tracing::debug!(output = %combined.trim_end(), "command succeeded");
        Ok(combined)
    } else {
        tracing::error!(cmd, output = %combined.trim_end(), "command failed");
        Err(CommandError::Failed {
            status: output.status,
            output: combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr_together() {
        let output = run_command("echo out; echo err >&2").await.expect("run");
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_the_output() {
        let err = run_command("echo doomed; exit 3").await.expect_err("exit 3");
        match err {
            CommandError::Failed { status, output } => {
                assert_eq!(status.code(), Some(3));
                assert!(output.contains("doomed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
