use std::{collections::HashMap, path::Path, process::Stdio};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{
    ExecutorError,
    env::apply_env,
    logs::{LineSource, LogLine, line_stream},
};

pub struct ExecutorSpawnContext<'a> {
    pub current_dir: &'a Path,
    pub env: Option<&'a HashMap<String, String>>,
}

/// Launch request for the code-generation agent. The agent itself is an
/// opaque executable; `command` is the configured program plus fixed
/// arguments, and the task description is appended as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodingAgentRequest {
    pub command: String,
    pub prompt: String,
}

#[async_trait]
pub trait Executable {
    async fn spawn(&self, ctx: &ExecutorSpawnContext<'_>) -> Result<SpawnedChild, ExecutorError>;
}

#[async_trait]
impl Executable for CodingAgentRequest {
    async fn spawn(&self, ctx: &ExecutorSpawnContext<'_>) -> Result<SpawnedChild, ExecutorError> {
        let parts = shlex::split(&self.command)
            .ok_or_else(|| ExecutorError::InvalidCommand(self.command.clone()))?;
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| ExecutorError::InvalidCommand(self.command.clone()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(&self.prompt)
            .current_dir(ctx.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_env(&mut command, ctx.env);

        // Spawn as a process group so a kill reaches the agent's children.
        let mut child = command.group_spawn()?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or(ExecutorError::MissingStdio("stdout"))?;
        let stderr = child
            .inner()
            .stderr
            .take()
            .ok_or(ExecutorError::MissingStdio("stderr"))?;

        Ok(SpawnedChild {
            child,
            output: Box::pin(futures::stream::select(
                line_stream(stdout, LineSource::Stdout),
                line_stream(stderr, LineSource::Stderr),
            )),
        })
    }
}

/// A running agent process plus the merged stream of its output lines.
pub struct SpawnedChild {
    child: AsyncGroupChild,
    output: futures::stream::BoxStream<'static, LogLine>,
}

impl std::fmt::Debug for SpawnedChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedChild").finish_non_exhaustive()
    }
}

impl SpawnedChild {
    /// The merged stdout/stderr line stream. Lines from one pipe keep
    /// the order they were produced in.
    pub fn output(&mut self) -> &mut (impl Stream<Item = LogLine> + Unpin) {
        &mut self.output
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Kill the whole process group and reap the child.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()?;
        self.child.wait().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn context(dir: &Path) -> ExecutorSpawnContext<'_> {
        ExecutorSpawnContext {
            current_dir: dir,
            env: None,
        }
    }

    #[tokio::test]
    async fn rejects_empty_command_line() {
        let request = CodingAgentRequest {
            command: String::new(),
            prompt: "do things".to_string(),
        };

        let err = request
            .spawn(&context(Path::new(".")))
            .await
            .expect_err("empty command should not spawn");
        assert!(matches!(err, ExecutorError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn streams_output_lines_in_order() {
        // `sh -c` receives the prompt as the script to run.
        let request = CodingAgentRequest {
            command: "sh -c".to_string(),
            prompt: "printf 'one\\ntwo\\nthree\\n'".to_string(),
        };

        let mut child = request.spawn(&context(Path::new("."))).await.unwrap();
        let lines: Vec<_> = child.output().collect().await;
        let status = child.wait().await.unwrap();

        assert!(status.success());
        let messages: Vec<_> = lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn reports_stderr_and_exit_code() {
        let request = CodingAgentRequest {
            command: "sh -c".to_string(),
            prompt: "echo oops 1>&2; exit 3".to_string(),
        };

        let mut child = request.spawn(&context(Path::new("."))).await.unwrap();
        let lines: Vec<_> = child.output().collect().await;
        let status = child.wait().await.unwrap();

        assert_eq!(status.code(), Some(3));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].source, LineSource::Stderr);
        assert_eq!(lines[0].message, "oops");
    }
}
