//! Python code interpreter running in a throwaway docker container.
//!
//! The script is written to a fresh temp directory that is mounted into
//! the container; the container is removed afterwards. Each run gets a
//! named container so a run that times out can be force-removed.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use uuid::Uuid;

use super::{Tool, ToolSpec};

const MOUNT_POINT: &str = "/usr/src/mycode";
const SCRIPT_NAME: &str = "script.py";
const MAX_OUTPUT: usize = 10_000;

pub struct CodeInterpreter {
    image: String,
    docker: String,
    timeout: Duration,
}

impl CodeInterpreter {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            docker: "docker".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Use another container CLI (e.g. `podman`).
    pub fn with_docker_binary(mut self, docker: &str) -> Self {
        self.docker = docker.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn docker_args(&self, dir: &Path, container: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container.to_string(),
            "-v".to_string(),
            format!("{}:{}", dir.display(), MOUNT_POINT),
            "-w".to_string(),
            MOUNT_POINT.to_string(),
            self.image.clone(),
            "python".to_string(),
            SCRIPT_NAME.to_string(),
        ]
    }

    /// Run `code` and return its combined output.
    pub async fn run(&self, code: &str) -> anyhow::Result<String> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join(SCRIPT_NAME), code).await?;

        let container = format!("alfred-py-{}", Uuid::new_v4());
        tracing::info!(
            "Running {} bytes of Python in {} as {}",
            code.len(),
            self.image,
            container
        );

        let output = match tokio::time::timeout(
            self.timeout,
            Command::new(&self.docker)
                .args(self.docker_args(dir.path(), &container))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => anyhow::bail!("Failed to start {}: {}", self.docker, e),
            Err(_) => {
                // Killing the CLI leaves the container itself running.
                self.remove_container(&container).await;
                anyhow::bail!("Code timed out after {} seconds", self.timeout.as_secs())
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            "Interpreter finished: exit={:?}, stdout_len={}, stderr_len={}",
            output.status.code(),
            stdout.len(),
            stderr.len()
        );

        let mut result = stdout.into_owned();
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&stderr);
        }
        if result.is_empty() {
            result = format!("Exit code: {}", output.status.code().unwrap_or(-1));
        }
        Ok(truncate(result, MAX_OUTPUT))
    }

    async fn remove_container(&self, container: &str) {
        let removal = Command::new(&self.docker)
            .args(["rm", "-f", container])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(Duration::from_secs(10), removal).await {
            Ok(Ok(status)) if status.success() => {
                tracing::info!("Removed timed-out container {}", container)
            }
            Ok(Ok(status)) => tracing::warn!("Removing container {} failed: {}", container, status),
            Ok(Err(e)) => tracing::warn!("Removing container {} failed: {}", container, e),
            Err(_) => tracing::warn!("Removing container {} timed out", container),
        }
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... [output truncated]");
    text
}

#[async_trait]
impl Tool for CodeInterpreter {
    fn name(&self) -> &str {
        "code_interpreter"
    }

    fn description(&self) -> &str {
        "Execute Python code and return stdout and stderr. The code runs in isolation and must be complete, including imports. Interpret the output and fix errors yourself; if you cannot, show the code to the user and ask for help. Graphics cannot be returned."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Complete Python program"}
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let code = args["code"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'code' argument"))?;
        // The model is expected to read and fix failures, so they are output.
        match self.run(code).await {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::warn!("Code interpreter failed: {}", e);
                Ok(format!("Error: {}", e))
            }
        }
    }
}

pub struct CodeInterpreterToolSpec {
    interpreter: Arc<CodeInterpreter>,
}

impl CodeInterpreterToolSpec {
    pub fn new(image: &str) -> Self {
        Self {
            interpreter: Arc::new(CodeInterpreter::new(image)),
        }
    }
}

impl ToolSpec for CodeInterpreterToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        vec![self.interpreter.clone() as Arc<dyn Tool>]
    }
}
