//! CP-010: Hook provisioner: delegate each resource to an external command.
//!
//! The command runs under `sh -c` once per resource. It receives the bound
//! resource as JSON on stdin, plus `CLOUDPLAN_STACK`, `CLOUDPLAN_LOGICAL_ID`
//! and `CLOUDPLAN_KIND` in its environment. A zero exit with a JSON object
//! (or nothing) on stdout reports the resource's attributes.

use super::{BoundResource, Provisioner};
use crate::core::types::Attributes;
use std::io::Write;
use std::process::{Command, Stdio};

/// Output from running the hook.
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
}

/// Run `command` under `sh -c`, writing `input` to its stdin.
pub fn exec_hook(command: &str, input: &str, env: &[(&str, &str)]) -> Result<ExecOutput, String> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn sh: {}", e))?;

    // Stdin is fed while stdout and stderr are drained.
    let stdin = child.stdin.take();
    let (written, output) = std::thread::scope(|scope| {
        let writer = scope.spawn(move || match stdin {
            Some(mut stdin) => match stdin.write_all(input.as_bytes()) {
                // A hook may exit without reading stdin.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            },
            None => Ok(()),
        });
        let output = child.wait_with_output();
        (writer.join(), output)
    });

    let output = output.map_err(|e| format!("wait error: {}", e))?;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("stdin write error: {}", e)),
        Err(_) => return Err("stdin writer panicked".to_string()),
    }

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Parse hook stdout into attributes. Empty output means no attributes.
pub fn parse_attributes(stdout: &str) -> Result<Attributes, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Attributes::new());
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(obj)) => Ok(obj.into_iter().collect()),
        Ok(other) => Err(format!("hook output must be a JSON object, got {}", other)),
        Err(e) => Err(format!("hook output is not JSON: {}", e)),
    }
}

/// Provisioner that runs an external command per resource.
#[derive(Debug, Clone)]
pub struct ExecProvisioner {
    command: String,
}

impl ExecProvisioner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Provisioner for ExecProvisioner {
    fn name(&self) -> &str {
        "exec"
    }

    fn provision(&mut self, resource: &BoundResource) -> Result<Attributes, String> {
        let input =
            serde_json::to_string(resource).map_err(|e| format!("JSON serialize error: {}", e))?;
        let env = [
            ("CLOUDPLAN_STACK", resource.stack.as_str()),
            ("CLOUDPLAN_LOGICAL_ID", resource.logical_id.as_str()),
            ("CLOUDPLAN_KIND", resource.kind.as_str()),
        ];

        tracing::debug!(logical_id = %resource.logical_id, command = %self.command, "running hook");
        let out = exec_hook(&self.command, &input, &env)?;
        if !out.success() {
            let detail = out.stderr.trim();
            return Err(if detail.is_empty() {
                format!("hook exited with code {}", out.exit_code)
            } else {
                format!("hook exited with code {}: {}", out.exit_code, detail)
            });
        }
        parse_attributes(&out.stdout)
    }
}
