use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::debug;

use crate::backends::result::{CommandResult, NO_EXIT_CODE};
use crate::engine::types::ReturnValues;

/// A subprocess invocation of an external tool.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A non-zero exit is a normal `Ok` result with `success == false`. Spawn
/// failures and timeouts are errors: the tool never produced an exit code.
pub async fn run_command(spec: &CommandSpec) -> Result<CommandResult> {
    let mut command = tokio::process::Command::new(&spec.program);
    command.args(&spec.args);

    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }
    for (k, v) in &spec.env {
        command.env(k, v);
    }

    // Own process group, so a timeout can take down the whole tree
    #[cfg(unix)]
    {
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    command
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %spec.program, args = ?spec.args, "Spawning external command");

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => bail!("Failed to start '{}': {}", spec.program, e),
    };

    // Armed until the tool exits on its own; if this future is dropped
    // mid-run (node timeout), the whole group goes with it.
    #[cfg(unix)]
    let mut group = ProcessGroup::new(child.id());

    // wait_with_output drains both pipes while waiting, so a chatty tool
    // cannot block on a full pipe buffer.
    let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => bail!("Failed to run '{}': {}", spec.program, e),
        Err(_) => {
            #[cfg(unix)]
            group.kill_and_reap();
            bail!(
                "'{}' timed out after {}s (process group killed)",
                spec.program,
                spec.timeout.as_secs_f64()
            );
        }
    };

    #[cfg(unix)]
    group.disarm();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(NO_EXIT_CODE);

    if output.status.success() {
        Ok(CommandResult::succeeded(stdout, ReturnValues::new()).with_stderr(stderr))
    } else {
        Ok(CommandResult::failed(exit_code, stderr.trim_end()).with_output(stdout))
    }
}

impl CommandResult {
    /// Keep stderr of a successful run as a reported field; tools often log there.
    fn with_stderr(mut self, stderr: String) -> Self {
        if !stderr.is_empty() {
            self.reported
                .insert("stderr".to_string(), serde_json::Value::String(stderr));
        }
        self
    }
}

/// The process group a spawned tool leads. Killed on drop unless disarmed.
#[cfg(unix)]
struct ProcessGroup {
    pgid: Option<i32>,
}

#[cfg(unix)]
impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.map(|p| p as i32),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    /// SIGKILL the group, then block until the leader is reaped. The leader
    /// was already killed when its wait future was dropped, so this is short.
    fn kill_and_reap(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
                libc::waitpid(pgid, std::ptr::null_mut(), 0);
            }
        }
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid, "Killing process group of abandoned command");
            unsafe { libc::kill(-pgid, libc::SIGKILL) };
        }
    }
}
