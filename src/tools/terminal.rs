//! Script execution tool: runs a sandboxed script under a hard deadline.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::{ParamKind, Sandbox, Tool, ToolArguments, ToolDescriptor, ToolError, ToolParameter, ToolResult};
use crate::config::ToolSettings;

/// How long to keep draining pipes after the child was killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What happened to one script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was killed or died from a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Run a script from the sandbox with the configured interpreter.
pub struct RunScript {
    sandbox: Sandbox,
    interpreter: String,
    timeout: Duration,
    max_output_chars: usize,
    descriptor: ToolDescriptor,
}

impl RunScript {
    pub fn new(sandbox: Sandbox, settings: &ToolSettings) -> Self {
        let descriptor = ToolDescriptor::new(
            "run_script",
            "Execute a script previously saved with write_file and return its standard output. \
             Runs inside the sandbox directory with a hard time limit.",
        )
        .with_parameter(ToolParameter::required(
            "filename",
            ParamKind::String,
            "Plain file name of the script, e.g. 'script.py'",
        ));

        Self {
            sandbox,
            interpreter: settings.script_interpreter.clone(),
            timeout: settings.script_timeout,
            max_output_chars: settings.max_output_chars,
            descriptor,
        }
    }

    /// Resolve `filename` in the sandbox and execute it.
    pub async fn run(&self, filename: &str) -> ToolResult {
        let path = match self.sandbox.resolve(filename) {
            Ok(path) => path,
            Err(e) => return e.into(),
        };
        let shown = path.display().to_string();

        if !path.is_file() {
            return ToolError::ScriptNotFound(shown).into();
        }

        tracing::info!("Running {} {}", self.interpreter, shown);

        let outcome = match self.execute(&path).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::warn!("Could not start {}: {}", shown, reason);
                return ToolError::Spawn { path: shown, reason }.into();
            }
        };

        self.outcome_to_result(&shown, outcome)
    }

    /// Spawn the interpreter on `path` and wait for it, at most until the deadline.
    pub async fn execute(&self, path: &Path) -> Result<ScriptExecutionOutcome, String> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(path)
            .current_dir(self.sandbox.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn '{}': {}", self.interpreter, e))?;

        // `Child::id` is gone once the child has been reaped, so keep it now.
        let pid = child.id();
        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let deadline = Instant::now() + self.timeout;
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep_until(deadline) => None,
        };

        let (exit_code, timed_out) = match status {
            Some(Ok(status)) => {
                // Background jobs the script left behind would keep the pipes open.
                kill_group(pid);
                (status.code(), false)
            }
            Some(Err(e)) => {
                terminate(&mut child, pid).await;
                return Err(format!("failed to wait for script: {}", e));
            }
            None => {
                tracing::warn!("Script {} exceeded {:?}, killing it", path.display(), self.timeout);
                terminate(&mut child, pid).await;
                (None, true)
            }
        };

        Ok(ScriptExecutionOutcome {
            stdout: collect_pipe(stdout).await,
            stderr: collect_pipe(stderr).await,
            exit_code,
            timed_out,
        })
    }

    fn outcome_to_result(&self, shown: &str, outcome: ScriptExecutionOutcome) -> ToolResult {
        if outcome.timed_out {
            return ToolError::ExecutionTimeout {
                path: shown.to_string(),
                secs: self.timeout.as_secs(),
            }
            .into();
        }

        match outcome.exit_code {
            Some(0) => ToolResult::Ok(format!(
                "Output of '{}':\n{}",
                shown,
                truncate_output(&outcome.stdout, self.max_output_chars)
            )),
            code => ToolError::NonZeroExit {
                path: shown.to_string(),
                status: match code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                },
                stderr: truncate_output(&outcome.stderr, self.max_output_chars),
            }
            .into(),
        }
    }
}

#[async_trait]
impl Tool for RunScript {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &ToolArguments) -> ToolResult {
        match args.str("filename") {
            Ok(filename) => self.run(filename).await,
            Err(e) => e.into(),
        }
    }
}

/// Kill the child together with anything it spawned, then reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.kill().await {
        tracing::debug!("kill after deadline: {}", e);
    }
}

/// SIGKILL every process in the script's process group.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        // The child leads its own process group (see `process_group(0)`).
        if let Some(pid) = pid {
            // SAFETY: kill(2) takes no pointers; the group id is the spawned child's
            // pid, and a group that has already emptied just yields ESRCH.
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
            if rc != 0 {
                tracing::trace!("process group {} already gone", pid);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!("pipe read ended early: {}", e);
        }
    }
    buf
}

/// Await a pipe reader, giving up if something still holds the pipe open.
async fn collect_pipe(reader: tokio::task::JoinHandle<Vec<u8>>) -> String {
    let abort = reader.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            tracing::debug!("pipe reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

pub(super) fn truncate_output(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... [output truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::WriteFile;

    fn runner(timeout: Duration) -> (tempfile::TempDir, Sandbox, RunScript) {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = Sandbox::new(dir.path().join("code_output")).expect("sandbox");
        let settings = ToolSettings {
            script_interpreter: "sh".to_string(),
            script_timeout: timeout,
            ..ToolSettings::default()
        };
        let runner = RunScript::new(sandbox.clone(), &settings);
        (dir, sandbox, runner)
    }

    fn write(sandbox: &Sandbox, name: &str, body: &str) {
        std::fs::write(sandbox.root().join(name), body).expect("write script");
    }

    fn read_pid(sandbox: &Sandbox, name: &str) -> libc::pid_t {
        std::fs::read_to_string(sandbox.root().join(name))
            .expect("pid file")
            .trim()
            .parse()
            .expect("pid")
    }

    /// Whether `pid` is still a live process. Zombies awaiting their reaper
    /// count as dead; the check is retried briefly while the kill lands.
    async fn is_running(pid: libc::pid_t) -> bool {
        for _ in 0..20 {
            let alive = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => !stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| rest.trim_start().starts_with('Z')),
                Err(_) if Path::new("/proc/self").exists() => false,
                Err(_) => (unsafe { libc::kill(pid, 0) }) == 0,
            };
            if !alive {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }

    #[tokio::test]
    async fn success_returns_stdout() {
        let (_dir, sandbox, runner) = runner(Duration::from_secs(10));
        write(&sandbox, "ok.sh", "echo hello from script\necho ignored >&2\n");

        let result = runner.run("ok.sh").await;
        assert!(result.is_ok(), "{}", result);
        assert!(result.text().contains("hello from script"));
        assert!(!result.text().contains("ignored"));
    }

    #[tokio::test]
    async fn nonzero_exit_returns_stderr() {
        let (_dir, sandbox, runner) = runner(Duration::from_secs(10));
        write(&sandbox, "bad.sh", "echo partial\necho boom >&2\nexit 3\n");

        let result = runner.run("bad.sh").await;
        assert!(!result.is_ok());
        assert!(result.text().contains("exit code 3"));
        assert!(result.text().contains("boom"));
        assert!(!result.text().contains("partial"));
    }

    #[tokio::test]
    async fn missing_script_fails_without_spawning() {
        let (_dir, _sandbox, runner) = runner(Duration::from_secs(10));
        let result = runner.run("absent.sh").await;
        assert!(!result.is_ok());
        assert!(result.text().contains("not found"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_failed_result() {
        let (dir, sandbox, _) = runner(Duration::from_secs(10));
        write(&sandbox, "x.sh", "echo hi\n");
        let settings = ToolSettings {
            script_interpreter: dir.path().join("no-such-interpreter").display().to_string(),
            ..ToolSettings::default()
        };
        let runner = RunScript::new(sandbox, &settings);

        let result = runner.run("x.sh").await;
        assert!(!result.is_ok());
        assert!(result.text().contains("Failed to start script"));
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let (_dir, sandbox, runner) = runner(Duration::from_millis(500));
        write(&sandbox, "slow.sh", "echo $$ > pid.txt\nsleep 30\necho finished\n");

        let started = std::time::Instant::now();
        let result = runner.run("slow.sh").await;

        assert!(!result.is_ok());
        assert!(result.text().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = read_pid(&sandbox, "pid.txt");
        assert!(!is_running(pid).await, "script process {} still running", pid);
    }

    #[tokio::test]
    async fn background_jobs_do_not_swallow_output() {
        let (_dir, sandbox, runner) = runner(Duration::from_secs(10));
        write(&sandbox, "bg.sh", "sleep 60 &\necho $! > bg.pid\necho done\n");

        let started = std::time::Instant::now();
        let result = runner.run("bg.sh").await;

        assert!(result.is_ok(), "{}", result);
        assert!(result.text().ends_with("done\n"), "{}", result);
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = read_pid(&sandbox, "bg.pid");
        assert!(!is_running(pid).await, "background job {} still running", pid);
    }

    #[tokio::test]
    async fn relative_sandbox_root_runs_scripts() {
        let dir = tempfile::tempdir_in(".").expect("tempdir");
        let name = dir.path().file_name().expect("tempdir name");
        let sandbox = Sandbox::new(Path::new(".").join(name).join("code_output")).expect("sandbox");
        let settings = ToolSettings {
            script_interpreter: "sh".to_string(),
            ..ToolSettings::default()
        };
        let runner = RunScript::new(sandbox.clone(), &settings);
        write(&sandbox, "hi.sh", "echo hi\n");

        let result = runner.run("hi.sh").await;
        assert!(result.is_ok(), "{}", result);
        assert!(result.text().ends_with("hi\n"));
    }

    #[tokio::test]
    async fn runs_with_sandbox_as_working_directory() {
        let (_dir, sandbox, runner) = runner(Duration::from_secs(10));
        let writer = WriteFile::new(sandbox.clone());

        assert!(writer.write("out.txt", "hello").await.is_ok());
        assert!(writer.write("../cat.sh", "cat out.txt\n").await.is_ok());

        let result = runner.run("cat.sh").await;
        assert!(result.is_ok(), "{}", result);
        assert!(result.text().contains("hello"));
    }

    #[test]
    fn long_output_is_truncated() {
        let text = "é".repeat(20);
        let cut = truncate_output(&text, 5);
        assert!(cut.starts_with("ééééé\n"));
        assert!(cut.ends_with("[output truncated]"));
        assert_eq!(truncate_output("short", 5), "short");
    }
}
