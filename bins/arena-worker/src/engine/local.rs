/// Local subprocess engine
///
/// **Execution Rules:**
/// 1. Writes the source into a fresh temporary directory
/// 2. Compiles it when the language profile has a compile command
/// 3. Spawns the run command in its own process group with piped stdio
/// 4. Enforces the wall-clock limit with `tokio::time::timeout`, killing
///    the whole process group on expiry
/// 5. Removes the directory and reaps the group on every exit path
///
/// Isolation beyond a process group (namespaces, cgroups, seccomp) is the
/// job of the environment the worker runs in.
use super::{ExecutionEngine, ProgramArtifact};
use arena_common::types::{ExecutionOutcome, ExitClass};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Cap on captured bytes per stream
const MAX_CAPTURE_BYTES: u64 = 16 * 1024 * 1024;

/// How long to wait for pipes to drain once a timed-out group is killed
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Process group cleanup guard - kills every process in the group on drop.
///
/// Covers panics, cancellation of the surrounding future, and children
/// the program forked into the background.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader.map(|pid| Pid::from_raw(pid as i32)),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            // ESRCH just means the group already exited
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill process group");
                }
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

enum ProcessResult {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
        elapsed_ms: u64,
    },
    TimedOut {
        stdout: String,
        elapsed_ms: u64,
    },
    Failed(std::io::Error),
}

async fn read_capped<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        // a read error mid-stream still leaves whatever arrived before it
        let _ = pipe.take(MAX_CAPTURE_BYTES).read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn run_process(argv: &[String], cwd: &Path, stdin: &str, limit: Duration) -> ProcessResult {
    let Some((program, args)) = argv.split_first() else {
        return ProcessResult::Failed(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ));
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return ProcessResult::Failed(e),
    };

    // CRITICAL: arm the guard before anything else can fail or be cancelled
    let mut guard = ProcessGroupGuard::new(child.id());

    let input = stdin.as_bytes().to_vec();
    let stdin_pipe = child.stdin.take();
    let writer = tokio::spawn(async move {
        if let Some(mut pipe) = stdin_pipe {
            // the program may exit without reading its input
            let _ = pipe.write_all(&input).await;
            let _ = pipe.shutdown().await;
        }
    });
    let stdout_task = tokio::spawn(read_capped(child.stdout.take()));
    let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

    let waited = tokio::time::timeout(limit, child.wait()).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match waited {
        Ok(Ok(status)) => {
            // stray background children would otherwise hold the pipes open
            guard.kill();
            writer.abort();
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            ProcessResult::Exited {
                status,
                stdout,
                stderr,
                elapsed_ms,
            }
        }
        Ok(Err(e)) => ProcessResult::Failed(e),
        Err(_) => {
            guard.kill();
            let _ = child.kill().await;
            writer.abort();
            stderr_task.abort();
            let stdout = match tokio::time::timeout(DRAIN_GRACE, stdout_task).await {
                Ok(Ok(stdout)) => stdout,
                _ => String::new(),
            };
            ProcessResult::TimedOut { stdout, elapsed_ms }
        }
    }
}

/// Append a readable note for abnormal exits
fn describe_exit(status: ExitStatus, mut stderr: String) -> String {
    let note = match status.signal() {
        Some(raw) => match Signal::try_from(raw) {
            Ok(Signal::SIGKILL) => "[Process killed: SIGKILL, likely out of memory]".to_string(),
            Ok(Signal::SIGSEGV) => "[Process killed: segmentation fault]".to_string(),
            Ok(signal) => format!("[Process killed by {}]", signal.as_str()),
            Err(_) => format!("[Process killed by signal {}]", raw),
        },
        None if stderr.trim().is_empty() => match status.code() {
            Some(code) => format!("[Process exited with code {}]", code),
            None => return stderr,
        },
        None => return stderr,
    };
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(&note);
    stderr
}

/// Temporary directory holding one program; removed on drop
struct Workspace {
    dir: TempDir,
    file: PathBuf,
}

impl Workspace {
    async fn create(artifact: &ProgramArtifact) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("arena-").tempdir()?;
        let file = dir.path().join(&artifact.profile.source_file);
        tokio::fs::write(&file, artifact.source.as_bytes()).await?;
        Ok(Self { dir, file })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Substitute `{file}` and `{dir}` in a command template
    fn expand(&self, template: &[String]) -> Vec<String> {
        let file = self.file.to_string_lossy();
        let dir = self.dir.path().to_string_lossy();
        template
            .iter()
            .map(|part| part.replace("{file}", &file).replace("{dir}", &dir))
            .collect()
    }
}

pub struct LocalEngine {
    compile_timeout: Duration,
}

impl LocalEngine {
    pub fn new(compile_timeout: Duration) -> Self {
        Self { compile_timeout }
    }

    async fn prepare(&self, artifact: &ProgramArtifact) -> Result<Workspace, ExecutionOutcome> {
        let workspace = Workspace::create(artifact)
            .await
            .map_err(|e| ExecutionOutcome::infrastructure(format!("failed to prepare workspace: {}", e)))?;

        let Some(compile) = &artifact.profile.compile else {
            return Ok(workspace);
        };

        let argv = workspace.expand(compile);
        debug!(language = %artifact.language(), command = ?argv, "Compiling");

        match run_process(&argv, workspace.path(), "", self.compile_timeout).await {
            ProcessResult::Exited { status, .. } if status.success() => Ok(workspace),
            ProcessResult::Exited {
                stdout,
                stderr,
                elapsed_ms,
                ..
            } => {
                let log = format!("{}{}", stderr, stdout);
                Err(ExecutionOutcome::compile_error(log.trim_end().to_string(), elapsed_ms))
            }
            ProcessResult::TimedOut { elapsed_ms, .. } => Err(ExecutionOutcome::compile_error(
                format!("compilation timed out after {}ms", self.compile_timeout.as_millis()),
                elapsed_ms,
            )),
            ProcessResult::Failed(e) => Err(ExecutionOutcome::infrastructure(format!(
                "failed to start compiler '{}': {}",
                argv.first().map(String::as_str).unwrap_or_default(),
                e
            ))),
        }
    }

    async fn execute(
        &self,
        artifact: &ProgramArtifact,
        workspace: &Workspace,
        stdin: &str,
        limit: Duration,
    ) -> ExecutionOutcome {
        let argv = workspace.expand(&artifact.profile.run);
        match run_process(&argv, workspace.path(), stdin, limit).await {
            ProcessResult::Exited {
                status,
                stdout,
                stderr,
                elapsed_ms,
            } => {
                if status.success() {
                    ExecutionOutcome::accepted(stdout, stderr, elapsed_ms)
                } else {
                    ExecutionOutcome::runtime_error(stdout, describe_exit(status, stderr), elapsed_ms)
                }
            }
            ProcessResult::TimedOut { stdout, elapsed_ms } => {
                warn!(
                    language = %artifact.language(),
                    limit_ms = limit.as_millis() as u64,
                    "Execution timed out - process group killed"
                );
                ExecutionOutcome::timeout(stdout, elapsed_ms)
            }
            ProcessResult::Failed(e) => ExecutionOutcome::infrastructure(format!(
                "failed to start '{}': {}",
                argv.first().map(String::as_str).unwrap_or_default(),
                e
            )),
        }
    }
}

#[async_trait]
impl ExecutionEngine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, artifact: &ProgramArtifact, stdin: &str, limit: Duration) -> ExecutionOutcome {
        let workspace = match self.prepare(artifact).await {
            Ok(workspace) => workspace,
            Err(outcome) => return outcome,
        };
        self.execute(artifact, &workspace, stdin, limit).await
    }

    /// Compile once, then reuse the build for every case
    async fn run_batch(
        &self,
        artifact: &ProgramArtifact,
        inputs: &[String],
        per_case_limit: Duration,
    ) -> Vec<ExecutionOutcome> {
        let workspace = match self.prepare(artifact).await {
            Ok(workspace) => workspace,
            Err(outcome) => return vec![outcome],
        };

        let mut outcomes = Vec::with_capacity(inputs.len());
        for stdin in inputs {
            let outcome = self.execute(artifact, &workspace, stdin, per_case_limit).await;
            let stop = outcome.exit_class != ExitClass::Accepted;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::languages::LanguageRegistry;
    use arena_common::types::LanguageId;

    fn shell_artifact(script: &str) -> ProgramArtifact {
        let mut profile = LanguageRegistry::builtin().get(LanguageId(71)).unwrap().clone();
        profile.source_file = "main.sh".to_string();
        profile.run = vec!["sh".to_string(), "{file}".to_string()];
        ProgramArtifact::new(&profile, script)
    }

    fn engine() -> LocalEngine {
        LocalEngine::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_stdout_and_stdin() {
        let artifact = shell_artifact("read line\necho \"got $line\"\n");
        let outcome = engine().run(&artifact, "42\n", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_class, ExitClass::Accepted);
        assert_eq!(outcome.stdout, "got 42\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_runtime_error() {
        let artifact = shell_artifact("echo boom >&2\nexit 3\n");
        let outcome = engine().run(&artifact, "", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_class, ExitClass::RuntimeError);
        assert!(outcome.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn test_silent_failure_reports_exit_code() {
        let artifact = shell_artifact("exit 7\n");
        let outcome = engine().run(&artifact, "", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_class, ExitClass::RuntimeError);
        assert!(outcome.stderr.contains("code 7"));
    }

    #[tokio::test]
    async fn test_timeout_kills_the_group() {
        let artifact = shell_artifact("echo started\nsleep 30 &\nsleep 30\n");
        let started = Instant::now();
        let outcome = engine().run(&artifact, "", Duration::from_millis(300)).await;
        assert_eq!(outcome.exit_class, ExitClass::Timeout);
        assert_eq!(outcome.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_infrastructure() {
        let mut artifact = shell_artifact("");
        artifact.profile.run = vec!["arena-no-such-interpreter".to_string(), "{file}".to_string()];
        let outcome = engine().run(&artifact, "", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_class, ExitClass::InfrastructureError);
        assert!(outcome.stderr.contains("arena-no-such-interpreter"));
    }

    #[tokio::test]
    async fn test_compile_failure_short_circuits_batch() {
        let mut artifact = shell_artifact("echo never\n");
        artifact.profile.compile = Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'main.sh:1: error: expected ;' >&2; exit 1".to_string(),
        ]);
        let inputs = vec!["1".to_string(), "2".to_string()];
        let outcomes = engine().run_batch(&artifact, &inputs, Duration::from_secs(5)).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].exit_class, ExitClass::CompileError);
        assert!(outcomes[0].compile_log.contains("expected ;"));
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let artifact = shell_artifact("read n\nif [ \"$n\" = 2 ]; then exit 1; fi\necho $n\n");
        let inputs: Vec<String> = ["1", "2", "3"].iter().map(|s| format!("{}\n", s)).collect();
        let outcomes = engine().run_batch(&artifact, &inputs, Duration::from_secs(5)).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].stdout, "1\n");
        assert_eq!(outcomes[1].exit_class, ExitClass::RuntimeError);
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_python_program() {
        let profile = LanguageRegistry::builtin().get(LanguageId(71)).unwrap().clone();
        let artifact = ProgramArtifact::new(&profile, "print(int(input()) * 2)\n");
        let outcome = engine().run(&artifact, "21\n", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_class, ExitClass::Accepted);
        assert_eq!(outcome.stdout.trim(), "42");
    }

    #[tokio::test]
    #[ignore] // Requires g++
    async fn test_cpp_compiles_once() {
        let profile = LanguageRegistry::builtin().get(LanguageId(54)).unwrap().clone();
        let artifact = ProgramArtifact::new(
            &profile,
            "#include <iostream>\nint main() { long n; std::cin >> n; std::cout << n * 2 << std::endl; }\n",
        );
        let inputs = vec!["1\n".to_string(), "2\n".to_string(), "3\n".to_string()];
        let outcomes = engine().run_batch(&artifact, &inputs, Duration::from_secs(5)).await;
        let stdout: Vec<_> = outcomes.iter().map(|o| o.stdout.trim().to_string()).collect();
        assert_eq!(stdout, vec!["2", "4", "6"]);
    }
}
