#![forbid(unsafe_code)]

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base name of the intermediate and executable artifacts. Shared by every
/// case in a run; this is what forces strict per-case sequencing.
pub const DEFAULT_ARTIFACT_BASE: &str = "a";

/// Flag passed to the compiler so only code generation is exercised.
pub const SKIP_SEMANTICS_FLAG: &str = "--skip-semantics";

pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compile,
    Assemble,
    Link,
    Execute,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Assemble => "assemble",
            Self::Link => "link",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} step could not start `{program}`: {source}")]
    Spawn {
        stage: Stage,
        program: String,
        source: std::io::Error,
    },
    #[error("{stage} step exited with status {status}: {stderr}")]
    StepFailed {
        stage: Stage,
        status: i32,
        stderr: String,
    },
    #[error("{stage} step timed out after {timeout_secs}s")]
    Timeout { stage: Stage, timeout_secs: u64 },
    #[error("{stage} step io failure: {source}")]
    Io {
        stage: Stage,
        source: std::io::Error,
    },
}

impl PipelineError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Spawn { stage, .. }
            | Self::StepFailed { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Io { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupFailure {
    #[error("setup command is empty")]
    Empty,
    #[error("setup command `{command}` could not start: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("setup command `{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("setup command `{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    #[error("setup command `{command}` io failure: {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
}

/// Captured output of one external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Tool names and artifact layout for one run.
///
/// Defaults mirror the original toolchain: `./cc` emitting LLVM IR, `llc`
/// assembling, `clang` linking position-independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub compiler: PathBuf,
    pub assembler: PathBuf,
    pub linker: PathBuf,
    pub artifact_base: String,
    pub workdir: PathBuf,
    pub step_timeout: Duration,
}

impl ToolchainConfig {
    #[must_use]
    pub fn with_workdir(workdir: PathBuf) -> Self {
        Self {
            compiler: PathBuf::from("./cc"),
            assembler: PathBuf::from("llc"),
            linker: PathBuf::from("clang"),
            artifact_base: DEFAULT_ARTIFACT_BASE.to_owned(),
            workdir,
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn ir_name(&self) -> String {
        format!("{}.ll", self.artifact_base)
    }

    #[must_use]
    pub fn object_name(&self) -> String {
        format!("{}.o", self.artifact_base)
    }

    #[must_use]
    pub fn executable_name(&self) -> String {
        format!("{}.out", self.artifact_base)
    }

    #[must_use]
    pub fn executable_path(&self) -> PathBuf {
        self.workdir.join(self.executable_name())
    }
}

/// Drives the four-step pipeline for one case at a time.
///
/// Takes `&mut self` per case: all cases build into the same artifact
/// names, so two cases must never run concurrently.
#[derive(Debug)]
pub struct PipelineRunner {
    config: ToolchainConfig,
}

impl PipelineRunner {
    #[must_use]
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Compile, assemble, link, then execute one source file.
    ///
    /// A non-zero status from any of the first three steps aborts the case
    /// with a stage-named error; later steps are not attempted. A non-zero
    /// exit from the produced executable is not an error here; it comes
    /// back in the [`Execution`] for the oracle to judge.
    pub fn run_case(&mut self, source: &Path) -> Result<Execution, PipelineError> {
        self.compile(source)?;
        self.assemble()?;
        self.link()?;
        self.execute()
    }

    fn compile(&self, source: &Path) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.config.compiler);
        cmd.arg(source).arg(SKIP_SEMANTICS_FLAG);
        self.checked(Stage::Compile, cmd)
    }

    fn assemble(&self) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.config.assembler);
        cmd.arg("-filetype=obj")
            .arg(self.config.ir_name())
            .arg("-o")
            .arg(self.config.object_name());
        self.checked(Stage::Assemble, cmd)
    }

    fn link(&self) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.config.linker);
        cmd.arg(self.config.object_name())
            .arg("-o")
            .arg(self.config.executable_name())
            .arg("-pie");
        self.checked(Stage::Link, cmd)
    }

    fn execute(&self) -> Result<Execution, PipelineError> {
        let executable = self.config.executable_path();
        let mut cmd = Command::new(&executable);
        cmd.current_dir(&self.config.workdir);
        capture(&mut cmd, self.config.step_timeout).map_err(|failure| {
            failure.into_pipeline(Stage::Execute, &executable.display().to_string())
        })
    }

    fn checked(&self, stage: Stage, mut cmd: Command) -> Result<(), PipelineError> {
        cmd.current_dir(&self.config.workdir);
        tracing::debug!(stage = stage.as_str(), "running pipeline step");
        let program = cmd.get_program().to_string_lossy().into_owned();
        let output = capture(&mut cmd, self.config.step_timeout)
            .map_err(|failure| failure.into_pipeline(stage, &program))?;
        if output.exit_code != 0 {
            return Err(PipelineError::StepFailed {
                stage,
                status: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

/// Runs one setup command (compiler build, artifact clean) to completion,
/// checking its status. `argv[0]` is the program.
pub fn run_setup(argv: &[String], cwd: &Path, timeout: Duration) -> Result<(), SetupFailure> {
    let (program, args) = argv.split_first().ok_or(SetupFailure::Empty)?;
    let rendered = argv.join(" ");

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    tracing::debug!(command = rendered.as_str(), "running setup command");

    let output = capture(&mut cmd, timeout).map_err(|failure| match failure {
        CaptureFailure::Spawn(source) => SetupFailure::Spawn {
            command: rendered.clone(),
            source,
        },
        CaptureFailure::Io(source) => SetupFailure::Io {
            command: rendered.clone(),
            source,
        },
        CaptureFailure::Timeout { timeout_secs } => SetupFailure::Timeout {
            command: rendered.clone(),
            timeout_secs,
        },
    })?;

    if output.exit_code != 0 {
        return Err(SetupFailure::Failed {
            command: rendered,
            status: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(())
}

enum CaptureFailure {
    Spawn(std::io::Error),
    Io(std::io::Error),
    Timeout { timeout_secs: u64 },
}

impl CaptureFailure {
    fn into_pipeline(self, stage: Stage, program: &str) -> PipelineError {
        match self {
            Self::Spawn(source) => PipelineError::Spawn {
                stage,
                program: program.to_owned(),
                source,
            },
            Self::Io(source) => PipelineError::Io { stage, source },
            Self::Timeout { timeout_secs } => PipelineError::Timeout {
                stage,
                timeout_secs,
            },
        }
    }
}

fn capture(cmd: &mut Command, timeout: Duration) -> Result<Execution, CaptureFailure> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(CaptureFailure::Spawn)?;
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let status = wait_with_deadline(&mut child, timeout)?;

    Ok(Execution {
        stdout: join_reader(stdout).map_err(CaptureFailure::Io)?,
        stderr: join_reader(stderr).map_err(CaptureFailure::Io)?,
        exit_code: status.code().unwrap_or(-1),
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, CaptureFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait().map_err(CaptureFailure::Io)? {
            Some(status) => return Ok(status),
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureFailure::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_reader(handle: JoinHandle<std::io::Result<String>>) -> std::io::Result<String> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::other("output reader thread panicked")),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{
        PipelineError, PipelineRunner, SetupFailure, Stage, ToolchainConfig, run_setup,
    };

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    fn fake_toolchain(dir: &Path, linked_stdout: &str, linked_exit: i32) -> ToolchainConfig {
        let compiler = write_script(dir, "fake-cc", "cat \"$1\" > a.ll\n");
        let assembler = write_script(dir, "fake-llc", "[ -f a.ll ] || exit 1\ncp a.ll a.o\n");
        let link_body = format!(
            "[ -f a.o ] || exit 1\n\
             printf '#!/bin/sh\\necho \"{linked_stdout}\"\\nexit {linked_exit}\\n' > a.out\n\
             chmod +x a.out\n"
        );
        let linker = write_script(dir, "fake-clang", &link_body);

        let mut config = ToolchainConfig::with_workdir(dir.to_path_buf());
        config.compiler = compiler;
        config.assembler = assembler;
        config.linker = linker;
        config.step_timeout = Duration::from_secs(5);
        config
    }

    #[test]
    fn full_pipeline_captures_stdout_and_exit_code() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("001.c");
        fs::write(&source, "int main() { return 0; }\n").expect("write source");

        let mut runner = PipelineRunner::new(fake_toolchain(dir.path(), "42", 0));
        let execution = runner.run_case(&source).expect("pipeline");
        assert_eq!(execution.stdout.trim(), "42");
        assert_eq!(execution.exit_code, 0);
    }

    #[test]
    fn nonzero_program_exit_is_not_a_pipeline_error() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("002.c");
        fs::write(&source, "int main() { return 3; }\n").expect("write source");

        let mut runner = PipelineRunner::new(fake_toolchain(dir.path(), "boom", 3));
        let execution = runner.run_case(&source).expect("pipeline");
        assert_eq!(execution.exit_code, 3);
        assert_eq!(execution.stdout.trim(), "boom");
    }

    #[test]
    fn failing_step_aborts_before_later_steps() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("003.c");
        fs::write(&source, "int main() { return 0; }\n").expect("write source");

        let mut config = fake_toolchain(dir.path(), "42", 0);
        config.assembler =
            write_script(dir.path(), "bad-llc", "echo 'bad encoding' >&2\nexit 1\n");
        config.linker = write_script(dir.path(), "spy-clang", "touch linked\n");

        let mut runner = PipelineRunner::new(config);
        let err = runner.run_case(&source).expect_err("assemble fails");
        match err {
            PipelineError::StepFailed {
                stage,
                status,
                stderr,
            } => {
                assert_eq!(stage, Stage::Assemble);
                assert_eq!(status, 1);
                assert!(stderr.contains("bad encoding"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            !dir.path().join("linked").exists(),
            "link step must not run after a failed assemble"
        );
    }

    #[test]
    fn hung_step_times_out_with_stage_identity() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("004.c");
        fs::write(&source, "int main() { return 0; }\n").expect("write source");

        let mut config = fake_toolchain(dir.path(), "42", 0);
        config.compiler = write_script(dir.path(), "slow-cc", "sleep 5\n");
        config.step_timeout = Duration::from_millis(200);

        let mut runner = PipelineRunner::new(config);
        let err = runner.run_case(&source).expect_err("compile hangs");
        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: Stage::Compile,
                ..
            }
        ));
    }

    #[test]
    fn missing_compiler_is_a_spawn_error() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("005.c");
        fs::write(&source, "int main() { return 0; }\n").expect("write source");

        let mut config = ToolchainConfig::with_workdir(dir.path().to_path_buf());
        config.compiler = dir.path().join("no-such-cc");

        let mut runner = PipelineRunner::new(config);
        let err = runner.run_case(&source).expect_err("spawn fails");
        assert_eq!(err.stage(), Stage::Compile);
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }

    #[test]
    fn setup_commands_check_status() {
        let dir = TempDir::new().expect("tempdir");
        let timeout = Duration::from_secs(5);

        let ok = ["/bin/sh".to_owned(), "-c".to_owned(), "exit 0".to_owned()];
        run_setup(&ok, dir.path(), timeout).expect("setup succeeds");

        let bad = [
            "/bin/sh".to_owned(),
            "-c".to_owned(),
            "echo nope >&2; exit 2".to_owned(),
        ];
        let err = run_setup(&bad, dir.path(), timeout).expect_err("setup fails");
        match err {
            SetupFailure::Failed { status, stderr, .. } => {
                assert_eq!(status, 2);
                assert!(stderr.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            run_setup(&[], dir.path(), timeout),
            Err(SetupFailure::Empty)
        ));
    }
}
