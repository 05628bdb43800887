//! Child-process plumbing shared by every package-tool invocation.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use progress::{lines, ProgressEvent, ProgressReporter, Stage};

/// Maps one line of tool output to a coarse progress checkpoint.
pub type LineClassifier = fn(&str) -> Option<ProgressEvent>;

#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, OsString)>,
    pub stage: Stage,
    pub forward_stdout: bool,
    pub forward_stderr: bool,
}

impl ToolCommand {
    pub fn new(program: &Path, stage: Stage) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            stage,
            forward_stdout: true,
            forward_stderr: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<OsString>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn stderr_only(mut self) -> Self {
        self.forward_stdout = false;
        self
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs the tool to completion, streaming both pipes line by line into
/// `progress` while keeping the full text of each.
pub async fn run_tool(
    command: &ToolCommand,
    progress: &ProgressReporter,
    classify: Option<LineClassifier>,
) -> io::Result<ToolOutput> {
    tracing::info!(command = %command.display(), "running package tool");
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &command.envs {
        cmd.env(key, value);
    }
    hide_console(&mut cmd);

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let on_line = |line: &str, forward: bool| {
        tracing::debug!(stage = %command.stage, "{line}");
        if forward {
            progress.log_chunk(command.stage, line);
        }
        if let Some(hint) = classify.and_then(|classify| classify(line)) {
            progress.emit(hint);
        }
    };

    let (stdout, stderr) = tokio::join!(
        collect_lines(stdout, |line| on_line(line, command.forward_stdout)),
        collect_lines(stderr, |line| on_line(line, command.forward_stderr)),
    );
    let status = child.wait().await?;
    let output = ToolOutput {
        code: status.code(),
        stdout: stdout?,
        stderr: stderr?,
    };
    tracing::info!(command = %command.display(), code = ?output.code, "package tool finished");
    Ok(output)
}

async fn collect_lines<R>(reader: Option<R>, mut on_line: impl FnMut(&str)) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let mut reader = BufReader::new(reader);
    let mut collected = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await?;
        if read == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        collected.push_str(&text);
        for line in lines::split_lines(&text) {
            on_line(line);
        }
    }
    Ok(collected)
}

/// Runs `<program> --version` with a hard deadline and returns the second
/// token of the first line, e.g. `uv 0.5.14 (…)` → `0.5.14`.
pub async fn query_version(program: &Path, timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    hide_console(&mut cmd);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            tracing::warn!(
                program = %program.display(),
                error = %err,
                "version check failed to start"
            );
            return None;
        }
        Err(_) => {
            tracing::warn!(program = %program.display(), ?timeout, "version check timed out");
            return None;
        }
    };
    if !output.status.success() {
        tracing::warn!(
            program = %program.display(),
            code = ?output.status.code(),
            "version check exited non-zero"
        );
        return None;
    }
    // Older interpreters print their version on stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_version_line(&stdout).or_else(|| parse_version_line(&stderr))
}

pub fn parse_version_line(output: &str) -> Option<String> {
    let line = lines::split_lines(output).next()?;
    line.split_whitespace().nth(1).map(str::to_string)
}

#[cfg(windows)]
fn hide_console(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_and_interpreter_versions() {
        assert_eq!(
            parse_version_line("uv 0.5.14 (a1b2c3 2024-12-30)\n").as_deref(),
            Some("0.5.14")
        );
        assert_eq!(
            parse_version_line("Python 3.12.8\n").as_deref(),
            Some("3.12.8")
        );
        assert_eq!(parse_version_line("\n\n"), None);
        assert_eq!(parse_version_line("uv"), None);
    }

    #[test]
    fn command_display_joins_args() {
        let cmd = ToolCommand::new(Path::new("/opt/uv"), Stage::Install)
            .args(["python", "install", "3.12"]);
        assert_eq!(cmd.display(), "/opt/uv python install 3.12");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tool_streams_both_pipes_and_keeps_stderr() {
        let (reporter, mut rx) = ProgressReporter::channel();
        let cmd = ToolCommand::new(Path::new("/bin/sh"), Stage::Deps)
            .arg("-c")
            .arg("echo out-line; echo err-line >&2; exit 3");
        let output = run_tool(&cmd, &reporter, None).await.unwrap();
        drop(reporter);

        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out-line");
        assert_eq!(output.stderr.trim(), "err-line");

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.stage, Stage::Deps);
            messages.push(event.message);
        }
        messages.sort();
        assert_eq!(messages, vec!["err-line", "out-line"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_only_suppresses_stdout_events() {
        let (reporter, mut rx) = ProgressReporter::channel();
        let cmd = ToolCommand::new(Path::new("/bin/sh"), Stage::Venv)
            .arg("-c")
            .arg("echo quiet; echo loud >&2")
            .stderr_only();
        let output = run_tool(&cmd, &reporter, None).await.unwrap();
        drop(reporter);

        assert!(output.success());
        let event = rx.try_recv().unwrap();
        assert_eq!(event.message, "loud");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_program_has_no_version() {
        let missing = Path::new("/definitely/not/here/uv");
        assert_eq!(query_version(missing, Duration::from_secs(1)).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_version_query_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow");
        crate::fake_tool::write_executable(&script, "#!/bin/sh\nexec sleep 5\n");
        let started = std::time::Instant::now();
        assert_eq!(
            query_version(&script, Duration::from_millis(200)).await,
            None
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
