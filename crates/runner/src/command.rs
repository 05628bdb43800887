use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// What the interpreter is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Script { path: PathBuf, args: Vec<String> },
    Inline { code: String },
}

#[derive(Debug, Clone)]
pub struct RunnerCommand {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub working_directory: Option<PathBuf>,
    pub env: BTreeMap<String, OsString>,
}

impl RunnerCommand {
    pub fn new(executable: PathBuf, invocation: &Invocation) -> Self {
        let args = match invocation {
            Invocation::Script { path, args } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(path.as_os_str().to_os_string());
                argv.extend(args.iter().map(OsString::from));
                argv
            }
            Invocation::Inline { code } => vec![OsString::from("-c"), OsString::from(code)],
        };
        Self {
            executable,
            args,
            working_directory: None,
            env: BTreeMap::new(),
        }
    }

    pub fn display(&self) -> String {
        let mut rendered = self.executable.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }

    /// Builds the child with stdout/stderr piped; stdin is left to the caller.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        hide_console(&mut cmd);
        cmd
    }
}

#[cfg(windows)]
fn hide_console(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console(_cmd: &mut Command) {}
