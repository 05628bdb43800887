//! Scripted stand-ins for the package tool and the interpreter it installs.
//!
//! The fake tool understands just enough of the real command surface to drive
//! provisioning end to end: `--version`, `python install`, `venv`,
//! `pip install [--target DIR] [-r FILE] PKG…` and `pip list --format=freeze`.
//! Every invocation is appended to a log so tests can count them.
//! The fake interpreter runs `-c CODE` and script files through `/bin/sh`.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub const FAKE_TOOL_VERSION: &str = "0.5.14";
pub const FAKE_INTERPRETER_VERSION: &str = "3.12.8";

/// Package name the fake tool refuses to resolve.
pub const UNRESOLVABLE_PACKAGE: &str = "does-not-exist";

const INTERPRETER_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "Python 3.12.8"
  exit 0
fi
if [ "$1" = "-c" ]; then
  code="$2"
  shift 2
  exec /bin/sh -c "$code" python "$@"
fi
script="$1"
shift
exec /bin/sh "$script" "$@"
"#;

#[derive(Debug, Default, Clone)]
pub struct FakeToolBuilder {
    fail_python_install: bool,
    fail_venv: bool,
    install_delay: Option<String>,
}

impl FakeToolBuilder {
    pub fn fail_python_install(mut self) -> Self {
        self.fail_python_install = true;
        self
    }

    pub fn fail_venv(mut self) -> Self {
        self.fail_venv = true;
        self
    }

    /// Seconds (fractions allowed) the interpreter install sleeps before finishing.
    pub fn install_delay(mut self, seconds: &str) -> Self {
        self.install_delay = Some(seconds.to_string());
        self
    }

    pub fn build(self) -> FakeTool {
        let dir = tempfile::tempdir().expect("create fake tool dir");
        let root = dir.path().to_path_buf();
        let bin_dir = root.join("bin");
        fs::create_dir_all(&bin_dir).expect("create fake tool bin dir");

        let tool_path = bin_dir.join("uv");
        let log_path = root.join("invocations.log");
        let fail_flag = root.join("fail-python-install");
        if self.fail_python_install {
            fs::write(&fail_flag, b"").expect("write fail flag");
        }
        let script = render_tool_script(&log_path, &fail_flag, &self);
        write_executable(&tool_path, &script);

        FakeTool {
            _dir: dir,
            root,
            tool_path,
            log_path,
            fail_flag,
        }
    }
}

/// A temp directory holding a fake `uv`; removed on drop.
#[derive(Debug)]
pub struct FakeTool {
    _dir: TempDir,
    root: PathBuf,
    tool_path: PathBuf,
    log_path: PathBuf,
    fail_flag: PathBuf,
}

impl FakeTool {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> FakeToolBuilder {
        FakeToolBuilder::default()
    }

    /// Scratch space next to the tool, suitable as a data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tool_path(&self) -> PathBuf {
        self.tool_path.clone()
    }

    /// Lets a previously failing interpreter install succeed from now on.
    pub fn heal_python_install(&self) {
        let _ = fs::remove_file(&self.fail_flag);
    }

    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log_path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count_invocations(&self, prefix: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

impl Default for FakeTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes a script and marks it executable.
pub fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }
}

/// Writes the fake interpreter at `path`, for tests that skip provisioning.
pub fn write_fake_interpreter(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create interpreter dir");
    }
    write_executable(path, INTERPRETER_SCRIPT);
}

fn render_tool_script(log_path: &Path, fail_flag: &Path, options: &FakeToolBuilder) -> String {
    let delay = options.install_delay.as_deref().unwrap_or("0");
    let venv_failure = if options.fail_venv {
        "echo \"error: no interpreter found for Python $4\" >&2\n    exit 1"
    } else {
        ":"
    };
    format!(
        r#"#!/bin/sh
echo "$*" >> "{log}"
case "$1" in
  --version)
    echo "uv {tool_version} (fake 2024-12-30)"
    exit 0
    ;;
  python)
    [ "$2" = "install" ] || exit 64
    echo "Searching for Python versions matching: Python $3" >&2
    if [ -f "{fail_flag}" ]; then
      echo "error: failed to download cpython-$3" >&2
      exit 2
    fi
    echo "Downloading cpython-{interp_version}-linux-x86_64-gnu" >&2
    sleep {delay}
    mkdir -p "$UV_PYTHON_INSTALL_DIR/cpython-{interp_version}-linux-x86_64-gnu/bin"
    echo "Installed Python {interp_version} in 0.01s" >&2
    exit 0
    ;;
  venv)
    {venv_failure}
    dir="$2"
    mkdir -p "$dir/bin"
    cat > "$dir/bin/python" <<'PYEOF'
{interpreter}PYEOF
    chmod +x "$dir/bin/python"
    echo "home = $UV_PYTHON_INSTALL_DIR" > "$dir/pyvenv.cfg"
    echo "Creating virtual environment at: $dir" >&2
    exit 0
    ;;
  pip)
    sub="$2"
    shift 2
    case "$sub" in
      install)
        target=""
        manifest=""
        pkgs=""
        while [ $# -gt 0 ]; do
          case "$1" in
            --verbose) ;;
            --index-url) shift ;;
            --target) shift; target="$1" ;;
            -r) shift; manifest="$1" ;;
            *) pkgs="$pkgs $1" ;;
          esac
          shift
        done
        if [ -n "$manifest" ]; then
          pkgs="$pkgs $(grep -v '^#' "$manifest" | sed 's/[=<>~!].*//')"
        fi
        for p in $pkgs; do
          case "$p" in
            {unresolvable}*)
              echo "error: No solution found when resolving dependencies: $p" >&2
              exit 1
              ;;
          esac
        done
        n=0
        for p in $pkgs; do
          n=$((n + 1))
          name=$(echo "$p" | sed 's/[=<>~!].*//' | sed 's/-/_/g')
          if [ -n "$target" ]; then
            mkdir -p "$target/$name-1.0.0.dist-info" "$target/$name"
          else
            list="$VIRTUAL_ENV/fake-installed.txt"
            touch "$list"
            grep -qx "$name" "$list" || echo "$name" >> "$list"
          fi
        done
        echo "Resolved $n packages" >&2
        echo "Installed $n packages" >&2
        exit 0
        ;;
      list)
        list="$VIRTUAL_ENV/fake-installed.txt"
        [ -f "$list" ] || exit 0
        while read -r name; do
          echo "$name==1.0.0" | sed 's/_/-/g'
        done < "$list"
        exit 0
        ;;
    esac
    ;;
esac
echo "error: unexpected arguments: $*" >&2
exit 2
"#,
        log = log_path.display(),
        fail_flag = fail_flag.display(),
        tool_version = FAKE_TOOL_VERSION,
        interp_version = FAKE_INTERPRETER_VERSION,
        delay = delay,
        venv_failure = venv_failure,
        interpreter = INTERPRETER_SCRIPT,
        unresolvable = UNRESOLVABLE_PACKAGE,
    )
}
