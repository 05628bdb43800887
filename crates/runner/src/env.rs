use std::collections::BTreeMap;
use std::env::{self, JoinPathsError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const VIRTUAL_ENV: &str = "VIRTUAL_ENV";
pub const PYTHONPATH: &str = "PYTHONPATH";
pub const PYTHONIOENCODING: &str = "PYTHONIOENCODING";
pub const PYTHONUNBUFFERED: &str = "PYTHONUNBUFFERED";

/// Variables layered over the inherited environment of every child.
///
/// Caller variables come first; the environment binding and the encoding
/// flags always win over them. `search_paths` are prepended to whatever
/// `PYTHONPATH` the caller passed, or else the one this process inherited.
pub fn child_env(
    caller: &BTreeMap<String, String>,
    environment: &Path,
    search_paths: &[PathBuf],
    inherited_pythonpath: Option<OsString>,
) -> Result<BTreeMap<String, OsString>, JoinPathsError> {
    let mut vars: BTreeMap<String, OsString> = caller
        .iter()
        .map(|(key, value)| (key.clone(), OsString::from(value)))
        .collect();

    let tail = vars.remove(PYTHONPATH).or(inherited_pythonpath);
    let mut entries: Vec<PathBuf> = search_paths.to_vec();
    if let Some(tail) = tail.filter(|value| !value.is_empty()) {
        entries.extend(env::split_paths(&tail));
    }
    if !entries.is_empty() {
        vars.insert(PYTHONPATH.to_string(), env::join_paths(entries)?);
    }

    vars.insert(VIRTUAL_ENV.to_string(), environment.as_os_str().to_os_string());
    vars.insert(PYTHONIOENCODING.to_string(), OsString::from("utf-8"));
    vars.insert(PYTHONUNBUFFERED.to_string(), OsString::from("1"));
    Ok(vars)
}
