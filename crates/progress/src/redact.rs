use std::path::{Path, PathBuf};

/// Display form of a path with the home directory shortened to `~`.
pub fn redact_path(path: &Path) -> String {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => redact_under(path, Path::new(&home)),
        _ => path.display().to_string(),
    }
}

/// Only whole leading components match, so `/home/al` leaves `/home/alice` alone.
fn redact_under(path: &Path, home: &Path) -> String {
    match path.strip_prefix(home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Ok(rest) => PathBuf::from("~").join(rest).display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn shortens_paths_under_home() {
        let home = Path::new("/home/al");
        assert_eq!(
            redact_under(Path::new("/home/al/data/uv"), home),
            "~/data/uv"
        );
        assert_eq!(redact_under(Path::new("/home/al"), home), "~");
    }

    #[test]
    fn respects_component_boundaries() {
        let home = Path::new("/home/al");
        assert_eq!(
            redact_under(Path::new("/home/alice/x"), home),
            "/home/alice/x"
        );
        assert_eq!(redact_under(Path::new("/opt/uv"), home), "/opt/uv");
    }
}
