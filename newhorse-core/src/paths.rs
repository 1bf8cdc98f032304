// ABOUTME: Platform locations for the database, logs, and config file.
// ABOUTME: Falls back to the working directory when no home directory can be found.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "newhorse", "newhorse")
}

/// Where the database, logs, and default projects live
/// (`~/.local/share/newhorse` on Linux, `./data` without a home)
pub fn data_dir() -> PathBuf {
    match dirs() {
        Some(d) => d.data_dir().to_path_buf(),
        None => PathBuf::from("./data"),
    }
}

/// Per-user config file, consulted after `./config.toml`
pub fn config_file() -> PathBuf {
    let dir = match dirs() {
        Some(d) => d.config_dir().to_path_buf(),
        None => PathBuf::from("."),
    };
    dir.join("config.toml")
}

/// Resolve `~` and `~/...` against the home directory. Other paths pass through.
pub fn expand_home(path: &str) -> String {
    let rest = match path {
        "~" => "",
        p => match p.strip_prefix("~/") {
            Some(rest) => rest,
            None => return path.to_string(),
        },
    };
    let Some(base) = BaseDirs::new() else {
        tracing::warn!(path = %path, "No home directory, leaving path unexpanded");
        return path.to_string();
    };
    let home = base.home_dir();
    let expanded = if rest.is_empty() { home.to_path_buf() } else { home.join(rest) };
    expanded.to_string_lossy().into_owned()
}
