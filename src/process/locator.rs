use crate::config::ToolSection;
use crate::error::GatewayError;
use std::path::{Path, PathBuf};

/// Find the AI tool executable.
///
/// Order: the configured `tool.path`, each of `tool.search_names` on `PATH`,
/// then the usual per-user and system install directories.
pub fn locate_tool(settings: &ToolSection) -> Result<PathBuf, GatewayError> {
    let mut searched = Vec::new();

    if let Some(path) = &settings.path {
        if is_executable(path) {
            return Ok(path.clone());
        }
        // An explicit path that does not work is an error, not a hint
        searched.push(path.display().to_string());
        return Err(GatewayError::ToolNotFound { searched });
    }

    for name in &settings.search_names {
        match which::which(name) {
            Ok(found) => {
                tracing::debug!("Found {} on PATH at {}", name, found.display());
                return Ok(found);
            }
            Err(_) => searched.push(format!("{} (PATH)", name)),
        }
    }

    for dir in install_dirs() {
        for name in &settings.search_names {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                tracing::debug!("Found {} at {}", name, candidate.display());
                return Ok(candidate);
            }
            searched.push(candidate.display().to_string());
        }
    }

    Err(GatewayError::ToolNotFound { searched })
}

fn install_dirs() -> Vec<PathBuf> {
    let mut dirs_list = vec![PathBuf::from("/usr/local/bin")];
    if let Some(home) = dirs::home_dir() {
        dirs_list.push(home.join(".local").join("bin"));
        dirs_list.push(home.join(".claude").join("local"));
    }
    dirs_list.push(PathBuf::from("/opt/homebrew/bin"));
    dirs_list
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
