use std::env;
use std::path::PathBuf;

pub(crate) fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_xdg_state_dir() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("XDG_STATE_HOME").ok()) {
        return Some(path);
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("state"))
}

/// `APIREG_DATA_DIR`, else `$XDG_STATE_HOME/api-registry`, else the
/// working directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("APIREG_DATA_DIR").ok()) {
        return path;
    }
    if let Some(path) = resolve_xdg_state_dir() {
        return path.join("api-registry");
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn metadata_db_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("registry.sqlite3")
}

pub fn secrets_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("secrets.json")
}

pub fn key_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(".secrets.key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_values_are_ignored() {
        assert!(normalize_env_path(Some("  ".to_string())).is_none());
        assert!(normalize_env_path(Some("undefined".to_string())).is_none());
        assert_eq!(
            normalize_env_path(Some(" /tmp/reg ".to_string())),
            Some(PathBuf::from("/tmp/reg"))
        );
    }
}
