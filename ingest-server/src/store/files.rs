use std::{
    fs,
    path::{Path, PathBuf},
};

const MAX_COMPONENT_LEN: usize = 64;

/// Reduce an untrusted name to a single safe path component.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, leading dots are stripped so
/// the result can never be `.`/`..` or hidden, and an empty result maps to
/// `unknown`.
pub(crate) fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let truncated: String = cleaned.chars().take(MAX_COMPONENT_LEN).collect();
    if truncated.is_empty() {
        "unknown".to_string()
    } else {
        truncated
    }
}

pub(crate) fn session_dir(root: &Path, username: &str, session_id: &str) -> PathBuf {
    root.join(sanitize_component(username))
        .join(format!("session_{}", sanitize_component(session_id)))
}

/// Replace `path` with `bytes` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("invalid target path: {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    fs::write(&tmp, bytes).map_err(|e| format!("failed to write {}: {e}", tmp.display()))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        format!("failed to rename into {}: {e}", path.display())
    })
}

pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| format!("failed to serialize {}: {e}", path.display()))?;
    write_atomic(path, &bytes)
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let bytes = fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid json in {}: {e}", path.display()))
}
