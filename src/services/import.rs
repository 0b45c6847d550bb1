use crate::core::io::Storage;
use anyhow::{bail, Context, Result};
use std::path::Path;

pub const SCRIPT_EXTENSIONS: [&str; 3] = ["txt", "md", "fountain"];

pub fn is_supported_script(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SCRIPT_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Loads a script file as text. No validation beyond the extension and UTF-8.
pub async fn read_script(storage: &dyn Storage, path: &str) -> Result<String> {
    if !is_supported_script(path) {
        bail!(
            "Unsupported script file: {} (expected .txt, .md or .fountain)",
            path
        );
    }

    if !storage.exists(path).await? {
        bail!("Script file not found: {}", path);
    }
    let bytes = storage
        .read(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let text = String::from_utf8(bytes).with_context(|| format!("{} is not UTF-8 text", path))?;
    Ok(text)
}
