use std::path::{Path, PathBuf};

use crate::error::{MediaError, Result};

/// Pick an output filename for an action.
///
/// An explicit `output_name` wins (the extension is appended when missing),
/// then a name derived from the input source, then a timestamped unique name.
pub fn resolve_output_filename(
    extension: &str,
    prefix: &str,
    output_name: Option<&str>,
    input_source: Option<&str>,
) -> String {
    if let Some(name) = output_name.map(str::trim).filter(|n| !n.is_empty()) {
        return if Path::new(name).extension().is_some() {
            name.to_string()
        } else {
            format!("{}.{}", name, extension)
        };
    }

    if let Some(stem) = input_source.and_then(input_stem) {
        return format!("{}_{}.{}", stem, prefix, extension);
    }

    generate_output_filename(extension, prefix)
}

/// `<prefix>_<unix millis>_<6 random chars>.<ext>`
pub fn generate_output_filename(extension: &str, prefix: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let random: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("{}_{}_{}.{}", prefix, timestamp, random, extension)
}

pub fn output_path(output_dir: &Path, filename: &str) -> PathBuf {
    output_dir.join(filename)
}

pub async fn ensure_output_dir(output_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
        MediaError::Provider(format!(
            "Failed to create output directory {}: {}",
            output_dir.display(),
            e
        ))
    })
}

/// File stem of a path or URL, without query string.
fn input_stem(source: &str) -> Option<String> {
    let path = source.split(['?', '#']).next()?;
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = Path::new(name).file_stem()?.to_string_lossy().to_string();
    if stem.is_empty() || stem.contains(':') {
        None
    } else {
        Some(stem)
    }
}
