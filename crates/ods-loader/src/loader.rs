//! Source discovery and output preparation.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::sink::{OutputTarget, WritePolicy};
use crate::types::{ImportConfig, ImportError, ImportResult};

/// File name prefix of full ODS organisation releases.
pub const RELEASE_PREFIX: &str = "HSCOrgRefData_Full";

/// Resolves the source file of a run.
///
/// A file path is returned unchanged. For a directory, the
/// `HSCOrgRefData_Full_*.xml` file with the latest release date is chosen.
///
/// # Errors
/// Returns [`ImportError::SourceNotFound`] if the path does not exist or a
/// directory holds no release file.
pub fn resolve_source<P: AsRef<Path>>(path: P) -> ImportResult<PathBuf> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ImportError::SourceNotFound {
            path: path.display().to_string(),
        });
    }
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    let mut latest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let filename = entry.file_name();
        let filename_str = filename.to_string_lossy();

        if !filename_str.starts_with(RELEASE_PREFIX) || !filename_str.ends_with(".xml") {
            continue;
        }

        let date = extract_release_date(&filename_str).unwrap_or_default();
        if latest.as_ref().map_or(true, |(best, _)| date > *best) {
            latest = Some((date, entry.path()));
        }
    }

    latest
        .map(|(_, file)| file)
        .ok_or_else(|| ImportError::SourceNotFound {
            path: format!("no {RELEASE_PREFIX}_*.xml file in {}", path.display()),
        })
}

/// Extracts the release date from a release file name.
///
/// Release files have names like `HSCOrgRefData_Full_20250324.xml`.
fn extract_release_date(filename: &str) -> Option<String> {
    let without_ext = filename.trim_end_matches(".xml");
    let last = without_ext.rsplit('_').next()?;

    if last.len() == 8 && last.chars().all(|c| c.is_ascii_digit()) {
        Some(last.to_string())
    } else {
        None
    }
}

/// Creates one output root per configured format, `<output_root>/<format>`.
///
/// # Errors
/// Returns an error if a root directory cannot be created.
pub fn prepare_output_targets(config: &ImportConfig) -> ImportResult<Vec<OutputTarget>> {
    let policy = WritePolicy {
        attempts: config.write_retries,
        backoff: config.write_backoff,
    };

    config
        .formats
        .iter()
        .map(|format| {
            let root = config.output_root.join(format.name());
            fs::create_dir_all(&root)?;
            info!(format = %format, root = %root.display(), "output target ready");
            Ok(OutputTarget::new(root, *format, policy))
        })
        .collect()
}

/// Returns the size of the source in bytes.
pub fn source_size<P: AsRef<Path>>(path: P) -> ImportResult<u64> {
    Ok(fs::metadata(path)?.len())
}

/// Formats a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
