//! Document persistence.
//!
//! A [`DocumentSink`] knows how to encode one [`Value`] to a file; an
//! [`OutputTarget`] binds a sink to an output root and owns the directory
//! layout and write retries:
//!
//! ```text
//! <root>/<status>/<role_id>/<org_id>.<ext>
//! <root>/<status>/<role_id>/summary.<ext>
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ods_types::{path_component, well_known, ClassificationKey, Value};
use serde::Serialize;
use tracing::warn;

use crate::types::{ImportError, ImportResult};

/// Encodes documents to files of one format.
pub trait DocumentSink: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Creates a directory and its parents.
    fn ensure_directory(&self, path: &Path) -> ImportResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    /// Writes one value to a file, replacing it if present.
    fn write(&self, path: &Path, value: &Value) -> ImportResult<()>;

    /// Reads a value back from a file.
    fn read(&self, path: &Path) -> ImportResult<Value>;
}

/// Pretty-printed JSON with four-space indentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSink;

impl DocumentSink for JsonSink {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn write(&self, path: &Path, value: &Value) -> ImportResult<()> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value
            .serialize(&mut serializer)
            .map_err(|e| ImportError::Encode {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        out.push(b'\n');

        fs::write(path, out)?;
        Ok(())
    }

    fn read(&self, path: &Path) -> ImportResult<Value> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| ImportError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Block-style YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlSink;

impl DocumentSink for YamlSink {
    fn extension(&self) -> &'static str {
        "yaml"
    }

    fn write(&self, path: &Path, value: &Value) -> ImportResult<()> {
        let text = serde_yaml::to_string(value).map_err(|e| ImportError::Encode {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        fs::write(path, text)?;
        Ok(())
    }

    fn read(&self, path: &Path) -> ImportResult<Value> {
        let text = fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|e| ImportError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Supported output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// YAML documents (`.yaml`).
    Yaml,
    /// JSON documents (`.json`).
    Json,
}

impl OutputFormat {
    /// Returns the format name, also used as the output subdirectory.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Yaml => "yaml",
            OutputFormat::Json => "json",
        }
    }

    /// Returns a sink for this format.
    pub fn sink(self) -> Arc<dyn DocumentSink> {
        match self {
            OutputFormat::Yaml => Arc::new(YamlSink),
            OutputFormat::Json => Arc::new(JsonSink),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            other => Err(ImportError::InvalidConfig(format!(
                "unknown output format '{other}' (expected yaml or json)"
            ))),
        }
    }
}

fn document_stem(org_id: &str) -> String {
    let stem = path_component(org_id);
    if stem.eq_ignore_ascii_case(well_known::SUMMARY_STEM) {
        format!("%{:02X}{}", stem.as_bytes()[0], &stem[1..])
    } else {
        stem
    }
}

/// Retry policy for file writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// Total attempts per write, at least one.
    pub attempts: u32,
    /// Pause before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// A sink bound to an output root.
#[derive(Clone)]
pub struct OutputTarget {
    root: PathBuf,
    sink: Arc<dyn DocumentSink>,
    policy: WritePolicy,
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTarget")
            .field("root", &self.root)
            .field("extension", &self.sink.extension())
            .field("policy", &self.policy)
            .finish()
    }
}

impl OutputTarget {
    /// Creates a target writing `format` under `root`.
    pub fn new(root: impl Into<PathBuf>, format: OutputFormat, policy: WritePolicy) -> Self {
        Self::with_sink(root, format.sink(), policy)
    }

    /// Creates a target around a custom sink.
    pub fn with_sink(
        root: impl Into<PathBuf>,
        sink: Arc<dyn DocumentSink>,
        policy: WritePolicy,
    ) -> Self {
        Self {
            root: root.into(),
            sink,
            policy,
        }
    }

    /// Returns the output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the sink.
    pub fn sink(&self) -> &dyn DocumentSink {
        self.sink.as_ref()
    }

    /// Returns the directory of a group.
    pub fn group_dir(&self, key: &ClassificationKey) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    /// Returns the path of one document.
    ///
    /// An identity spelled like the summary stem has its first character
    /// percent-encoded so it never shares a file with the group summary.
    pub fn document_path(&self, key: &ClassificationKey, org_id: &str) -> PathBuf {
        self.group_dir(key)
            .join(format!("{}.{}", document_stem(org_id), self.sink.extension()))
    }

    /// Returns the path of a group's summary file.
    pub fn summary_path(&self, key: &ClassificationKey) -> PathBuf {
        self.group_dir(key).join(format!(
            "{}.{}",
            well_known::SUMMARY_STEM,
            self.sink.extension()
        ))
    }

    /// Creates the directory of a group.
    pub fn ensure_group_dir(&self, key: &ClassificationKey) -> ImportResult<PathBuf> {
        let dir = self.group_dir(key);
        self.sink.ensure_directory(&dir)?;
        Ok(dir)
    }

    /// Writes one document, retrying transient I/O failures.
    pub fn write_document(
        &self,
        key: &ClassificationKey,
        org_id: &str,
        value: &Value,
    ) -> ImportResult<PathBuf> {
        let path = self.document_path(key, org_id);
        self.write_with_retry(&path, value)?;
        Ok(path)
    }

    /// Writes a group's summary file, retrying transient I/O failures.
    pub fn write_summary(&self, key: &ClassificationKey, value: &Value) -> ImportResult<PathBuf> {
        let path = self.summary_path(key);
        self.write_with_retry(&path, value)?;
        Ok(path)
    }

    /// Writes `value` to `path`. Only I/O errors are retried; encoding
    /// errors fail immediately.
    fn write_with_retry(&self, path: &Path, value: &Value) -> ImportResult<()> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.sink.write(path, value) {
                Ok(()) => return Ok(()),
                Err(ImportError::Io(source)) if attempt >= attempts => {
                    return Err(ImportError::Write {
                        path: path.display().to_string(),
                        attempts,
                        source,
                    });
                }
                Err(ImportError::Io(e)) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %e,
                        "write failed, retrying"
                    );
                    thread::sleep(self.policy.backoff * attempt);
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ods_types::Fields;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn sample() -> Value {
        let mut role = Fields::new();
        role.insert("id".to_string(), Value::scalar("RO197"));
        role.insert("primaryRole".to_string(), Value::scalar("true"));
        let mut roles = Fields::new();
        roles.insert("Role".to_string(), Value::Sequence(vec![Value::Mapping(role)]));
        let mut body = Fields::new();
        body.insert("Name".to_string(), Value::scalar("LEEDS TRUST"));
        body.insert("Roles".to_string(), Value::Mapping(roles));
        body.insert("UPRN".to_string(), Value::scalar("0072656153"));
        Value::Mapping(body)
    }

    fn fast_policy(attempts: u32) -> WritePolicy {
        WritePolicy {
            attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("RR8.json");
        JsonSink.write(&path, &sample()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"Name\": \"LEEDS TRUST\""));
        assert!(text.ends_with('\n'));
        assert_eq!(JsonSink.read(&path).unwrap(), sample());
    }

    #[test]
    fn test_yaml_round_trip_keeps_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("RR8.yaml");
        YamlSink.write(&path, &sample()).unwrap();

        // Leading zeros survive because scalars are written as strings.
        assert_eq!(YamlSink.read(&path).unwrap(), sample());
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(" YAML ".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert!(matches!(
            "xml".parse::<OutputFormat>(),
            Err(ImportError::InvalidConfig(_))
        ));
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_target_layout() {
        let target = OutputTarget::new("/out/json", OutputFormat::Json, WritePolicy::default());
        let key = ClassificationKey::new("Active", "RO197");

        assert_eq!(
            target.document_path(&key, "RR8"),
            PathBuf::from("/out/json/Active/RO197/RR8.json")
        );
        assert_eq!(
            target.summary_path(&key),
            PathBuf::from("/out/json/Active/RO197/summary.json")
        );
        assert_eq!(
            target.document_path(&key, "../x"),
            PathBuf::from("/out/json/Active/RO197/..%2Fx.json")
        );
    }

    #[test]
    fn test_summary_named_identity_keeps_its_own_file() {
        let dir = TempDir::new().unwrap();
        let target = OutputTarget::new(dir.path(), OutputFormat::Json, WritePolicy::default());
        let key = ClassificationKey::new("Active", "RO197");
        target.ensure_group_dir(&key).unwrap();

        let document = target.write_document(&key, "summary", &sample()).unwrap();
        let shouted = target.write_document(&key, "SUMMARY", &sample()).unwrap();
        let summary = target.write_summary(&key, &Value::Sequence(Vec::new())).unwrap();

        assert_eq!(document.file_name().unwrap(), "%73ummary.json");
        assert_eq!(shouted.file_name().unwrap(), "%53UMMARY.json");
        assert_ne!(document, summary);
        assert_eq!(JsonSink.read(&document).unwrap(), sample());
        assert_eq!(
            target.document_path(&key, "%73ummary"),
            dir.path().join("Active/RO197/%2573ummary.json")
        );
    }

    /// Fails with an I/O error a fixed number of times, then delegates.
    struct FlakySink {
        failures: AtomicU32,
    }

    impl DocumentSink for FlakySink {
        fn extension(&self) -> &'static str {
            "json"
        }

        fn write(&self, path: &Path, value: &Value) -> ImportResult<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::Interrupted, "flaky").into());
            }
            JsonSink.write(path, value)
        }

        fn read(&self, path: &Path) -> ImportResult<Value> {
            JsonSink.read(path)
        }
    }

    #[test]
    fn test_write_retries_until_success() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(FlakySink {
            failures: AtomicU32::new(2),
        });
        let target = OutputTarget::with_sink(dir.path(), sink, fast_policy(3));
        let key = ClassificationKey::new("Active", "RO197");

        target.ensure_group_dir(&key).unwrap();
        let path = target.write_document(&key, "RR8", &sample()).unwrap();
        assert_eq!(target.sink().read(&path).unwrap(), sample());
    }

    #[test]
    fn test_write_gives_up_after_attempts() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(FlakySink {
            failures: AtomicU32::new(10),
        });
        let target = OutputTarget::with_sink(dir.path(), sink, fast_policy(3));
        let key = ClassificationKey::new("Active", "RO197");

        target.ensure_group_dir(&key).unwrap();
        let result = target.write_document(&key, "RR8", &sample());
        assert!(matches!(result, Err(ImportError::Write { attempts: 3, .. })));
    }
}
