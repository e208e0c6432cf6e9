//! Configuration module for the SafeExec broker.
//!
//! This module provides the frozen configuration the broker runs under:
//! the audit-record directory, strict-mode flag, classified paths, the
//! optional chat endpoint, and the execution toggles. It supports loading
//! a JSON file and layering command-line values on top (CLI wins).
//!
//! # Examples
//!
//! ```ignore
//! use safexec::config::{CliOverrides, ConfigFile, SandboxConfig};
//!
//! // Load from a JSON file, then apply CLI overrides.
//! let file = ConfigFile::from_file("safexec.json")?;
//! let config = SandboxConfig::from_layers(cli_overrides, file);
//! ```

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

/// Descriptor of the remote chat endpoint.
///
/// Only constructed when all three fields are present; a partial
/// configuration is treated as "not configured" (with a warning).
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Bearer credential. Never logged, never serialized.
    pub api_key: SecretString,

    /// Model identifier passed through on every request.
    pub model: String,
}

/// Complete broker configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory audit records are written to. `None` disables recording.
    pub record_dir: Option<PathBuf>,

    /// Strict mode: additionally block the fixed file-operation command set
    /// in `exec`, forcing file access through the filesystem capability.
    pub strict: bool,

    /// Classified paths, absolute and normalized. Only `read_classified` /
    /// `write_classified` may touch files under these.
    pub classified_paths: Vec<PathBuf>,

    /// Chat endpoint, if fully configured.
    pub chat: Option<ChatConfig>,

    /// Quiet flag: raise the log filter to errors only.
    pub quiet: bool,

    /// Wrap one-shot expression snippets in a zero-argument function.
    pub wrap_code: bool,

    /// Expose the session tools on the broker boundary.
    pub sessions_enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            record_dir: None,
            strict: false,
            classified_paths: vec![],
            chat: None,
            quiet: false,
            wrap_code: true,
            sessions_enabled: true,
        }
    }
}

/// Raw values as they appear in a JSON config file.
///
/// Unknown fields are ignored. Every field is optional; the CLI layer wins
/// on conflict.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigFile {
    #[serde(default)]
    pub record: Option<PathBuf>,

    #[serde(default)]
    pub strict: Option<bool>,

    #[serde(default)]
    pub classified_paths: Option<Vec<String>>,

    #[serde(default)]
    pub quiet: Option<bool>,

    #[serde(default)]
    pub wrap_code: Option<bool>,

    #[serde(default)]
    pub sessions: Option<bool>,

    #[serde(default)]
    pub llm_base_url: Option<String>,

    #[serde(default)]
    pub llm_api_key: Option<String>,

    #[serde(default)]
    pub llm_model: Option<String>,
}

impl ConfigFile {
    /// Loads raw configuration values from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json_string(&content)
    }

    /// Parses raw configuration values from a JSON string.
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse JSON configuration")
    }
}

/// Values collected from the command line, pre-merge.
///
/// `None` means "not given on the CLI"; the boolean flags are only ever
/// `true` when their switch was passed.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub record: Option<PathBuf>,
    pub strict: bool,
    pub classified_paths: Option<Vec<String>>,
    pub quiet: bool,
    pub no_wrap: bool,
    pub no_session: bool,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
}

impl SandboxConfig {
    /// Builds the frozen configuration from the CLI layer and an optional
    /// config file, CLI winning on every conflicting field.
    ///
    /// A partial chat configuration (one or two of base-url/key/model) is
    /// treated as "not configured" and warned about on stderr.
    pub fn from_layers(cli: CliOverrides, file: ConfigFile) -> Self {
        let record_dir = cli.record.or(file.record);
        let strict = cli.strict || file.strict.unwrap_or(false);
        let quiet = cli.quiet || file.quiet.unwrap_or(false);

        let wrap_code = if cli.no_wrap {
            false
        } else {
            file.wrap_code.unwrap_or(true)
        };
        let sessions_enabled = if cli.no_session {
            false
        } else {
            file.sessions.unwrap_or(true)
        };

        let classified_paths: Vec<PathBuf> = cli
            .classified_paths
            .or(file.classified_paths)
            .unwrap_or_default()
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| absolutize(Path::new(p.trim())))
            .collect();

        let base_url = cli.llm_base_url.or(file.llm_base_url);
        let api_key = cli.llm_api_key.or(file.llm_api_key);
        let model = cli.llm_model.or(file.llm_model);
        let chat = match (base_url, api_key, model) {
            (Some(base_url), Some(api_key), Some(model)) => Some(ChatConfig {
                base_url,
                api_key: SecretString::new(api_key),
                model,
            }),
            (None, None, None) => None,
            _ => {
                tracing::warn!(
                    "partial chat configuration (need base URL, API key, and model); \
                     chat is disabled"
                );
                None
            }
        };

        Self {
            record_dir,
            strict,
            classified_paths,
            chat,
            quiet,
            wrap_code,
            sessions_enabled,
        }
    }

    /// Returns the classified paths relevant to a filesystem capability
    /// rooted at `root`: every configured path that is below the root *or*
    /// an ancestor of it.
    ///
    /// Keeping ancestors means a capability requested inside a classified
    /// area still sees that area as classified, closing the drill-through
    /// bypass.
    pub fn classified_for_root(&self, root: &Path) -> Vec<PathBuf> {
        self.classified_paths
            .iter()
            .filter(|p| p.starts_with(root) || root.starts_with(p))
            .cloned()
            .collect()
    }
}

/// Resolves a path to an absolute, lexically normalized form.
///
/// Relative paths are joined onto the current working directory. `.` and
/// `..` components are folded without consulting the filesystem, so paths
/// that do not exist yet normalize the same way as ones that do.
pub fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    normalize(&joined)
}

/// Folds `.` and `..` components out of a path lexically.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
