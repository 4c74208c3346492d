//! Configuration for drivelens using the prefer crate for discovery.
//!
//! One `Config` is built at startup (file, then environment, then CLI flags)
//! and handed to the pipeline; nothing reads the environment afterwards.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::DEFAULT_CHUNK_SIZE;
use crate::gemini::DEFAULT_GEMINI_ENDPOINT;
use crate::google::drive::DEFAULT_DRIVE_ENDPOINT;
use crate::google::sheets::DEFAULT_SHEETS_ENDPOINT;
use crate::retry::{QuotaPolicy, RetryPolicy};
use crate::sources::DEFAULT_PAGE_SIZE;
use crate::upload::DedupKey;

/// Prompt used when neither `prompt` nor `prompt_file` is configured.
pub const DEFAULT_PROMPT: &str = "Read the attached document and write a structured analysis of it. \
Start with a short summary, then list its main strengths and weaknesses as bullet points, \
and finish with concrete suggestions for improvement.";

const REDACTED: &str = "********";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("missing setting: {0}")]
    Missing(&'static str),
}

/// Gemini API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    /// Per-request timeout in seconds. Generation on long PDFs is slow.
    #[serde(default = "default_gemini_timeout")]
    pub timeout_secs: u64,
    /// How long to wait for an uploaded file to leave `PROCESSING`.
    #[serde(default = "default_activation_timeout")]
    pub activation_timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_gemini_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}
fn default_gemini_timeout() -> u64 {
    300
}
fn default_activation_timeout() -> u64 {
    120
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: default_gemini_endpoint(),
            timeout_secs: default_gemini_timeout(),
            activation_timeout_secs: default_activation_timeout(),
        }
    }
}

/// Google Drive and Sheets settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth access token with Drive (and Sheets) read scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_drive_endpoint")]
    pub drive_endpoint: String,
    #[serde(default = "default_sheets_endpoint")]
    pub sheets_endpoint: String,
    #[serde(default = "default_google_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_drive_endpoint() -> String {
    DEFAULT_DRIVE_ENDPOINT.to_string()
}
fn default_sheets_endpoint() -> String {
    DEFAULT_SHEETS_ENDPOINT.to_string()
}
fn default_google_timeout() -> u64 {
    120
}
fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            drive_endpoint: default_drive_endpoint(),
            sheets_endpoint: default_sheets_endpoint(),
            timeout_secs: default_google_timeout(),
            chunk_size: default_chunk_size(),
            page_size: default_page_size(),
        }
    }
}

/// Where documents come from. Exactly one of folder, links file or sheet is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// File with one Drive link per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    /// A1 range holding the links, e.g. `Roster!B2:B`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "application/pdf".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            links_file: None,
            spreadsheet_id: None,
            range: None,
            mime_type: default_mime_type(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Give up waiting on a job after this long.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    /// Job name prefix; a UTC timestamp is appended per submission.
    #[serde(default = "default_batch_name")]
    pub display_name: String,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_max_wait() -> u64 {
    24 * 60 * 60
}
fn default_batch_name() -> String {
    "drivelens-batch".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            display_name: default_batch_name(),
        }
    }
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for results, batch request files and rendered PDFs.
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_results_file")]
    pub results_file: String,
    /// Render each successful analysis to a PDF after the run.
    #[serde(default)]
    pub render: bool,
    /// Subdirectory of `dir` for rendered PDFs.
    #[serde(default = "default_pdf_dir")]
    pub pdf_dir: String,
}

fn default_output_dir() -> String {
    "output".to_string()
}
fn default_results_file() -> String {
    "responses.json".to_string()
}
fn default_pdf_dir() -> String {
    "pdfs".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            results_file: default_results_file(),
            render: false,
            pdf_dir: default_pdf_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Analysis prompt. Takes precedence over `prompt_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,
    #[serde(default)]
    pub dedup_key: DedupKey,
    /// List files already on the service so they are not uploaded again.
    #[serde(default = "default_true")]
    pub list_existing: bool,
    /// Delete each uploaded file once its analysis is recorded.
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete_after_analysis: bool,
    /// Derive student names from file names and attach them to records.
    #[serde(default, skip_serializing_if = "is_false")]
    pub extract_identity: bool,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig::default(),
            google: GoogleConfig::default(),
            source: SourceConfig::default(),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
            output: OutputConfig::default(),
            prompt: None,
            prompt_file: None,
            dedup_key: DedupKey::default(),
            list_existing: true,
            delete_after_analysis: false,
            extract_identity: false,
            source_path: None,
        }
    }
}

/// Non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration, discovering `drivelens` config files in standard
    /// locations. Falls back to defaults when none is found.
    pub async fn load() -> Result<Self, ConfigError> {
        let discovered = match prefer::load("drivelens").await {
            Ok(pref_config) => pref_config.source_path().map(|p| p.to_path_buf()),
            Err(_) => None,
        };
        let config = match discovered {
            Some(path) => Self::load_from_path(&path).await?,
            None => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Load configuration from a specific file path.
    /// Supports TOML, YAML and JSON based on the file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(path, &contents)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parsed = match ext {
            "toml" => toml::from_str(contents).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
            _ => serde_json::from_str(contents).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = env_value("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(model) = env_value("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(token) = env_value("GOOGLE_ACCESS_TOKEN") {
            self.google.access_token = Some(token);
        }
        if let Some(folder) = env_value("DRIVELENS_FOLDER_ID") {
            self.source.folder_id = Some(folder);
        }
        if let Some(dir) = env_value("DRIVELENS_OUTPUT_DIR") {
            self.output.dir = dir;
        }
        // DRIVELENS_ON_QUOTA=retry|skip
        if let Some(policy) = env_value("DRIVELENS_ON_QUOTA").and_then(|v| QuotaPolicy::from_str(&v)) {
            self.retry.on_quota = policy;
        }
        self
    }

    /// Get the base directory for resolving relative paths.
    /// The config file's directory if there is one, otherwise the working directory.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    /// Paths starting with ~ are expanded; absolute paths are returned as-is.
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.dir)
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir().join(&self.output.results_file)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.output_dir().join(&self.output.pdf_dir)
    }

    pub fn batch_requests_path(&self) -> PathBuf {
        self.output_dir().join("batch_requests.jsonl")
    }

    /// The analysis prompt: inline, from `prompt_file`, or the built-in default.
    pub fn prompt_text(&self) -> Result<String, ConfigError> {
        if let Some(prompt) = self.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(prompt.to_string());
        }
        if let Some(file) = &self.prompt_file {
            let path = self.resolve_path(file);
            return std::fs::read_to_string(&path)
                .map(|p| p.trim().to_string())
                .map_err(|source| ConfigError::Read { path, source });
        }
        Ok(DEFAULT_PROMPT.to_string())
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.gemini
            .api_key
            .as_deref()
            .ok_or(ConfigError::Missing("gemini.api_key (or GEMINI_API_KEY)"))
    }

    pub fn access_token(&self) -> Result<&str, ConfigError> {
        self.google
            .access_token
            .as_deref()
            .ok_or(ConfigError::Missing("google.access_token (or GOOGLE_ACCESS_TOKEN)"))
    }

    /// A copy safe to print: secrets replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.gemini.api_key.is_some() {
            copy.gemini.api_key = Some(REDACTED.to_string());
        }
        if copy.google.access_token.is_some() {
            copy.google.access_token = Some(REDACTED.to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert_eq!(config.source.mime_type, "application/pdf");
        assert_eq!(config.batch.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.batch.max_wait(), Duration::from_secs(86_400));
        assert!(config.list_existing);
        assert_eq!(config.dedup_key, DedupKey::DisplayName);
        assert_eq!(config.retry.on_quota, QuotaPolicy::SkipOnQuota);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            prompt = "Grade this essay."
            dedup_key = "content-hash"
            delete_after_analysis = true

            [gemini]
            model = "gemini-2.5-pro"

            [source]
            folder_id = "F1"

            [retry]
            max_retries = 5
            on_quota = "retry-on-quota"

            [output]
            dir = "results"
            render = true
        "#;
        let config = Config::parse(Path::new("drivelens.toml"), toml).unwrap();
        assert_eq!(config.gemini.model, "gemini-2.5-pro");
        assert_eq!(config.gemini.timeout_secs, 300);
        assert_eq!(config.source.folder_id.as_deref(), Some("F1"));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.pacing_ms, 2_000);
        assert_eq!(config.retry.on_quota, QuotaPolicy::RetryOnQuota);
        assert_eq!(config.dedup_key, DedupKey::ContentHash);
        assert!(config.delete_after_analysis);
        assert!(config.output.render);
        assert_eq!(config.output.results_file, "responses.json");
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = "gemini:\n  model: m-yaml\nlist_existing: false\n";
        let config = Config::parse(Path::new("c.yaml"), yaml).unwrap();
        assert_eq!(config.gemini.model, "m-yaml");
        assert!(!config.list_existing);

        let json = r#"{"source": {"spreadsheet_id": "S", "range": "A2:A"}}"#;
        let config = Config::parse(Path::new("c.json"), json).unwrap();
        assert_eq!(config.source.spreadsheet_id.as_deref(), Some("S"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Config::parse(Path::new("bad.toml"), "gemini = [").unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_paths_resolve_against_config_dir() {
        let config = Config {
            source_path: Some(PathBuf::from("/etc/drivelens/config.toml")),
            ..Config::default()
        };
        assert_eq!(
            config.results_path(),
            PathBuf::from("/etc/drivelens/output/responses.json")
        );
        assert_eq!(config.pdf_dir(), PathBuf::from("/etc/drivelens/output/pdfs"));
        assert_eq!(config.resolve_path("/abs/x"), PathBuf::from("/abs/x"));
    }

    #[test]
    fn test_prompt_text_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.txt"), "  From file.\n").unwrap();

        let mut config = Config {
            source_path: Some(dir.path().join("drivelens.toml")),
            prompt_file: Some("prompt.txt".to_string()),
            ..Config::default()
        };
        assert_eq!(config.prompt_text().unwrap(), "From file.");

        config.prompt = Some("Inline.".to_string());
        assert_eq!(config.prompt_text().unwrap(), "Inline.");

        assert_eq!(Config::default().prompt_text().unwrap(), DEFAULT_PROMPT);
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = Config::default();
        config.gemini.api_key = Some("secret-key".to_string());
        let shown = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("secret-key"));
        assert!(shown.contains(REDACTED));
        assert!(Config::default().redacted().gemini.api_key.is_none());
    }

    #[test]
    fn test_missing_secrets() {
        let config = Config::default();
        assert!(matches!(config.api_key(), Err(ConfigError::Missing(_))));
        assert!(matches!(config.access_token(), Err(ConfigError::Missing(_))));
    }
}
