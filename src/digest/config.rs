use crate::digest::chunker::{Chunker, DEFAULT_MAX_TOKENS, DEFAULT_TOKENS_PER_WORD};
use crate::digest::paths::DigestPaths;
use crate::error::DigestError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_include_timestamps")]
    pub include_timestamps: bool,
    #[serde(default = "default_tokens_per_word")]
    pub tokens_per_word: f64,
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_include_timestamps() -> bool {
    true
}

fn default_tokens_per_word() -> f64 {
    DEFAULT_TOKENS_PER_WORD
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            include_timestamps: true,
            tokens_per_word: DEFAULT_TOKENS_PER_WORD,
        }
    }
}

impl ChunkerConfig {
    pub fn build(&self) -> Result<Chunker, DigestError> {
        Chunker::new(self.max_tokens, self.tokens_per_word)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "mistral".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExportConfig {
    pub bin: Option<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub guilds: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub after_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DigestConfig {
    pub chunker: ChunkerConfig,
    pub ollama: OllamaConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDigestConfig {
    chunker: Option<ChunkerConfig>,
    ollama: Option<OllamaConfig>,
    export: Option<ExportConfig>,
}

/// Unlike the other overrides, an unparsable budget is an error.
fn env_budget(var: &str, fallback: usize) -> Result<usize, DigestError> {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            trimmed.parse::<usize>().map_err(|_| {
                DigestError::InvalidConfig(format!(
                    "{var} must be a positive integer (got `{trimmed}`)"
                ))
            })
        }
        Err(_) => Ok(fallback),
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

pub fn validate(cfg: &DigestConfig) -> Result<(), DigestError> {
    cfg.chunker.build()?;
    let host = cfg.ollama.host.trim();
    if !(host.starts_with("http://") || host.starts_with("https://")) {
        return Err(DigestError::InvalidConfig(format!(
            "ollama host must be an http(s) url (got `{host}`)"
        )));
    }
    if cfg.ollama.model.trim().is_empty() {
        return Err(DigestError::InvalidConfig(
            "ollama model cannot be empty".to_string(),
        ));
    }
    if cfg.ollama.timeout_secs == 0 {
        return Err(DigestError::InvalidConfig(
            "ollama timeout must be >= 1 second".to_string(),
        ));
    }
    if cfg.export.timeout_secs == Some(0) {
        return Err(DigestError::InvalidConfig(
            "exporter timeout must be >= 1 second when set".to_string(),
        ));
    }
    Ok(())
}

fn merge_file_config(base: &mut DigestConfig, paths: &DigestPaths) -> Result<()> {
    let path = &paths.config_file;
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| DigestError::InvalidConfig(format!("{}: {err}", path.display())))?;
    let parsed: PartialDigestConfig = toml::from_str(&raw)
        .map_err(|err| DigestError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if let Some(chunker) = parsed.chunker {
        base.chunker = chunker;
    }
    if let Some(ollama) = parsed.ollama {
        base.ollama = ollama;
    }
    if let Some(export) = parsed.export {
        base.export = export;
    }
    Ok(())
}

pub fn load_config(paths: &DigestPaths) -> Result<DigestConfig> {
    let mut cfg = DigestConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.chunker.max_tokens = env_budget("DIGEST_MAX_TOKENS", cfg.chunker.max_tokens)?;
    cfg.chunker.include_timestamps =
        env_or_bool("DIGEST_INCLUDE_TIMESTAMPS", cfg.chunker.include_timestamps);
    cfg.chunker.tokens_per_word =
        env_or_f64("DIGEST_TOKENS_PER_WORD", cfg.chunker.tokens_per_word);
    cfg.ollama.host = env_or_string("OLLAMA_HOST", &cfg.ollama.host);
    cfg.ollama.model = env_or_string("OLLAMA_MODEL", &cfg.ollama.model);
    cfg.ollama.timeout_secs = env_or_u64("OLLAMA_TIMEOUT_SECS", cfg.ollama.timeout_secs);
    cfg.export.bin = env_non_empty("DCE_BIN").or(cfg.export.bin);
    cfg.export.token = env_non_empty("DISCORD_TOKEN").or(cfg.export.token);
    cfg.export.guilds = env_or_csv("DCE_GUILDS", &cfg.export.guilds);
    cfg.export.channels = env_or_csv("DCE_CHANNELS", &cfg.export.channels);
    cfg.export.timeout_secs = env_non_empty("DCE_TIMEOUT_SECS")
        .and_then(|v| v.parse::<u64>().ok())
        .or(cfg.export.timeout_secs);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = DigestConfig::default();
        assert_eq!(cfg.chunker.max_tokens, 8_000);
        assert!(cfg.chunker.include_timestamps);
        assert_eq!(cfg.chunker.tokens_per_word, 1.3);
        assert_eq!(cfg.ollama.model, "mistral");
        validate(&cfg).expect("defaults validate");
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut cfg = DigestConfig::default();
        cfg.chunker.max_tokens = 0;
        assert!(matches!(
            validate(&cfg),
            Err(DigestError::InvalidChunkBudget(0))
        ));
    }

    #[test]
    fn non_http_host_is_rejected() {
        let mut cfg = DigestConfig::default();
        cfg.ollama.host = "localhost:11434".to_string();
        assert!(matches!(validate(&cfg), Err(DigestError::InvalidConfig(_))));
    }

    #[test]
    fn file_config_replaces_sections() {
        let tmp = tempdir().expect("tempdir");
        let paths = DigestPaths::rooted_at(tmp.path());
        fs::write(
            &paths.config_file,
            "[chunker]\nmax_tokens = 2000\ninclude_timestamps = false\n\n[ollama]\nhost = \"http://gpu:11434\"\nmodel = \"mistral:7b\"\n",
        )
        .expect("write config");

        let mut cfg = DigestConfig::default();
        merge_file_config(&mut cfg, &paths).expect("merge");
        assert_eq!(cfg.chunker.max_tokens, 2000);
        assert!(!cfg.chunker.include_timestamps);
        assert_eq!(cfg.chunker.tokens_per_word, 1.3);
        assert_eq!(cfg.ollama.host, "http://gpu:11434");
        assert_eq!(cfg.ollama.timeout_secs, 180);
        assert!(cfg.export.guilds.is_empty());
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let tmp = tempdir().expect("tempdir");
        let paths = DigestPaths::rooted_at(tmp.path());
        fs::write(
            &paths.config_file,
            "[chunker]\ninclude_timestamps = false\n\n[ollama]\nmodel = \"llama3\"\n",
        )
        .expect("write config");

        let mut cfg = DigestConfig::default();
        merge_file_config(&mut cfg, &paths).expect("merge");
        assert_eq!(cfg.chunker.max_tokens, 8_000);
        assert!(!cfg.chunker.include_timestamps);
        assert_eq!(cfg.ollama.host, "http://localhost:11434");
        assert_eq!(cfg.ollama.model, "llama3");
        validate(&cfg).expect("partial config validates");
    }

    #[test]
    fn export_section_reads_targets() {
        let tmp = tempdir().expect("tempdir");
        let paths = DigestPaths::rooted_at(tmp.path());
        fs::write(
            &paths.config_file,
            "[export]\nguilds = [\"123\"]\nchannels = [\"456\", \"789\"]\nafter_date = \"2024-01-01\"\n",
        )
        .expect("write config");

        let mut cfg = DigestConfig::default();
        merge_file_config(&mut cfg, &paths).expect("merge");
        assert_eq!(cfg.export.guilds, vec!["123"]);
        assert_eq!(cfg.export.channels.len(), 2);
        assert_eq!(cfg.export.after_date.as_deref(), Some("2024-01-01"));
        assert!(cfg.export.token.is_none());
    }

    #[test]
    fn malformed_file_config_is_a_config_error() {
        let tmp = tempdir().expect("tempdir");
        let paths = DigestPaths::rooted_at(tmp.path());
        fs::write(&paths.config_file, "[chunker\nmax_tokens = ").expect("write config");

        let mut cfg = DigestConfig::default();
        let err = merge_file_config(&mut cfg, &paths).expect_err("parse failure");
        assert!(err.to_string().contains("config file invalid"));
    }
}
