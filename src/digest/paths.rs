use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DigestPaths {
    pub digest_home: PathBuf,
    pub config_file: PathBuf,
    pub logs_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub reports_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

impl DigestPaths {
    /// Layout under a single root, ignoring the environment.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            digest_home: root.to_path_buf(),
            config_file: root.join("digest.toml"),
            logs_dir: root.join("logs"),
            exports_dir: root.join("exports"),
            prompts_dir: root.join("prompts"),
            reports_dir: root.join("reports"),
        }
    }
}

pub fn resolve_paths() -> Result<DigestPaths> {
    let home = required_home_dir()?;
    let digest_home = env_or_default_path("DIGEST_HOME", home.join(".chat_digest"));
    let defaults = DigestPaths::rooted_at(&digest_home);

    Ok(DigestPaths {
        config_file: env_or_default_path("DIGEST_CONFIG_PATH", defaults.config_file),
        logs_dir: env_or_default_path("DIGEST_LOGS_DIR", defaults.logs_dir),
        exports_dir: env_or_default_path("DIGEST_EXPORTS_DIR", defaults.exports_dir),
        prompts_dir: env_or_default_path("DIGEST_PROMPTS_DIR", defaults.prompts_dir),
        reports_dir: env_or_default_path("DIGEST_REPORTS_DIR", defaults.reports_dir),
        digest_home,
    })
}
