//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_VECTOR__URI`). `Settings` is the
//! typed view with defaults for every key.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        // legacy switch honored by the embedder crate as well
        if env_flag("APP_USE_FAKE_EMBEDDINGS") {
            settings.embed.fake = true;
        }
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        let settings = self.settings()?;
        if settings.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()).into());
        }
        if settings.search.oversampling < 1.0 {
            return Err(Error::InvalidConfig("search.oversampling must be >= 1.0".into()).into());
        }
        match env {
            "prod" | "production" if settings.embed.fake => {
                Err(Error::InvalidConfig("fake embeddings are not allowed in production".into()).into())
            }
            _ => Ok(()),
        }
    }
}

pub fn env_flag(name: &str) -> bool {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: String,
    pub output_dir: String,
    pub batch_size: usize,
    pub dpi: u16,
    pub vector: VectorSettings,
    pub search: SearchSettings,
    pub embed: EmbedSettings,
    pub completion: CompletionSettings,
    pub progress: ProgressSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            output_dir: "./temp_images".to_string(),
            batch_size: 4,
            dpi: 350,
            vector: VectorSettings::default(),
            search: SearchSettings::default(),
            embed: EmbedSettings::default(),
            completion: CompletionSettings::default(),
            progress: ProgressSettings::default(),
        }
    }
}

impl Settings {
    pub fn data_dir(&self) -> PathBuf { expand_path(&self.data_dir) }
    pub fn output_dir(&self) -> PathBuf { expand_path(&self.output_dir) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    /// `:memory:` selects the in-process store, anything else is a LanceDB path.
    pub uri: String,
    pub collection: String,
    pub dim: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self { uri: ":memory:".to_string(), collection: "colpali-documents".to_string(), dim: 128 }
    }
}

impl VectorSettings {
    pub fn is_memory(&self) -> bool { self.uri == ":memory:" }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub timeout_secs: u64,
    pub rescore: bool,
    pub oversampling: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_limit: 5, timeout_secs: 100, rescore: true, oversampling: 2.0 }
    }
}

impl SearchSettings {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSettings {
    pub model_dir: Option<String>,
    /// `auto`, `cpu`, `cuda` or `metal`
    pub device: String,
    /// `bf16`, `f16` or `f32`
    pub dtype: String,
    pub fake: bool,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self { model_dir: None, device: "auto".to_string(), dtype: "bf16".to_string(), fake: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub deployment: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: "2024-12-01-preview".to_string(),
            deployment: None,
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 10_000,
            timeout_secs: 120,
        }
    }
}

impl CompletionSettings {
    /// Names of required keys that are unset or blank.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.endpoint) { missing.push("completion.endpoint"); }
        if blank(&self.api_key) { missing.push("completion.api_key"); }
        if blank(&self.deployment) { missing.push("completion.deployment"); }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub poll_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub buffer: usize,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self { poll_interval_ms: 1000, join_timeout_ms: 5000, buffer: 64 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.batch_size, 4);
        assert_eq!(s.dpi, 350);
        assert!(s.vector.is_memory());
        assert_eq!(s.vector.collection, "colpali-documents");
        assert_eq!(s.search.default_limit, 5);
        assert!(s.search.oversampling >= 2.0);
        assert_eq!(s.progress.poll_interval_ms, 1000);
    }

    #[test]
    fn toml_overrides_nested_keys() {
        let toml = r#"
            batch_size = 8
            [vector]
            uri = "/tmp/lance"
            [completion]
            endpoint = "https://example.openai.azure.com"
        "#;
        let cfg = Config::from_figment(Figment::new().merge(Toml::string(toml)));
        let s = cfg.settings().unwrap();
        assert_eq!(s.batch_size, 8);
        assert_eq!(s.vector.uri, "/tmp/lance");
        assert_eq!(s.vector.dim, 128, "untouched keys keep defaults");
        assert_eq!(s.completion.missing_keys(), vec!["completion.api_key", "completion.deployment"]);
        let limit: usize = cfg.get("search.default_limit").unwrap();
        assert_eq!(limit, 5);
    }

    #[test]
    fn resolve_relative_against_base() {
        let base = Path::new("/srv/pagerag");
        assert_eq!(resolve_with_base(base, "temp_images"), base.join("temp_images"));
        assert_eq!(resolve_with_base(base, "/abs/dir"), PathBuf::from("/abs/dir"));
    }
}
