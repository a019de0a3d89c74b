use std::path::{Path, PathBuf};
use std::time::Duration;

use fusion_providers::{ApiKey, GEMINI_API_BASE_URL, gemini::GeminiConfig, retry::RetryConfig};
use fusion_types::{NonEmptyStaticStr, NonEmptyString};
use serde::Deserialize;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-lite";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_QUOTA_PER_SESSION: u32 = 100;
const DEFAULT_RESET_HOURS: u32 = 24;
/// One leap year.
const MAX_RESET_HOURS: u32 = 24 * 366;
const DEFAULT_FALLBACK_NAME: NonEmptyStaticStr = NonEmptyStaticStr::new("Mystery Fog");
const DEFAULT_FUSION_SUFFIX: NonEmptyStaticStr = NonEmptyStaticStr::new("Blend");

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct FusionConfig {
    pub google: Option<GoogleConfig>,
    pub moderation: Option<ModerationConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub fallback: Option<FallbackConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Default, Deserialize)]
pub struct GoogleConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Defaults to `model`.
    pub moderation_model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field(
                "api_key",
                &if self.api_key.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("model", &self.model)
            .field("moderation_model", &self.moderation_model)
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// What to conclude when a configured moderation call cannot give a verdict.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Treat the content as unsafe.
    #[default]
    Closed,
    /// Treat the content as safe.
    Open,
}

#[derive(Debug, Deserialize)]
pub struct ModerationConfig {
    /// Master switch for the blocklist, tag filtering and model moderation.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocklist: Vec<String>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

#[derive(Debug, Default, Deserialize)]
pub struct RateLimitConfig {
    pub per_session: Option<u32>,
    pub reset_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FallbackConfig {
    pub name: Option<String>,
    pub emoji: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub limit_tags: Option<Vec<String>>,
    pub fusion_suffix: Option<String>,
    pub default_emoji: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    pub path: Option<String>,
}

/// Replace `${VAR}` with the variable's value (empty when unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&std::env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|raw| expand_env_vars(raw))
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

impl FusionConfig {
    /// Load `~/.fusion/config.toml`. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        toml::from_str(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, err);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }

    /// Remote generation settings, or `None` when no API key is configured
    /// in the file or in `GEMINI_API_KEY`.
    #[must_use]
    pub fn gemini(&self) -> Option<GeminiConfig> {
        let google = self.google.as_ref();
        let api_key = non_blank(google.and_then(|g| g.api_key.as_ref()))
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .and_then(ApiKey::new)?;

        let model = non_blank(google.and_then(|g| g.model.as_ref()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let mut config = GeminiConfig::new(api_key, model.clone());
        config.moderation_model =
            non_blank(google.and_then(|g| g.moderation_model.as_ref())).unwrap_or(model);
        config.base_url = non_blank(google.and_then(|g| g.base_url.as_ref()))
            .unwrap_or_else(|| GEMINI_API_BASE_URL.to_string());
        config.timeout = Duration::from_secs(
            google
                .and_then(|g| g.timeout_seconds)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );
        config.retry = RetryConfig::default().with_max_retries(
            google
                .and_then(|g| g.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
        );
        Some(config)
    }

    /// Database location: `[storage] path`, else `~/.fusion/fusion.db`.
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        non_blank(self.storage.as_ref().and_then(|s| s.path.as_ref()))
            .map(PathBuf::from)
            .or_else(|| data_dir().map(|dir| dir.join("fusion.db")))
    }
}

/// Element shown in place of unsafe output and when a session is out of quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackElement {
    pub name: NonEmptyString,
    pub emoji: String,
    pub description: String,
    /// Tags on the element substituted for unsafe output.
    pub tags: Vec<String>,
    /// Tags on the rate-limit placeholder.
    pub limit_tags: Vec<String>,
    /// Last word of simulated names: `"{A} {B} {suffix}"`.
    pub fusion_suffix: NonEmptyString,
    /// Simulation emoji when neither input has one.
    pub default_emoji: String,
}

impl Default for FallbackElement {
    fn default() -> Self {
        Self {
            name: DEFAULT_FALLBACK_NAME.into(),
            emoji: "🌀".to_string(),
            description: "Something unexpected swirls out of the mix.".to_string(),
            tags: vec!["safe".to_string(), "automatic".to_string()],
            limit_tags: vec!["limit".to_string()],
            fusion_suffix: DEFAULT_FUSION_SUFFIX.into(),
            default_emoji: "✨".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationSettings {
    pub enabled: bool,
    pub blocklist: Vec<String>,
    pub on_failure: FailurePolicy,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            blocklist: Vec::new(),
            on_failure: FailurePolicy::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Generations allowed per window.
    pub per_session: u32,
    pub window: chrono::Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_session: DEFAULT_QUOTA_PER_SESSION,
            window: chrono::Duration::hours(i64::from(DEFAULT_RESET_HOURS)),
        }
    }
}

/// Validated, immutable engine configuration. Resolved once per process and
/// handed to every component at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub moderation: ModerationSettings,
    pub rate_limit: RateLimitSettings,
    pub fallback: FallbackElement,
    /// Upper bound on one provider call, generation or moderation.
    pub provider_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            moderation: ModerationSettings::default(),
            rate_limit: RateLimitSettings::default(),
            fallback: FallbackElement::default(),
            provider_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &FusionConfig) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(moderation) = &config.moderation {
            settings.moderation = ModerationSettings {
                enabled: moderation.enabled,
                blocklist: moderation
                    .blocklist
                    .iter()
                    .map(|term| term.trim().to_string())
                    .filter(|term| !term.is_empty())
                    .collect(),
                on_failure: moderation.on_failure,
            };
        }

        if let Some(rate_limit) = &config.rate_limit {
            if let Some(per_session) = rate_limit.per_session {
                if per_session == 0 {
                    return Err(ConfigError::Invalid {
                        field: "rate_limit.per_session",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                settings.rate_limit.per_session = per_session;
            }
            if let Some(hours) = rate_limit.reset_hours {
                if hours == 0 || hours > MAX_RESET_HOURS {
                    return Err(ConfigError::Invalid {
                        field: "rate_limit.reset_hours",
                        reason: format!("must be between 1 and {MAX_RESET_HOURS}"),
                    });
                }
                settings.rate_limit.window = chrono::Duration::hours(i64::from(hours));
            }
        }

        if let Some(fallback) = &config.fallback {
            let target = &mut settings.fallback;
            if let Some(name) = &fallback.name {
                target.name = required("fallback.name", name)?;
            }
            if let Some(suffix) = &fallback.fusion_suffix {
                target.fusion_suffix = required("fallback.fusion_suffix", suffix)?;
            }
            if let Some(emoji) = &fallback.emoji {
                target.emoji = emoji.trim().to_string();
            }
            if let Some(description) = &fallback.description {
                target.description = description.trim().to_string();
            }
            if let Some(tags) = &fallback.tags {
                target.tags.clone_from(tags);
            }
            if let Some(tags) = &fallback.limit_tags {
                target.limit_tags.clone_from(tags);
            }
            if let Some(emoji) = &fallback.default_emoji {
                target.default_emoji = required("fallback.default_emoji", emoji)?.into_inner();
            }
        }

        if let Some(seconds) = config.google.as_ref().and_then(|g| g.timeout_seconds) {
            if seconds == 0 {
                return Err(ConfigError::Invalid {
                    field: "google.timeout_seconds",
                    reason: "must be greater than zero".to_string(),
                });
            }
            settings.provider_timeout = Duration::from_secs(seconds);
        }

        Ok(settings)
    }
}

fn required(field: &'static str, value: &str) -> Result<NonEmptyString, ConfigError> {
    NonEmptyString::new(value.trim()).map_err(|_| ConfigError::Invalid {
        field,
        reason: "must not be empty".to_string(),
    })
}

/// `~/.fusion`
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".fusion"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("config.toml"))
}
