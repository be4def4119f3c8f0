//! Runtime configuration
//!
//! Settings are loaded from a `.env`-style file (current working directory
//! preferred, then the executable's directory) and overridden by process
//! environment variables. The orchestrator exposes a restricted read/update
//! surface over [`CONFIG_KEYS`]; unknown keys are silently dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{ConfigError, LlmRole};

/// Keys exposed through the configuration API.
pub const CONFIG_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "DB_DIALECT",
    "DB_HOST",
    "DB_PORT",
    "DB_USER",
    "DB_PASSWORD",
    "DB_NAME",
    "DB_CHARSET",
    "INSIGHT_ENGINE_API_KEY",
    "INSIGHT_ENGINE_BASE_URL",
    "INSIGHT_ENGINE_MODEL_NAME",
    "MEDIA_ENGINE_API_KEY",
    "MEDIA_ENGINE_BASE_URL",
    "MEDIA_ENGINE_MODEL_NAME",
    "QUERY_ENGINE_API_KEY",
    "QUERY_ENGINE_BASE_URL",
    "QUERY_ENGINE_MODEL_NAME",
    "REPORT_ENGINE_API_KEY",
    "REPORT_ENGINE_BASE_URL",
    "REPORT_ENGINE_MODEL_NAME",
    "FORUM_HOST_API_KEY",
    "FORUM_HOST_BASE_URL",
    "FORUM_HOST_MODEL_NAME",
    "KEYWORD_OPTIMIZER_API_KEY",
    "KEYWORD_OPTIMIZER_BASE_URL",
    "KEYWORD_OPTIMIZER_MODEL_NAME",
    "MINDSPIDER_API_KEY",
    "MINDSPIDER_BASE_URL",
    "MINDSPIDER_MODEL_NAME",
    "TAVILY_API_KEY",
    "BOCHA_BASE_URL",
    "BOCHA_WEB_SEARCH_API_KEY",
    "MAX_REFLECTIONS",
    "MAX_PARAGRAPHS",
    "SEARCH_TIMEOUT",
    "MAX_CONTENT_LENGTH",
    "DEFAULT_SEARCH_HOT_CONTENT_LIMIT",
    "DEFAULT_SEARCH_TOPIC_GLOBALLY_LIMIT_PER_TABLE",
    "DEFAULT_SEARCH_TOPIC_BY_DATE_LIMIT_PER_TABLE",
    "DEFAULT_GET_COMMENTS_FOR_TOPIC_LIMIT",
    "DEFAULT_SEARCH_TOPIC_ON_PLATFORM_LIMIT",
];

/// Resolved endpoint for one LLM role.
#[derive(Debug, Clone)]
pub struct RoleEndpoint {
    pub api_key: String,
    pub base_url: String,
    pub model_name: String,
}

/// Global runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    values: BTreeMap<String, String>,
    env_file: PathBuf,
}

impl Settings {
    /// Load settings from the resolved `.env` file plus process environment.
    pub fn load() -> Self {
        let env_file = resolve_env_file();
        Self::load_from(&env_file)
    }

    /// Load settings from an explicit `.env` path (used by tests).
    pub fn load_from(env_file: &Path) -> Self {
        let mut values = BTreeMap::new();

        if env_file.exists() {
            if let Ok(iter) = dotenvy::from_path_iter(env_file) {
                for item in iter.flatten() {
                    values.insert(item.0, item.1);
                }
            }
        }

        // Process environment wins over the file.
        for key in CONFIG_KEYS {
            if let Ok(value) = std::env::var(key) {
                values.insert((*key).to_string(), value);
            }
        }

        Self {
            values,
            env_file: env_file.to_path_buf(),
        }
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn host(&self) -> String {
        self.get("HOST").unwrap_or("0.0.0.0").to_string()
    }

    pub fn port(&self) -> u16 {
        self.get_parsed("PORT", 5000)
    }

    pub fn max_reflections(&self) -> u32 {
        self.get_parsed("MAX_REFLECTIONS", 3)
    }

    pub fn max_paragraphs(&self) -> u32 {
        self.get_parsed("MAX_PARAGRAPHS", 6)
    }

    /// Single search request timeout in seconds.
    pub fn search_timeout(&self) -> u64 {
        self.get_parsed("SEARCH_TIMEOUT", 240)
    }

    /// Maximum length of search content passed to a prompt.
    pub fn max_content_length(&self) -> usize {
        self.get_parsed("MAX_CONTENT_LENGTH", 500_000)
    }

    pub fn tavily_api_key(&self) -> Option<String> {
        self.get("TAVILY_API_KEY").map(|s| s.to_string())
    }

    /// Resolve API key, base URL, and model name for a role.
    ///
    /// Base URL and model fall back to per-role defaults; a missing API key
    /// is an error because the gateway cannot authenticate without it.
    pub fn role_endpoint(&self, role: LlmRole) -> Result<RoleEndpoint, ConfigError> {
        let prefix = role.env_prefix();
        let api_key = self
            .get(&format!("{prefix}_API_KEY"))
            .map(|s| s.to_string())
            .ok_or_else(|| ConfigError::MissingSetting(format!("{prefix}_API_KEY")))?;

        let (default_base, default_model) = role_defaults(role);
        let base_url = self
            .get(&format!("{prefix}_BASE_URL"))
            .unwrap_or(default_base)
            .trim_end_matches('/')
            .to_string();
        let model_name = self
            .get(&format!("{prefix}_MODEL_NAME"))
            .unwrap_or(default_model)
            .to_string();

        Ok(RoleEndpoint {
            api_key,
            base_url,
            model_name,
        })
    }

    /// All exposed configuration values, with empty strings for unset keys.
    pub fn exposed_values(&self) -> BTreeMap<String, String> {
        CONFIG_KEYS
            .iter()
            .map(|key| {
                (
                    (*key).to_string(),
                    self.values.get(*key).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }
}

fn role_defaults(role: LlmRole) -> (&'static str, &'static str) {
    match role {
        LlmRole::InsightEngine => ("https://api.moonshot.cn/v1", "kimi-k2-0711-preview"),
        LlmRole::MediaEngine => ("https://aihubmix.com/v1", "gemini-2.5-pro"),
        LlmRole::QueryEngine => ("https://api.deepseek.com", "deepseek-chat"),
        LlmRole::ReportEngine => ("https://aihubmix.com/v1", "gemini-2.5-pro"),
        LlmRole::ForumHost => ("https://api.siliconflow.cn/v1", "qwen-plus"),
        LlmRole::KeywordOptimizer => ("https://api.siliconflow.cn/v1", "qwen-plus"),
        LlmRole::MindSpider => ("https://api.deepseek.com", "deepseek-chat"),
    }
}

/// `.env` in the current working directory wins; otherwise fall back to the
/// executable's directory.
pub fn resolve_env_file() -> PathBuf {
    let cwd_env = PathBuf::from(".env");
    if cwd_env.exists() {
        return cwd_env;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .unwrap_or(cwd_env)
}

/// Persist configuration updates into the `.env` file.
///
/// Existing lines are updated in place, new keys are appended, keys outside
/// [`CONFIG_KEYS`] are silently dropped. Returns the keys that were applied.
pub fn update_env_values(
    env_file: &Path,
    updates: &BTreeMap<String, String>,
) -> Result<Vec<String>, ConfigError> {
    let mut lines: Vec<String> = if env_file.exists() {
        std::fs::read_to_string(env_file)
            .map_err(|e| ConfigError::EnvFileRead {
                path: env_file.display().to_string(),
                source: e,
            })?
            .lines()
            .map(|l| l.to_string())
            .collect()
    } else {
        Vec::new()
    };

    let mut key_indices = BTreeMap::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, _)) = trimmed.split_once('=') {
            key_indices.insert(key.trim().to_string(), i);
        }
    }

    let mut applied = Vec::new();
    for (key, value) in updates {
        if !CONFIG_KEYS.contains(&key.as_str()) {
            continue;
        }
        let formatted = format_env_value(value);
        let line = format!("{key}={formatted}");
        match key_indices.get(key) {
            Some(&i) => lines[i] = line,
            None => lines.push(line),
        }
        applied.push(key.clone());
    }

    if let Some(parent) = env_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::EnvFileWrite {
                path: env_file.display().to_string(),
                source: e,
            })?;
        }
    }
    std::fs::write(env_file, lines.join("\n") + "\n").map_err(|e| ConfigError::EnvFileWrite {
        path: env_file.display().to_string(),
        source: e,
    })?;

    Ok(applied)
}

/// Quote values containing whitespace or `#`, escaping embedded quotes.
fn format_env_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.contains(' ') || value.contains('\n') || value.contains('#') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_without_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join(".env"));
        assert_eq!(settings.port(), 5000);
        assert_eq!(settings.max_reflections(), 3);
        assert_eq!(settings.max_paragraphs(), 6);
        assert_eq!(settings.search_timeout(), 240);
    }

    #[test]
    #[serial]
    fn role_endpoint_requires_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "QUERY_ENGINE_API_KEY=sk-test\n").unwrap();
        let settings = Settings::load_from(&env);

        let endpoint = settings.role_endpoint(LlmRole::QueryEngine).unwrap();
        assert_eq!(endpoint.api_key, "sk-test");
        assert_eq!(endpoint.base_url, "https://api.deepseek.com");
        assert_eq!(endpoint.model_name, "deepseek-chat");

        assert!(settings.role_endpoint(LlmRole::ForumHost).is_err());
    }

    #[test]
    #[serial]
    fn update_preserves_comments_and_drops_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "# local overrides\nPORT=5001\n").unwrap();

        let mut updates = BTreeMap::new();
        updates.insert("PORT".to_string(), "5002".to_string());
        updates.insert("HOST".to_string(), "127.0.0.1".to_string());
        updates.insert("NOT_A_KEY".to_string(), "x".to_string());

        let applied = update_env_values(&env, &updates).unwrap();
        assert_eq!(applied, vec!["HOST".to_string(), "PORT".to_string()]);

        let content = std::fs::read_to_string(&env).unwrap();
        assert!(content.contains("# local overrides"));
        assert!(content.contains("PORT=5002"));
        assert!(content.contains("HOST=127.0.0.1"));
        assert!(!content.contains("NOT_A_KEY"));

        let settings = Settings::load_from(&env);
        assert_eq!(settings.port(), 5002);
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        assert_eq!(format_env_value("plain"), "plain");
        assert_eq!(format_env_value("two words"), "\"two words\"");
    }
}
