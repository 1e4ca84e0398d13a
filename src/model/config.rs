use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const ENV_CONFIG_PATH: &str = "ASKFLOW_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_SEARCH_BASE_URL: &str = "https://html.duckduckgo.com/html/";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Search result domain filtering
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomainFilter {
    /// Allowed domains (whitelist). If empty, all domains are allowed.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Denied domains (blacklist). Applied before the allow list.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl DomainFilter {
    /// Check if a URL is allowed based on the allow/deny lists
    pub fn is_url_allowed(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        };

        if self.deny.iter().any(|d| host.contains(&d.to_lowercase())) {
            return false;
        }

        if self.allow.is_empty() {
            return true;
        }

        self.allow.iter().any(|a| host.contains(&a.to_lowercase()))
    }
}

/// Timeouts and limits for a pipeline run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tokens streamed before background verification starts
    pub verification_token_threshold: usize,
    pub verification_timeout_secs: f64,
    pub verification_retry_timeout_secs: f64,
    /// Bound for the end-of-stream verification of answers below the threshold
    pub short_answer_verification_timeout_secs: f64,
    pub verification_cancel_grace_secs: f64,
    pub cleanup_timeout_secs: f64,
    /// Per-search timeout; the whole search stage gets twice this
    pub search_timeout_secs: f64,
    pub retrieval_timeout_secs: f64,
    pub max_search_results: usize,
    pub sub_query_max_results: usize,
    pub max_sub_queries: usize,
    pub default_passage_limit: usize,
    pub fallback_pacing_ms: u64,
    pub fallback_pacing_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            verification_token_threshold: 10,
            verification_timeout_secs: 5.0,
            verification_retry_timeout_secs: 5.0,
            short_answer_verification_timeout_secs: 2.0,
            verification_cancel_grace_secs: 0.5,
            cleanup_timeout_secs: 1.0,
            search_timeout_secs: 10.0,
            retrieval_timeout_secs: 15.0,
            max_search_results: 10,
            sub_query_max_results: 5,
            max_sub_queries: 3,
            default_passage_limit: 6,
            fallback_pacing_ms: 10,
            fallback_pacing_every: 10,
        }
    }
}

impl PipelineConfig {
    pub fn search_stage_timeout(&self) -> Duration {
        secs(self.search_timeout_secs * 2.0)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        secs(self.retrieval_timeout_secs)
    }

    pub fn verification_timeout(&self) -> Duration {
        secs(self.verification_timeout_secs)
    }

    pub fn verification_retry_timeout(&self) -> Duration {
        secs(self.verification_retry_timeout_secs)
    }

    pub fn short_answer_verification_timeout(&self) -> Duration {
        secs(self.short_answer_verification_timeout_secs)
    }

    pub fn verification_cancel_grace(&self) -> Duration {
        secs(self.verification_cancel_grace_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        secs(self.cleanup_timeout_secs)
    }

    pub fn fallback_pacing(&self) -> Duration {
        Duration::from_millis(self.fallback_pacing_ms)
    }

    /// Result ceiling for a request asking for `passage_limit` passages
    pub fn search_ceiling(&self, passage_limit: usize) -> usize {
        (passage_limit * 2).min(self.max_search_results).max(1)
    }
}

/// Web search and page fetching settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub fetch_timeout: Duration,
    pub domains: DomainFilter,
}

/// OpenAI-compatible model endpoints
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub decomposition_model: String,
    pub claim_extraction_model: String,
    pub embedding_model: String,
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub domains: DomainFilter,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let port = env_parse("PORT").unwrap_or(DEFAULT_PORT);
        let host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());

        let config_path = std::env::var(ENV_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = Self::load_config_file(&config_path).unwrap_or_default();

        let mut pipeline = file.pipeline;
        if let Some(timeout) = env_parse("SEARCH_TIMEOUT_SECS") {
            pipeline.search_timeout_secs = timeout;
        }
        if let Some(max_results) = env_parse("MAX_SEARCH_RESULTS") {
            pipeline.max_search_results = max_results;
        }

        let search = SearchConfig {
            base_url: env_string("SEARCH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SEARCH_BASE_URL.to_string()),
            fetch_timeout: secs(env_parse("FETCH_TIMEOUT_SECS").unwrap_or(15.0)),
            domains: file.domains,
        };

        let chat_model =
            env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let llm = LlmConfig {
            base_url: env_string("LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            api_key: env_string("OPENAI_API_KEY"),
            decomposition_model: env_string("DECOMPOSITION_MODEL")
                .unwrap_or_else(|| chat_model.clone()),
            claim_extraction_model: env_string("CLAIM_EXTRACTION_MODEL")
                .unwrap_or_else(|| chat_model.clone()),
            embedding_model: env_string("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            chat_model,
        };

        Self {
            port,
            host,
            search,
            llm,
            pipeline,
        }
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::parse_config_file(&contents, path),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read config file, using defaults"
                );
                None
            }
        }
    }

    fn parse_config_file(contents: &str, path: &Path) -> Option<ConfigFile> {
        let contents = contents.trim();
        if contents.is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Some(ConfigFile::default());
        }

        match serde_yaml::from_str(contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                Some(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config file, using defaults"
                );
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_wins_over_allow() {
        let filter = DomainFilter {
            allow: vec!["example.com".to_string()],
            deny: vec!["ads.example.com".to_string()],
        };

        assert!(filter.is_url_allowed(&Url::parse("https://docs.example.com/x").unwrap()));
        assert!(!filter.is_url_allowed(&Url::parse("https://ads.example.com/x").unwrap()));
        assert!(!filter.is_url_allowed(&Url::parse("https://other.org/").unwrap()));
    }

    #[test]
    fn test_empty_allow_list_allows_everything() {
        let filter = DomainFilter::default();
        assert!(filter.is_url_allowed(&Url::parse("https://anything.dev/").unwrap()));
    }

    #[test]
    fn test_partial_pipeline_section_keeps_defaults() {
        let yaml = r#"
pipeline:
  verification_token_threshold: 20
domains:
  deny: [pinterest.com]
"#;
        let file = Config::parse_config_file(yaml, Path::new("test.yaml")).unwrap();

        assert_eq!(file.pipeline.verification_token_threshold, 20);
        assert_eq!(file.pipeline.retrieval_timeout(), Duration::from_secs(15));
        assert_eq!(file.domains.deny, vec!["pinterest.com".to_string()]);
    }

    #[test]
    fn test_search_ceiling() {
        let config = PipelineConfig::default();
        assert_eq!(config.search_ceiling(3), 6);
        assert_eq!(config.search_ceiling(6), 10);
        assert_eq!(config.search_stage_timeout(), Duration::from_secs(20));
    }
}
