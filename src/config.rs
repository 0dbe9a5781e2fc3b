use std::path::PathBuf;

use crate::error::{Error, Result};

/// Which embedding backend the engine talks to, resolved from the
/// environment. Exactly one must be configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    /// Hosted provider, authenticated with an API key.
    Hosted { api_key: String },
    /// Local runtime reachable over plain HTTP, no credentials.
    Local { base_url: String },
    /// Remote endpoint speaking the hosted provider's wire format.
    Compatible { api_key: String, base_url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub workspace_root: PathBuf,
    pub provider: ProviderConfig,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub exclude_code_languages: Vec<String>,
    pub min_similarity: f32,
    pub max_results: usize,
    pub max_chunks_per_query: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub report_dir: Option<PathBuf>,
    pub max_session_results: usize,
    pub console_bind: String,
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dimension() -> usize {
    1536
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_similarity() -> f32 {
    0.3
}
fn default_max_results() -> usize {
    10
}
fn default_max_chunks_per_query() -> usize {
    50
}
fn default_include_patterns() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}
fn default_max_session_results() -> usize {
    20
}
fn default_console_bind() -> String {
    "127.0.0.1:7171".to_string()
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} is not a valid value: '{raw}'"))),
        None => Ok(default),
    }
}

fn env_csv(key: &str, default: Vec<String>) -> Vec<String> {
    match env_var(key) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default,
    }
}

impl Config {
    /// Load and validate configuration from the process environment.
    ///
    /// Fails with [`Error::Config`] when the database URL is missing, no
    /// embedding provider (or more than one) is configured, or a tuning
    /// value is out of range.
    pub fn from_env() -> Result<Self> {
        let database_url = env_var("SEMDEX_DATABASE_URL")
            .ok_or_else(|| Error::Config("SEMDEX_DATABASE_URL is required".into()))?;

        let workspace_root = match env_var("SEMDEX_WORKSPACE") {
            Some(p) => PathBuf::from(p),
            None => std::env::current_dir()
                .map_err(|e| Error::Config(format!("cannot resolve current directory: {e}")))?,
        };

        let provider = Self::resolve_provider()?;

        let chunk_size = env_parse("SEMDEX_CHUNK_SIZE", default_chunk_size())?;
        let chunk_overlap = env_parse("SEMDEX_CHUNK_OVERLAP", default_chunk_overlap())?;
        if chunk_size == 0 {
            return Err(Error::Config("SEMDEX_CHUNK_SIZE must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(
                "SEMDEX_CHUNK_OVERLAP must be smaller than SEMDEX_CHUNK_SIZE".into(),
            ));
        }

        let embedding_dimension = env_parse("SEMDEX_EMBEDDING_DIMENSION", default_dimension())?;
        if embedding_dimension == 0 {
            return Err(Error::Config("SEMDEX_EMBEDDING_DIMENSION must be > 0".into()));
        }

        let min_similarity = env_parse("SEMDEX_MIN_SIMILARITY", default_min_similarity())?;
        if !(-1.0..=1.0).contains(&min_similarity) {
            return Err(Error::Config(
                "SEMDEX_MIN_SIMILARITY must be in [-1.0, 1.0]".into(),
            ));
        }

        let max_results = env_parse("SEMDEX_MAX_RESULTS", default_max_results())?;
        if max_results == 0 {
            return Err(Error::Config("SEMDEX_MAX_RESULTS must be >= 1".into()));
        }

        let mut exclude_patterns = env_csv("SEMDEX_EXCLUDE_PATTERNS", Vec::new());
        let report_dir = env_var("SEMDEX_REPORT_DIR").map(PathBuf::from);
        if let Some(dir) = &report_dir {
            // Reports written under the workspace must never be re-indexed.
            exclude_patterns.push(format!("{}/**", dir.to_string_lossy().replace('\\', "/")));
        }

        Ok(Config {
            database_url,
            workspace_root,
            provider,
            embedding_model: env_var("SEMDEX_EMBEDDING_MODEL").unwrap_or_else(default_model),
            embedding_dimension,
            chunk_size,
            chunk_overlap,
            exclude_code_languages: env_csv("SEMDEX_EXCLUDE_CODE_LANGUAGES", Vec::new()),
            min_similarity,
            max_results,
            max_chunks_per_query: env_parse(
                "SEMDEX_MAX_CHUNKS_PER_QUERY",
                default_max_chunks_per_query(),
            )?,
            include_patterns: env_csv("SEMDEX_INCLUDE_PATTERNS", default_include_patterns()),
            exclude_patterns,
            report_dir,
            max_session_results: env_parse(
                "SEMDEX_MAX_SESSION_RESULTS",
                default_max_session_results(),
            )?,
            console_bind: env_var("SEMDEX_CONSOLE_BIND").unwrap_or_else(default_console_bind),
        })
    }

    fn resolve_provider() -> Result<ProviderConfig> {
        let hosted = env_var("SEMDEX_OPENAI_API_KEY");
        let local = env_var("SEMDEX_LOCAL_EMBEDDING_URL");
        let compat_key = env_var("SEMDEX_COMPAT_API_KEY");
        let compat_url = env_var("SEMDEX_COMPAT_BASE_URL");

        if compat_key.is_some() != compat_url.is_some() {
            return Err(Error::Config(
                "SEMDEX_COMPAT_API_KEY and SEMDEX_COMPAT_BASE_URL must be set together".into(),
            ));
        }

        let configured = [hosted.is_some(), local.is_some(), compat_key.is_some()]
            .iter()
            .filter(|b| **b)
            .count();
        match configured {
            0 => Err(Error::Config(
                "no embedding provider configured: set SEMDEX_OPENAI_API_KEY, \
                 SEMDEX_LOCAL_EMBEDDING_URL, or SEMDEX_COMPAT_API_KEY + SEMDEX_COMPAT_BASE_URL"
                    .into(),
            )),
            1 => {
                if let Some(api_key) = hosted {
                    Ok(ProviderConfig::Hosted { api_key })
                } else if let Some(base_url) = local {
                    Ok(ProviderConfig::Local { base_url })
                } else {
                    Ok(ProviderConfig::Compatible {
                        api_key: compat_key.unwrap(),
                        base_url: compat_url.unwrap(),
                    })
                }
            }
            _ => Err(Error::Config(
                "more than one embedding provider configured; pick exactly one".into(),
            )),
        }
    }
}
