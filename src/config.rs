use anyhow::{Context, Result};
use embedstore_core::chunk::{BoundaryPolicy, ChunkPolicy, TokenCounting};
use embedstore_core::hash::HashAlgorithm;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_part_tokens")]
    pub max_part_tokens: usize,
    /// `words` or `chars`.
    #[serde(default = "default_token_counting")]
    pub token_counting: String,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// `sentence` or `whitespace`.
    #[serde(default = "default_boundary")]
    pub boundary: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_part_tokens: default_max_part_tokens(),
            token_counting: default_token_counting(),
            chars_per_token: default_chars_per_token(),
            boundary: default_boundary(),
        }
    }
}

fn default_max_part_tokens() -> usize {
    512
}
fn default_token_counting() -> String {
    "words".to_string()
}
fn default_chars_per_token() -> usize {
    4
}
fn default_boundary() -> String {
    "sentence".to_string()
}

impl ChunkingConfig {
    /// Chunker policy described by this section. Assumes a validated config.
    pub fn policy(&self) -> ChunkPolicy {
        let counting = match self.token_counting.as_str() {
            "chars" => TokenCounting::ApproxChars {
                chars_per_token: self.chars_per_token,
            },
            _ => TokenCounting::Words,
        };
        let boundary = match self.boundary.as_str() {
            "whitespace" => BoundaryPolicy::Whitespace,
            _ => BoundaryPolicy::Sentence,
        };
        ChunkPolicy::new(self.max_part_tokens)
            .with_counting(counting)
            .with_boundary(boundary)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HashingConfig {
    #[serde(default)]
    pub algorithm: HashAlgorithm,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            timeout_ms: default_search_timeout_ms(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_min_similarity() -> f32 {
    -1.0
}
fn default_search_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: default_url(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_part_tokens == 0 {
        anyhow::bail!("chunking.max_part_tokens must be > 0");
    }
    match config.chunking.token_counting.as_str() {
        "words" => {}
        "chars" => {
            if config.chunking.chars_per_token == 0 {
                anyhow::bail!("chunking.chars_per_token must be > 0");
            }
        }
        other => anyhow::bail!(
            "Unknown chunking.token_counting: '{}'. Must be words or chars.",
            other
        ),
    }
    match config.chunking.boundary.as_str() {
        "sentence" | "whitespace" => {}
        other => anyhow::bail!(
            "Unknown chunking.boundary: '{}'. Must be sentence or whitespace.",
            other
        ),
    }

    // Validate search
    if config.search.top_k < 1 {
        anyhow::bail!("search.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.search.min_similarity) {
        anyhow::bail!("search.min_similarity must be in [-1.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/embstore.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_part_tokens, 512);
        assert_eq!(config.hashing.algorithm, HashAlgorithm::Sha2_256);
        assert_eq!(config.search.top_k, 10);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.chunking.policy(), ChunkPolicy::new(512));
    }

    #[test]
    fn test_chunking_policy_mapping() {
        let config = parse(
            r#"
[db]
path = "x.sqlite"

[chunking]
max_part_tokens = 50
token_counting = "chars"
chars_per_token = 3
boundary = "whitespace"

[hashing]
algorithm = "MD5"
"#,
        )
        .unwrap();
        let policy = config.chunking.policy();
        assert_eq!(policy.max_part_tokens, 50);
        assert_eq!(
            policy.counting,
            TokenCounting::ApproxChars { chars_per_token: 3 }
        );
        assert_eq!(policy.boundary, BoundaryPolicy::Whitespace);
        assert_eq!(config.hashing.algorithm, HashAlgorithm::Md5);
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = "[db]\npath = \"x.sqlite\"\n";
        assert!(parse(&format!("{}[chunking]\nmax_part_tokens = 0\n", base)).is_err());
        assert!(parse(&format!("{}[chunking]\nboundary = \"page\"\n", base)).is_err());
        assert!(parse(&format!("{}[search]\nmin_similarity = 2.0\n", base)).is_err());
        assert!(parse(&format!("{}[hashing]\nalgorithm = \"CRC32\"\n", base)).is_err());
        assert!(parse(&format!("{}[embedding]\nprovider = \"openai\"\n", base)).is_err());
        assert!(parse(&format!("{}[embedding]\nprovider = \"magic\"\n", base)).is_err());
    }
}
