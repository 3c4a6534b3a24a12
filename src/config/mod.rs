use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis_url: Option<String>,
    pub qdrant: QdrantConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingConfig,
    pub retrieval: RetrievalDefaults,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
    /// Explicit per-request deadline for a generation round-trip. The caller
    /// blocks on this, so it is enforced here rather than at the transport.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalDefaults {
    pub min_score: f64,
    pub learned_min_score: f64,
    pub general_limit: usize,
    pub learned_limit: usize,
    pub history_token_budget: usize,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            learned_min_score: 0.75,
            general_limit: 5,
            learned_limit: 3,
            history_token_budget: 2048,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    /// Loads configuration from the environment (after `dotenvy` has run).
    pub fn from_env() -> Self {
        let smtp = match (
            std::env::var("SMTP_HOST"),
            std::env::var("SMTP_USERNAME"),
            std::env::var("SMTP_PASSWORD"),
        ) {
            (Ok(host), Ok(username), Ok(password)) => Some(SmtpConfig {
                host,
                port: env_or("SMTP_PORT", "587").parse().unwrap_or(587),
                username,
                password,
                from_address: env_or("SMTP_FROM", "support@localhost"),
            }),
            _ => None,
        };

        Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "127.0.0.1"),
                port: env_or("SERVER_PORT", "8080").parse().unwrap_or(8080),
            },
            database: DatabaseConfig {
                url: env_or(
                    "DATABASE_URL",
                    "postgres://supportdesk:@localhost:5432/supportdesk",
                ),
            },
            redis_url: std::env::var("REDIS_URL").ok(),
            qdrant: QdrantConfig {
                url: env_or("QDRANT_URL", "http://localhost:6334"),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            },
            llm: LlmConfig {
                provider: env_or("LLM_PROVIDER", "openai"),
                api_key: env_or("LLM_API_KEY", ""),
                base_url: std::env::var("LLM_BASE_URL").ok(),
                fallback_provider: std::env::var("LLM_FALLBACK_PROVIDER").ok(),
                fallback_model: std::env::var("LLM_FALLBACK_MODEL").ok(),
                request_timeout: Duration::from_secs(
                    env_or("LLM_TIMEOUT_SECS", "45").parse().unwrap_or(45),
                ),
            },
            embeddings: EmbeddingConfig {
                provider: env_or("EMBEDDING_PROVIDER", "local"),
                endpoint: env_or("EMBEDDING_ENDPOINT", "http://localhost:8082"),
                api_key: std::env::var("EMBEDDING_API_KEY").ok(),
                dimensions: env_or("EMBEDDING_DIMENSIONS", "384").parse().unwrap_or(384),
            },
            retrieval: RetrievalDefaults {
                min_score: env_or("RETRIEVAL_MIN_SCORE", "0.5").parse().unwrap_or(0.5),
                learned_min_score: env_or("LEARNED_MIN_SCORE", "0.75")
                    .parse()
                    .unwrap_or(0.75),
                general_limit: env_or("RETRIEVAL_LIMIT", "5").parse().unwrap_or(5),
                learned_limit: env_or("LEARNED_LIMIT", "3").parse().unwrap_or(3),
                history_token_budget: env_or("HISTORY_TOKEN_BUDGET", "2048")
                    .parse()
                    .unwrap_or(2048),
            },
            smtp,
        }
    }
}
