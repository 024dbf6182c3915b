//! Graph-RAG question answering
//!
//! Answers natural-language questions against a Neo4j knowledge graph:
//! - heuristic guardrail in front of everything
//! - LLM-assisted planning and Cypher generation with a template fast-path
//! - defensive multi-layer query validation against a schema allow-list
//! - read-only execution, vector-augmented context, verified citations
//! - append-only audit trail and token-bucket LLM rate limiting

pub mod api;
pub mod audit;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod neo4j;
pub mod pipeline;
pub mod ratelimit;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub neo4j: Neo4jYamlConfig,
    pub llm: LlmYamlConfig,
    pub embedding: EmbeddingYamlConfig,
    pub guardrails: GuardrailsYamlConfig,
    pub audit: AuditYamlConfig,
    pub admin: AdminYamlConfig,
    /// Canonical schema term → synonyms, fed into the term index
    pub synonyms: BTreeMap<String, Vec<String>>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Neo4j configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "graphrag123".into(),
        }
    }
}

/// LLM provider section (any OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmYamlConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub rate_limit_per_minute: u32,
}

impl Default for LlmYamlConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/v1/chat/completions".into(),
            model: "llama3.1".into(),
            api_key: None,
            max_tokens: 512,
            rate_limit_per_minute: 60,
        }
    }
}

/// Embedding provider section (any OpenAI-compatible embeddings endpoint)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingYamlConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for EmbeddingYamlConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/v1/embeddings".into(),
            model: "nomic-embed-text".into(),
            api_key: None,
        }
    }
}

/// Runtime limits section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardrailsYamlConfig {
    pub query_timeout_secs: u64,
    pub request_budget_secs: u64,
    pub max_cypher_results: u32,
    pub max_traversal_depth: u32,
    pub min_similarity: f32,
    pub mapper_top_k: usize,
    pub retriever_top_k: usize,
    pub similarity_threshold: f32,
}

impl Default for GuardrailsYamlConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 10,
            request_budget_secs: 30,
            max_cypher_results: 25,
            max_traversal_depth: 2,
            min_similarity: 0.7,
            mapper_top_k: 5,
            retriever_top_k: 5,
            similarity_threshold: 0.0,
        }
    }
}

/// Audit sink section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditYamlConfig {
    pub path: String,
}

impl Default for AuditYamlConfig {
    fn default() -> Self {
        Self {
            path: "audit.jsonl".into(),
        }
    }
}

/// Admin / write-mode section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdminYamlConfig {
    pub mode: Option<String>,
    pub allow_writes: Option<bool>,
    pub token: Option<String>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Process mode: read-only request serving, or admin (refresh allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    ReadOnly,
    Admin,
}

impl AppMode {
    pub fn parse(s: &str) -> AppMode {
        if s.eq_ignore_ascii_case("admin") {
            AppMode::Admin
        } else {
            AppMode::ReadOnly
        }
    }
}

/// Runtime limits observed by the pipeline.
#[derive(Debug, Clone)]
pub struct Policy {
    pub query_timeout: Duration,
    pub request_budget: Duration,
    pub max_cypher_results: u32,
    pub max_traversal_depth: u32,
    pub min_similarity: f32,
    pub mapper_top_k: usize,
    pub retriever_top_k: usize,
    pub similarity_threshold: f32,
    pub llm_rate_limit_per_minute: u32,
    pub llm_max_tokens: u32,
}

impl Default for Policy {
    fn default() -> Self {
        let g = GuardrailsYamlConfig::default();
        Policy {
            query_timeout: Duration::from_secs(g.query_timeout_secs),
            request_budget: Duration::from_secs(g.request_budget_secs),
            max_cypher_results: g.max_cypher_results,
            max_traversal_depth: g.max_traversal_depth,
            min_similarity: g.min_similarity,
            mapper_top_k: g.mapper_top_k,
            retriever_top_k: g.retriever_top_k,
            similarity_threshold: g.similarity_threshold,
            llm_rate_limit_per_minute: LlmYamlConfig::default().rate_limit_per_minute,
            llm_max_tokens: LlmYamlConfig::default().max_tokens,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub server_port: u16,
    pub audit_path: String,
    pub mode: AppMode,
    pub allow_writes: bool,
    pub admin_token: Option<String>,
    pub dev_mode: bool,
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub policy: Policy,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let env = |name: &str| std::env::var(name).ok().filter(|s| !s.is_empty());
        let env_bool = |name: &str| {
            env(name).map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        };

        let g = yaml.guardrails;
        let policy = Policy {
            query_timeout: Duration::from_secs(g.query_timeout_secs),
            request_budget: Duration::from_secs(g.request_budget_secs),
            max_cypher_results: g.max_cypher_results,
            max_traversal_depth: g.max_traversal_depth,
            min_similarity: g.min_similarity,
            mapper_top_k: g.mapper_top_k,
            retriever_top_k: g.retriever_top_k,
            similarity_threshold: g.similarity_threshold,
            llm_rate_limit_per_minute: yaml.llm.rate_limit_per_minute,
            llm_max_tokens: yaml.llm.max_tokens,
        };

        let mode_str = env("APP_MODE")
            .or(yaml.admin.mode)
            .unwrap_or_else(|| "read_only".to_string());

        Ok(Self {
            neo4j_uri: env("NEO4J_URI").unwrap_or(yaml.neo4j.uri),
            neo4j_user: env("NEO4J_USER").unwrap_or(yaml.neo4j.user),
            neo4j_password: env("NEO4J_PASSWORD").unwrap_or(yaml.neo4j.password),
            llm_url: env("LLM_URL").unwrap_or(yaml.llm.url),
            llm_model: env("LLM_MODEL").unwrap_or(yaml.llm.model),
            llm_api_key: env("LLM_API_KEY").or(yaml.llm.api_key),
            embedding_url: env("EMBEDDING_URL").unwrap_or(yaml.embedding.url),
            embedding_model: env("EMBEDDING_MODEL").unwrap_or(yaml.embedding.model),
            embedding_api_key: env("EMBEDDING_API_KEY").or(yaml.embedding.api_key),
            server_port: env("SERVER_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.server.port),
            audit_path: env("AUDIT_PATH").unwrap_or(yaml.audit.path),
            mode: AppMode::parse(&mode_str),
            allow_writes: env_bool("ALLOW_WRITES")
                .or(yaml.admin.allow_writes)
                .unwrap_or(false),
            admin_token: env("ADMIN_TOKEN").or(yaml.admin.token),
            dev_mode: env_bool("DEV_MODE").unwrap_or(false),
            synonyms: yaml.synonyms,
            policy,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

// ============================================================================
// Shared application state
// ============================================================================

use audit::{AuditSink, JsonlAuditSink};
use embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
use llm::{HttpLlmClient, LlmClient, MockLlmClient};
use neo4j::{GraphStore, MockGraphStore, Neo4jClient};
use pipeline::augmentor::Augmentor;
use pipeline::executor::Executor;
use pipeline::generator::QueryGenerator;
use pipeline::mapper::SemanticMapper;
use pipeline::planner::Planner;
use pipeline::summariser::Summariser;
use pipeline::Pipeline;
use ratelimit::RateLimiter;
use schema::{SchemaCatalog, SchemaEmbedder};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub catalog: Arc<SchemaCatalog>,
    pub embedder: Arc<SchemaEmbedder>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Create application state with all services initialized.
    ///
    /// In dev mode (`DEV_MODE=true`) all external backends are replaced by
    /// deterministic in-process mocks, so the server runs fully offline.
    pub async fn new(config: Config) -> Result<Self> {
        let graph: Arc<dyn GraphStore> = if config.dev_mode {
            tracing::info!("dev mode: using in-memory graph store");
            Arc::new(MockGraphStore::with_student_schema())
        } else {
            Arc::new(
                Neo4jClient::new(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
                    .await?,
            )
        };

        let llm: Arc<dyn LlmClient> = if config.dev_mode {
            // One reply satisfying every structured schema keeps the offline
            // server answerable end to end
            Arc::new(MockLlmClient::with_default_reply(
                r#"{"names": [], "date_ranges": [], "topics": [],
                    "cypher": "MATCH (s:Student) RETURN s.id AS primary_id, s.fullName AS student LIMIT 10",
                    "params": {},
                    "summary": "Offline mode: results retrieved from the local store.",
                    "citations": []}"#,
            ))
        } else {
            Arc::new(HttpLlmClient::new(
                config.llm_url.clone(),
                config.llm_model.clone(),
                config.llm_api_key.clone(),
            ))
        };

        let provider: Arc<dyn EmbeddingProvider> = if config.dev_mode {
            Arc::new(MockEmbeddingProvider::default())
        } else {
            Arc::new(HttpEmbeddingProvider::new(
                config.embedding_url.clone(),
                config.embedding_model.clone(),
                config.embedding_api_key.clone(),
            ))
        };

        let audit: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::open(Path::new(
            &config.audit_path,
        ))?);

        Self::with_backends(config, graph, llm, provider, audit).await
    }

    /// Assemble state over explicit backends (used by tests and dev tooling).
    pub async fn with_backends(
        config: Config,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
        provider: Arc<dyn EmbeddingProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let policy = config.policy.clone();
        let limiter = Arc::new(RateLimiter::in_memory(policy.llm_rate_limit_per_minute));

        let catalog = Arc::new(SchemaCatalog::new(graph.clone(), config.synonyms.clone()));
        // Startup bootstrap: introspection only, no writes. A failure leaves
        // the empty snapshot published; an admin refresh recovers later.
        if let Err(e) = catalog.refresh().await {
            tracing::warn!(error = %e, "allow-list bootstrap failed, starting with empty snapshot");
        }

        let embedder = Arc::new(SchemaEmbedder::new(graph.clone(), provider.clone()));
        let mapper = Arc::new(SemanticMapper::new(embedder.clone(), policy.mapper_top_k));

        let pipeline = Arc::new(Pipeline {
            catalog: catalog.clone(),
            planner: Planner::new(
                llm.clone(),
                limiter.clone(),
                mapper,
                policy.min_similarity,
                256,
            ),
            generator: QueryGenerator::new(llm.clone(), limiter.clone(), policy.llm_max_tokens),
            executor: Executor::new(graph.clone()),
            augmentor: Augmentor::new(graph.clone(), provider.clone()),
            summariser: Summariser::new(llm, limiter, policy.llm_max_tokens),
            audit,
            policy,
            mode: config.mode,
            allow_writes: config.allow_writes,
        });

        Ok(Self {
            pipeline,
            catalog,
            embedder,
            config: Arc::new(config),
        })
    }
}

/// Start the HTTP server.
pub async fn start_server(config: Config) -> Result<()> {
    let port = config.server_port;
    let state = AppState::new(config).await?;
    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
