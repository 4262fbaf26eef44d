//! Configuration management for DeepAgent
//!
//! All configuration comes from environment variables (a `.env` file is
//! honored when present). Missing required credentials fail at startup,
//! before the server binds, never at request time.

use secrecy::SecretString;

use crate::error::{Error, Result};

/// Top-level runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat model provider settings
    pub provider: ProviderConfig,
    /// Checkpoint store settings
    pub database: DatabaseConfig,
    /// Blob storage settings
    pub blob: BlobConfig,
    /// Agent loop tunables
    pub agent: AgentConfig,
    /// Code-execution sandbox settings
    pub sandbox: SandboxConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

/// Chat model provider configuration (OpenAI-compatible endpoint)
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key for the model endpoint
    pub api_key: SecretString,
    /// Base URL of the chat completions API
    pub base_url: String,
    /// Model used by the planner loop
    pub model: String,
    /// Model used by the compaction engine (decision, summarizers, mergers)
    pub compaction_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Checkpoint store (PostgreSQL) configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: SecretString,
    /// Maximum pool connections
    pub max_connections: u32,
    /// Connection acquire timeout in seconds
    pub connect_timeout_secs: u64,
}

/// Blob storage (S3) configuration
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Bucket receiving raw tool payloads from the schema-discovery branch
    pub bucket: String,
    /// Key prefix for uploaded payloads
    pub key_prefix: String,
}

/// Agent loop tunables
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Token threshold above which a tool output enters the compaction engine
    pub compaction_threshold: usize,
    /// Chunk size in tokens for the compaction engine
    pub chunk_tokens: usize,
    /// Hard limit on loop state transitions per turn
    pub max_transitions: u32,
    /// Per-tool-invocation timeout in seconds
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            compaction_threshold: 15_000,
            chunk_tokens: 5_000,
            max_transitions: 50,
            tool_timeout_secs: 60,
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Image used for Python execution
    pub python_image: String,
    /// Image used for Node execution
    pub node_image: String,
    /// Memory limit, e.g. "256m"
    pub memory_limit: String,
    /// CPU limit in cores
    pub cpu_limit: f64,
    /// Execution timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            python_image: "python:3.12-slim".to_string(),
            node_image: "node:22-slim".to_string(),
            memory_limit: "256m".to_string(),
            cpu_limit: 0.5,
            timeout_secs: 60,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads `.env` if present. Returns `Error::Config` when a required
    /// variable is missing or malformed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = require_env("OPENAI_API_KEY")?;
        let database_url = require_env("DATABASE_URL")?;
        let bucket = require_env("BLOB_BUCKET")?;

        let config = Config {
            provider: ProviderConfig {
                api_key: SecretString::from(api_key),
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: env_or("AGENT_MODEL", "gpt-4o"),
                compaction_model: env_or("COMPACTION_MODEL", "gpt-4o-mini"),
                timeout_secs: env_parse_or("OPENAI_TIMEOUT", 120)?,
            },
            database: DatabaseConfig {
                url: SecretString::from(database_url),
                max_connections: env_parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
                connect_timeout_secs: env_parse_or("DATABASE_TIMEOUT", 30)?,
            },
            blob: BlobConfig {
                bucket,
                key_prefix: env_or("BLOB_KEY_PREFIX", "tool-payloads"),
            },
            agent: AgentConfig {
                compaction_threshold: env_parse_or("COMPACTION_THRESHOLD", 15_000)?,
                chunk_tokens: env_parse_or("COMPACTION_CHUNK_TOKENS", 5_000)?,
                max_transitions: env_parse_or("AGENT_MAX_TRANSITIONS", 50)?,
                tool_timeout_secs: env_parse_or("TOOL_TIMEOUT", 60)?,
            },
            sandbox: SandboxConfig {
                python_image: env_or("SANDBOX_PYTHON_IMAGE", "python:3.12-slim"),
                node_image: env_or("SANDBOX_NODE_IMAGE", "node:22-slim"),
                memory_limit: env_or("SANDBOX_MEMORY_LIMIT", "256m"),
                cpu_limit: env_parse_or("SANDBOX_CPU_LIMIT", 0.5)?,
                timeout_secs: env_parse_or("SANDBOX_TIMEOUT", 60)?,
            },
            server: ServerConfig {
                bind: env_or("BIND", "0.0.0.0"),
                port: env_parse_or("PORT", 8001)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.agent.chunk_tokens == 0 {
            return Err(Error::Config(
                "COMPACTION_CHUNK_TOKENS must be positive".to_string(),
            ));
        }
        if self.agent.compaction_threshold < self.agent.chunk_tokens {
            return Err(Error::Config(format!(
                "COMPACTION_THRESHOLD ({}) must be at least COMPACTION_CHUNK_TOKENS ({})",
                self.agent.compaction_threshold, self.agent.chunk_tokens
            )));
        }
        if self.agent.max_transitions == 0 {
            return Err(Error::Config(
                "AGENT_MAX_TRANSITIONS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("Missing required environment variable: {}", name)))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_defaults() {
        let agent = AgentConfig::default();
        assert_eq!(agent.compaction_threshold, 15_000);
        assert_eq!(agent.chunk_tokens, 5_000);
        assert_eq!(agent.max_transitions, 50);
    }

    #[test]
    fn validate_rejects_threshold_below_chunk_size() {
        let config = Config {
            provider: ProviderConfig {
                api_key: SecretString::from("k"),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o".to_string(),
                compaction_model: "gpt-4o-mini".to_string(),
                timeout_secs: 120,
            },
            database: DatabaseConfig {
                url: SecretString::from("postgres://localhost/test"),
                max_connections: 5,
                connect_timeout_secs: 30,
            },
            blob: BlobConfig {
                bucket: "bucket".to_string(),
                key_prefix: "tool-payloads".to_string(),
            },
            agent: AgentConfig {
                compaction_threshold: 100,
                chunk_tokens: 5_000,
                ..AgentConfig::default()
            },
            sandbox: SandboxConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1".to_string(),
                port: 8001,
            },
        };
        assert!(config.validate().is_err());
    }
}
