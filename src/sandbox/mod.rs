//! Secure code execution for the `execute_code` tool
//!
//! Runs model-supplied code in ephemeral Docker containers with a memory
//! bound, a CPU bound, and the network disabled.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{Error, Result};

/// Languages the sandbox accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Node,
}

impl std::str::FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "node" | "javascript" | "js" => Ok(Language::Node),
            _ => Err(Error::InvalidInput(format!("Unsupported language: {}", s))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Node => write!(f, "node"),
        }
    }
}

/// Request to execute code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,
    /// Package requirements installed before execution
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Programming language
    pub language: Language,
}

/// Result of code execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

/// Trait for code execution backends
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute code and collect its output
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult>;
}

/// Docker container executor
pub struct ContainerExecutor {
    docker: Docker,
    config: SandboxConfig,
}

impl ContainerExecutor {
    /// Create a new container executor, verifying the Docker connection
    pub async fn new(config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| Error::Container(format!("Docker ping failed: {}", e)))?;

        info!("Container executor connected to Docker");
        Ok(ContainerExecutor { docker, config })
    }

    fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.config.python_image,
            Language::Node => &self.config.node_image,
        }
    }

    /// Build the in-container command: best-effort requirement install
    /// followed by the code itself. Installs fail harmlessly to stderr when
    /// the image lacks the packages, since the network is disabled.
    fn build_command(&self, request: &ExecutionRequest) -> Vec<String> {
        let run = match request.language {
            Language::Python => {
                if request.requirements.is_empty() {
                    format!("python3 -c {}", shell_quote(&request.code))
                } else {
                    format!(
                        "pip install --quiet {} ; python3 -c {}",
                        request.requirements.join(" "),
                        shell_quote(&request.code)
                    )
                }
            }
            Language::Node => {
                if request.requirements.is_empty() {
                    format!("node -e {}", shell_quote(&request.code))
                } else {
                    format!(
                        "npm install --silent {} ; node -e {}",
                        request.requirements.join(" "),
                        shell_quote(&request.code)
                    )
                }
            }
        };
        vec!["sh".to_string(), "-c".to_string(), run]
    }

    async fn wait_for_container(&self, name: &str) -> Result<i32> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(name, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code as i32),
            Some(Err(e)) => Err(Error::Container(format!("Wait failed: {}", e))),
            None => Err(Error::Container("Container wait stream ended".to_string())),
        }
    }

    async fn get_container_logs(&self, name: &str) -> Result<(String, String)> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));

        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Err(e) => warn!("Error reading logs: {}", e),
                _ => {}
            }
        }
        Ok((stdout, stderr))
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| Error::Container(format!("Failed to remove container: {}", e)))?;
        debug!("Removed container: {}", name);
        Ok(())
    }
}

#[async_trait]
impl CodeExecutor for ContainerExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let container_name = format!("deepagent-exec-{}", uuid::Uuid::new_v4());
        let memory = parse_memory_limit(&self.config.memory_limit);

        let container_config = Config {
            image: Some(self.image_for(request.language).to_string()),
            cmd: Some(self.build_command(&request)),
            network_disabled: Some(true),
            host_config: Some(bollard::service::HostConfig {
                memory,
                nano_cpus: Some((self.config.cpu_limit * 1_000_000_000.0) as i64),
                network_mode: Some("none".to_string()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: &container_name,
            platform: None,
        };
        self.docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        debug!("Created container: {}", container_name);

        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("Failed to start container: {}", e)))?;

        let wait_result = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.wait_for_container(&container_name),
        )
        .await;

        let (stdout, mut stderr) = self.get_container_logs(&container_name).await?;
        self.remove_container(&container_name).await?;

        match wait_result {
            Ok(Ok(_exit_code)) => Ok(ExecutionResult { stdout, stderr }),
            Ok(Err(e)) => {
                stderr.push_str(&format!("\n{}", e));
                Ok(ExecutionResult { stdout, stderr })
            }
            Err(_) => {
                warn!("Container execution timed out");
                stderr.push_str("\nExecution timed out");
                Ok(ExecutionResult { stdout, stderr })
            }
        }
    }
}

/// Single-quote a string for `sh -c`
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parse a memory limit string (e.g., "256m", "1g") to bytes
fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.to_lowercase();
    let (num_str, unit) = if limit.ends_with('g') || limit.ends_with("gb") {
        (limit.trim_end_matches(|c| c == 'g' || c == 'b'), "g")
    } else if limit.ends_with('m') || limit.ends_with("mb") {
        (limit.trim_end_matches(|c| c == 'm' || c == 'b'), "m")
    } else if limit.ends_with('k') || limit.ends_with("kb") {
        (limit.trim_end_matches(|c| c == 'k' || c == 'b'), "k")
    } else {
        (limit.as_str(), "b")
    };

    let num: i64 = num_str.parse().ok()?;
    Some(match unit {
        "g" => num * 1024 * 1024 * 1024,
        "m" => num * 1024 * 1024,
        "k" => num * 1024,
        _ => num,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parsing() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("js".parse::<Language>().unwrap(), Language::Node);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn memory_limits_parse_to_bytes() {
        assert_eq!(parse_memory_limit("256m"), Some(256 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("oops"), None);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("print('hi')"), r"'print('\''hi'\'')'");
    }
}
