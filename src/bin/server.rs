//! DeepAgent server - HTTP entry point for the orchestration runtime

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use deepagent::agent::{prompts, AgentLoop, LoopConfig, OpenAiCompatClient, SessionFacade};
use deepagent::blob::S3BlobStore;
use deepagent::checkpoint::{init_pool, migrations, PostgresCheckpointStore};
use deepagent::compaction::{CompactionConfig, CompactionEngine};
use deepagent::config::Config;
use deepagent::datasource::{CoinGeckoSource, JupiterSource};
use deepagent::sandbox::ContainerExecutor;
use deepagent::server::{build_router, AppState};
use deepagent::tokens::TokenAccountant;
use deepagent::tools::{ExecuteCodeTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "deepagent-server", about = "DeepAgent orchestration server")]
struct Args {
    /// Bind address (overrides BIND)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides PORT)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let args = Args::parse();

    // Missing required credentials abort here, before anything binds.
    let config = Config::from_env()?;

    // Checkpoint store
    let pool = init_pool(&config.database).await?;
    info!("Database connected");
    migrations::run(&pool).await?;
    info!("Migrations complete");
    let checkpoints = Arc::new(PostgresCheckpointStore::new(pool));

    // Chat provider and token accounting
    let provider = Arc::new(OpenAiCompatClient::new(config.provider.clone())?);
    let accountant = TokenAccountant::for_model(&config.provider.model);

    // Blob storage for the schema-discovery branch
    let blobs = Arc::new(S3BlobStore::from_env(&config.blob).await);

    // Tool registry: sandbox execution plus datasource-derived tools
    let mut registry = ToolRegistry::new();
    match ContainerExecutor::new(config.sandbox.clone()).await {
        Ok(executor) => registry.register(ExecuteCodeTool::new(Arc::new(executor))),
        Err(e) => warn!("Sandbox unavailable, execute_code disabled: {}", e),
    }
    registry.register_source(Arc::new(CoinGeckoSource::new()?));
    registry.register_source(Arc::new(JupiterSource::new()?));
    info!("Registered {} tools", registry.count());

    // Compaction engine
    let compactor = CompactionEngine::new(
        provider.clone(),
        blobs,
        accountant.clone(),
        CompactionConfig {
            model: config.provider.compaction_model.clone(),
            chunk_tokens: config.agent.chunk_tokens,
            key_prefix: config.blob.key_prefix.clone(),
            ..CompactionConfig::default()
        },
    );

    // Agent loop and session facade
    let agent_loop = AgentLoop::new(
        provider,
        Arc::new(registry),
        checkpoints.clone(),
        compactor,
        accountant,
        LoopConfig::from(&config.agent),
    );
    let facade = Arc::new(SessionFacade::new(
        agent_loop,
        checkpoints.clone(),
        prompts::system_prompt(),
    ));

    let app = build_router(AppState {
        facade,
        checkpoints,
    });

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("DeepAgent listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
