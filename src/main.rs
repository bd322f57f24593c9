// src/main.rs
// Process bootstrap only; everything else lives in the library crate so
// `tests/` can exercise it directly.

use anyhow::{Context, Result};
use clap::Parser;
use infrallm::audit::AuditLogger;
use infrallm::auth::{self, AuthConfig};
use infrallm::chat_task::ChatTaskManager;
use infrallm::cli::{Cli, Commands, PolicyCommands, TokenCommands};
use infrallm::config::Config;
use infrallm::crypto::CredentialCipher;
use infrallm::db::Db;
use infrallm::executor::CommandExecutor;
use infrallm::http;
use infrallm::hubs::{CommandHub, HubRegistry};
use infrallm::jobs::JobEngine;
use infrallm::llm::orchestrator::{Orchestrator, OrchestratorConfig};
use infrallm::llm::provider::AnthropicProvider;
use infrallm::mcp::registry::McpRegistry;
use infrallm::mcp::stdio_cache::StdioCache;
use infrallm::policy::PolicyEngine;
use infrallm::ssh::SshPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry};

const PLACEHOLDER_JWT_SECRET: &str = "CHANGE_ME_dev_only_jwt_secret";

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = Cli::parse();

    let log_level = cli_args.log_level.map(|l| l.as_str().to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_line_number(true))
        .init();

    info!("infrallmd starting");

    let config = Config::load(cli_args.config.as_deref()).context("failed to load configuration")?;
    config.validate_for_production()?;

    let db = Db::open(&config.database.url).context("failed to open database")?;
    db.migrate().context("failed to apply schema")?;

    let auth_config = AuthConfig {
        jwt_secret: config.jwt.secret.clone().unwrap_or_else(|| PLACEHOLDER_JWT_SECRET.to_string()),
        issuer: config.jwt.issuer.clone().unwrap_or_else(|| "infrallm".to_string()),
        audience: config.jwt.audience.clone().unwrap_or_else(|| "infrallm-api".to_string()),
    };
    if auth_config.jwt_secret == PLACEHOLDER_JWT_SECRET {
        tracing::warn!("JWT_SECRET not configured; using an insecure development placeholder");
    }

    let master_key = config
        .credential_encryption
        .master_key
        .clone()
        .unwrap_or_else(|| "CHANGE_ME_dev_only_master_key".to_string());
    let cipher = CredentialCipher::new(&master_key);

    let policy = Arc::new(PolicyEngine::new(db.clone()));
    let audit = AuditLogger::new(db.clone());

    let ssh = SshPool::new(
        db.clone(),
        cipher.clone(),
        config.ssh.max_clients_per_host,
        Duration::from_secs(config.ssh.idle_reap_minutes * 60),
        Duration::from_secs(config.ssh.connect_timeout_seconds),
        Duration::from_secs(config.ssh.command_timeout_seconds),
    );
    ssh.spawn_idle_reaper();
    if config.health_check.enabled {
        ssh.spawn_health_check_loop(Duration::from_secs(config.health_check.interval_seconds));
    }

    let executor = CommandExecutor::new(db.clone(), Arc::clone(&policy), Arc::clone(&ssh), audit.clone());

    let stdio_cache = StdioCache::new(db.clone(), Duration::from_secs(config.mcp.stdio_idle_timeout_minutes * 60));
    stdio_cache.spawn_janitor();
    stdio_cache.warmup().await;

    let mcp = Arc::new(McpRegistry::new(
        db.clone(),
        cipher.clone(),
        Arc::clone(&stdio_cache),
        Duration::from_secs(config.mcp.tool_list_cache_seconds),
    ));

    let provider = Arc::new(AnthropicProvider::new(
        config.llm.provider_api_key.clone().unwrap_or_default(),
        config.llm.provider_base_url.clone(),
        Duration::from_secs(config.llm.request_timeout_seconds),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        executor.clone(),
        Arc::clone(&mcp),
        provider,
        audit.clone(),
        OrchestratorConfig {
            default_model: config.llm.default_model.clone(),
            max_tool_iterations: config.llm.max_tool_iterations,
            max_turn_wall_clock: Duration::from_secs(config.llm.max_turn_wall_clock_seconds),
        },
    ));

    let chat_tasks = Arc::new(ChatTaskManager::new());

    let jobs = JobEngine::new(
        db.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&chat_tasks),
        audit.clone(),
        Duration::from_secs(config.jobs.cron_poll_interval_seconds),
    );

    let hubs = HubRegistry::new();
    let command_hub = CommandHub::new(hubs.clone());

    let state = http::AppState {
        db: db.clone(),
        auth_config,
        cipher,
        policy: Arc::clone(&policy),
        ssh: Arc::clone(&ssh),
        audit: audit.clone(),
        executor,
        orchestrator: Arc::clone(&orchestrator),
        mcp,
        mcp_stdio_cache: stdio_cache,
        chat_tasks,
        jobs: Arc::clone(&jobs),
        hubs,
        command_hub,
    };

    match cli_args.command {
        Some(Commands::Serve) | None => serve(state, jobs, &config).await,
        Some(Commands::Migrate) => {
            info!("schema applied, exiting");
            Ok(())
        }
        Some(Commands::Policy { command: PolicyCommands::Check { user, host, command } }) => {
            let user_row = db.get_user_by_id(user)?.context("user not found")?;
            let decision = policy.validate_command(user_row.organization_id, user_row.id, host, &command)?;
            println!("{decision:?}");
            Ok(())
        }
        Some(Commands::Token { command: TokenCommands::Create { user, label } }) => {
            let user_row = db.get_user_by_id(user)?.context("user not found")?;
            let (token, hash) = auth::generate_access_token();
            db.create_access_token(user_row.organization_id, user_row.id, &label, &hash, None)?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(state: http::AppState, jobs: Arc<JobEngine>, config: &Config) -> Result<()> {
    jobs.spawn_scheduler();

    let chat_tasks = Arc::clone(&state.chat_tasks);
    let app = http::router(state, &config.cors.allowed_origins);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "listening");

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!(grace_seconds = grace.as_secs(), "shutdown signal received, draining connections");
        })
        .await
        .context("server error")?;

    info!(grace_seconds = grace.as_secs(), "canceling in-flight chat tasks before exit");
    if tokio::time::timeout(grace, chat_tasks.cancel_all()).await.is_err() {
        tracing::warn!("chat tasks did not finish within the shutdown grace period, exiting anyway");
    }

    Ok(())
}
