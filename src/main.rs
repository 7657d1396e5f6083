use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use agent_brain::api::{ApiState, job_routes};
use agent_brain::config::WorkerConfig;
use agent_brain::executors::{ExecutorRegistry, OpenHandsExecutor};
use agent_brain::llm::{LlmConfig, create_provider};
use agent_brain::pipeline::{JobProcessor, Router};
use agent_brain::queue::{JobQueue, MemoryQueue};
use agent_brain::skills::{
    CodeChangeSkill, FirebaseContextSkill, GitHubContextSkill, NetlifyDeploySkill,
    NotionReadSkill, NotionWriteSkill, SkillRegistry,
};
use agent_brain::tools::{FirebaseClient, GitHubClient, NetlifyClient, NotionClient};
use agent_brain::worker::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let llm_config = LlmConfig::from_env()?;
    let llm = create_provider(&llm_config)?;

    eprintln!("🧠 Agent Brain v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   API: http://0.0.0.0:{}/jobs", config.port);
    eprintln!("   Workers: {}", config.workers);

    // ── Executors ───────────────────────────────────────────────────────
    let mut executors = ExecutorRegistry::new();
    match OpenHandsExecutor::from_env() {
        Ok(openhands) => executors.register(Arc::new(openhands), true),
        Err(e) => warn!(error = %e, "OpenHands executor unavailable"),
    }
    let executors = Arc::new(executors);

    // ── Skills ──────────────────────────────────────────────────────────
    let skills = Arc::new(build_skills(executors)?);
    eprintln!("   Skills: {}", skills.list().join(", "));

    // ── Pipeline ────────────────────────────────────────────────────────
    let job_types = Arc::new(config.load_job_types()?);
    eprintln!("   Job types: {}", job_types.names().join(", "));

    let router = Router::new(llm).with_skill_catalog(skills.catalog());
    let processor = Arc::new(
        JobProcessor::new(router, Arc::clone(&skills), job_types)
            .with_config(config.pipeline_config()),
    );

    let queue: Arc<dyn JobQueue> =
        Arc::new(MemoryQueue::new().with_retention(config.retention));
    let pool = WorkerPool::spawn(Arc::clone(&queue), processor, config.workers);

    // ── API ─────────────────────────────────────────────────────────────
    let app = job_routes(ApiState {
        queue: Arc::clone(&queue),
        default_repo: config.default_repo.clone(),
        job_timeout: config.job_timeout,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind API port {}", config.port))?;
    info!(port = config.port, "Job API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let workers finish what is already queued.
    queue.close().await;
    pool.join().await;
    info!("Agent Brain stopped");
    Ok(())
}

/// Register every skill whose tool is configured.
fn build_skills(executors: Arc<ExecutorRegistry>) -> anyhow::Result<SkillRegistry> {
    let mut skills = SkillRegistry::new();

    let github = Arc::new(GitHubClient::from_env()?);
    skills.register(Arc::new(GitHubContextSkill::new(github)));

    match NetlifyClient::from_env() {
        Ok(netlify) => skills.register(Arc::new(NetlifyDeploySkill::new(Arc::new(netlify)))),
        Err(e) => warn!(error = %e, "Skipping netlify_deploy"),
    }

    match NotionClient::from_env() {
        Ok(notion) => {
            let notion = Arc::new(notion);
            skills.register(Arc::new(NotionReadSkill::new(Arc::clone(&notion))));
            skills.register(Arc::new(NotionWriteSkill::new(notion)));
        }
        Err(e) => warn!(error = %e, "Skipping notion_read and notion_write"),
    }

    match FirebaseClient::from_env() {
        Ok(firebase) => skills.register(Arc::new(FirebaseContextSkill::new(firebase))),
        Err(e) => warn!(error = %e, "Skipping firebase_context"),
    }

    if executors.default_name().is_some() {
        skills.register(Arc::new(CodeChangeSkill::new(executors)));
    } else {
        warn!("Skipping openhands_pr: no executor registered");
    }

    Ok(skills)
}

/// Stderr logging filtered by `RUST_LOG` (default `info`), plus a daily file
/// under `log_dir` when set. Keep the returned guard alive to flush the file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agent-brain.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
