use std::sync::Arc;

use anyhow::Context;
use db::DBService;
use server::{routes, state::AppState};
use services::services::{
    config::Config,
    dispatcher::Dispatcher,
    execution::ExecutionService,
    notify::{HttpChatTransport, NotificationService},
    registry::ProjectRegistry,
};
use tracing_subscriber::EnvFilter;
use utils::assets::{config_path, registry_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load_or_default(&config_path());

    let registry_file = registry_path();
    if !registry_file.exists() {
        std::fs::write(&registry_file, "{\"projects\": []}\n")
            .context("could not seed empty project registry")?;
    }
    let registry = Arc::new(
        ProjectRegistry::load(&registry_file).context("could not load project registry")?,
    );
    let _registry_watch = ProjectRegistry::watch(registry.clone())
        .context("could not watch project registry")?;
    tracing::info!(
        projects = registry.snapshot().len(),
        path = %registry_file.display(),
        "project registry loaded"
    );

    let db = DBService::new().await.context("could not open task store")?;

    let notifier = match config.chat.resolved_token() {
        Some(token) => NotificationService::new(Arc::new(HttpChatTransport::new(
            config.chat.base_url.clone(),
            Some(token),
        ))),
        None => {
            tracing::warn!("no chat token configured, notifications will only be logged");
            NotificationService::disabled()
        }
    };

    let execution = ExecutionService::new(
        db.clone(),
        registry.clone(),
        notifier.clone(),
        config.clone(),
    );

    // Reconcile tasks a previous supervisor left behind, then start
    // draining the queue.
    let orphaned = execution.recover_orphans().await?;
    if orphaned > 0 {
        tracing::warn!(count = orphaned, "finalized orphaned tasks from previous run");
    }
    let _supervisor = execution.spawn_supervisor();
    execution.enqueue();

    let dispatcher = Dispatcher::new(db.clone(), registry.clone(), notifier, execution);

    let state = AppState {
        db,
        registry,
        dispatcher,
        config: Arc::new(config.clone()),
    };
    let app = routes::router().with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    tracing::info!(%addr, "dispatchd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
