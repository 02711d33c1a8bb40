use ada_api::{create_app, start_janitor_task, AppState, Config};
use ada_orchestrator::db::{backup_database, create_pool, run_migrations};
use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = ada_logging::init_subscriber();

    info!("Starting ada-api service...");

    let config = Config::load()?;
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let state = AppState::production(pool, &config);

    if !config.catalog.is_empty() {
        config.catalog.apply(state.store()).await?;
    }

    // Settle work interrupted by the previous process before serving
    let report = state.machines.reconcile().await?;
    info!(
        failed_provisioning = report.failed_provisioning.len(),
        redispatched_deleting = report.redispatched_deleting.len(),
        failed_deleting = report.failed_deleting.len(),
        failed_jobs = report.failed_jobs,
        "Startup reconciliation complete"
    );

    tokio::spawn(start_janitor_task(
        state.machines.clone(),
        config.expiry.clone(),
        config.expiry_dry_run,
        config.janitor_interval_secs,
    ));

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
