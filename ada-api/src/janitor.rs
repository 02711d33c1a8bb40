use ada_orchestrator::{ExpiryRule, MachineOrchestrator};
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodically destroy `READY` machines older than their group's limit.
pub async fn start_janitor_task(
    machines: MachineOrchestrator,
    rules: Vec<ExpiryRule>,
    dry_run: bool,
    interval_secs: u64,
) {
    if rules.is_empty() {
        info!("No expiry rules configured, janitor disabled");
        return;
    }

    let mut interval = interval(Duration::from_secs(interval_secs.max(1)));

    info!(
        "Janitor task running (checks every {} seconds, {} rules)",
        interval_secs,
        rules.len()
    );

    loop {
        interval.tick().await;

        if let Err(e) = cleanup_expired_machines(&machines, &rules, dry_run).await {
            error!("Janitor cleanup failed: {}", e);
        }
    }
}

pub async fn cleanup_expired_machines(
    machines: &MachineOrchestrator,
    rules: &[ExpiryRule],
    dry_run: bool,
) -> anyhow::Result<()> {
    let report = machines.expire_machines(rules, dry_run).await?;

    if !report.expired.is_empty() {
        info!(
            expired = report.expired.len(),
            destroyed = report.destroyed.len(),
            dry_run,
            "expiry sweep finished"
        );
    }

    Ok(())
}
