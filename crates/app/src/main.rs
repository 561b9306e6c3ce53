use anyhow::Context;

use nursery_app::{ActionContext, AppConfig, build_services};
use nursery_core::OrgId;

/// Without arguments the binary checks that the configured store is reachable.
/// `retry-outbox <org-id> [limit]` re-runs that organization's failed post-commit effects.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nursery_observability::init();

    let config = AppConfig::from_env();
    let services = build_services(&config)
        .await
        .context("failed to initialize stores")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {
            tracing::info!("stores ready");
            Ok(())
        }
        Some("retry-outbox") => {
            let org_id: OrgId = args
                .get(1)
                .context("usage: nursery-app retry-outbox <org-id> [limit]")?
                .parse()
                .context("org id must be a UUID")?;
            let limit = match args.get(2) {
                Some(raw) => raw.parse().context("limit must be a positive integer")?,
                None => 100,
            };
            let reports = services
                .retry_outbox(&ActionContext::new(org_id, None), limit)
                .await
                .map_err(|e| anyhow::anyhow!(e.error))?;
            let delivered = reports.iter().filter(|r| r.is_delivered()).count();
            tracing::info!(org_id = %org_id, delivered, failed = reports.len() - delivered, "outbox retried");
            Ok(())
        }
        Some(other) => anyhow::bail!("unknown command '{other}'"),
    }
}
