//! Checkout example application
//!
//! Walks one customer from cart to delivery over the in-memory backend:
//! - idempotent checkout with a retried request
//! - payment confirmation and per-line stock reduction
//! - shipping and delivery
//!
//! Every message is delivered twice. Set `ORDERCORE_LOG_FORMAT=json` for
//! JSON logs and `ORDERCORE_*` variables to tune the runtime.

use anyhow::Result;
use ordercore::telemetry::{init_tracing, LogFormat};
use ordercore::OrderCoreConfig;
use ordercore_examples::checkout::run_walkthrough;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::from_env())?;
    let config = OrderCoreConfig::from_env()?;
    info!(?config, "Starting checkout example");

    let summary = run_walkthrough(&config).await?;

    info!(
        order_id = %summary.order_id,
        status = %summary.final_status,
        version = summary.final_version,
        published = summary.published,
        duplicates_ignored = summary.duplicates_ignored,
        "Checkout example finished"
    );
    for (product_key, available) in &summary.remaining_stock {
        info!(%product_key, %available, "Remaining stock");
    }
    Ok(())
}
