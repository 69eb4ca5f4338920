//! Session watchdog: periodic login checks while connected.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::reconnection::{HubContext, lose_connection};

/// Asks the session whether it is still logged in every watchdog interval.
///
/// A `false` answer (or a failed check) moves the hub to Error and starts
/// a retry loop.
pub(crate) async fn watchdog(ctx: HubContext, generation: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(ctx.config.watchdog_interval());
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let reason = match ctx.session.is_logged_in().await {
                    Ok(true) => {
                        trace!(hub = %ctx.hub_id(), "session alive");
                        continue;
                    }
                    Ok(false) => "session logged out".to_string(),
                    Err(e) => format!("session check failed: {e}"),
                };
                if cancel.is_cancelled() {
                    break;
                }
                debug!(hub = %ctx.hub_id(), reason = %reason, "watchdog tripped");
                lose_connection(&ctx, generation, reason).await;
                break;
            }
        }
    }
}
