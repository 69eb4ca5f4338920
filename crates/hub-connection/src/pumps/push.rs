//! Push pump: turns hub change notifications into mirror updates.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::reconnection::HubContext;

/// Drains device ids queued by subscriber callbacks.
///
/// A single pump per connection keeps mirror updates serialized no matter
/// which thread the session fires callbacks on. Fetch failures are logged
/// and never tear the connection down.
pub(crate) async fn push_pump(
    ctx: HubContext,
    mut pushes: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            pushed = pushes.recv() => {
                let Some(device_id) = pushed else {
                    break;
                };
                trace!(hub = %ctx.hub_id(), device = %device_id, "change notification");
                if let Err(e) = ctx
                    .mirror
                    .on_device_pushed(ctx.session.as_ref(), &device_id)
                    .await
                {
                    warn!(hub = %ctx.hub_id(), device = %device_id, error = %e, "push update failed");
                }
            }
        }
    }
    trace!(hub = %ctx.hub_id(), "push pump stopped");
}
