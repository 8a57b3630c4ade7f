//! Outbound delivery of accepted appointments and approved replies.
//!
//! Fire-and-forget from the engine's side: a failed delivery is logged
//! and never rolls back the state change that produced the notice.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::notify::Notice;

/// Transport to the customer (SMS, e-mail, chat channel, ...).
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<(), String>;
}

/// Default transport: records each notice in the log.
pub struct LogOutbound;

#[async_trait]
impl Outbound for LogOutbound {
    async fn deliver(&self, notice: &Notice) -> Result<(), String> {
        match notice {
            Notice::AppointmentAccepted { appointment } => tracing::info!(
                "outbound: account {} appointment {} is {} at {}",
                appointment.account_id,
                appointment.id,
                appointment.status,
                appointment.span.start
            ),
            Notice::MessageApproved { message } => tracing::info!(
                "outbound: account {} reply {} approved ({} bytes)",
                message.account_id,
                message.id,
                message.content.len()
            ),
        }
        Ok(())
    }
}

/// Forward every notice from one account's hub to `outbound` until the hub closes.
pub async fn run_dispatcher(mut rx: broadcast::Receiver<Notice>, outbound: Arc<dyn Outbound>) {
    loop {
        match rx.recv().await {
            Ok(notice) => {
                let label = notice.kind();
                let result = outbound.deliver(&notice).await;
                let status = if result.is_ok() { "ok" } else { "error" };
                metrics::counter!(crate::observability::OUTBOUND_TOTAL, "kind" => label, "status" => status)
                    .increment(1);
                if let Err(e) = result {
                    tracing::warn!("outbound delivery failed for account {}: {e}", notice.account_id());
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("outbound dispatcher lagged, {skipped} notices dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
