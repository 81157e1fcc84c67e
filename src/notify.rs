//! Outbound notification ports.
//!
//! Notifications are strictly best-effort: the persisted decision is
//! authoritative and a failed send never rolls it back. The event bus is an
//! in-process broadcast channel; transports (chat bots, web sockets) attach
//! as subscribers outside this crate.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{ApprovalRequest, DeepLinkToken, HitlEvent};

#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn send_request(
        &self,
        record: &ApprovalRequest,
        token: &DeepLinkToken,
    ) -> anyhow::Result<()>;
    async fn send_decision(&self, record: &ApprovalRequest) -> anyhow::Result<()>;
    async fn send_timeout(&self, record: &ApprovalRequest) -> anyhow::Result<()>;
}

/// Default notifier: structured log lines only. Real chat transports live
/// behind the same trait in the deployment binary.
pub struct LogNotifier;

#[async_trait]
impl ChatNotifier for LogNotifier {
    async fn send_request(
        &self,
        record: &ApprovalRequest,
        token: &DeepLinkToken,
    ) -> anyhow::Result<()> {
        info!(
            trade_id = %record.trade_id,
            instrument = %record.instrument,
            side = record.side.as_str(),
            expires_at = %record.expires_at,
            token = %token.token,
            "approval requested"
        );
        Ok(())
    }

    async fn send_decision(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        info!(
            trade_id = %record.trade_id,
            status = record.status.as_str(),
            decided_by = record.decided_by.as_deref().unwrap_or(""),
            "approval decided"
        );
        Ok(())
    }

    async fn send_timeout(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        info!(trade_id = %record.trade_id, "approval timed out");
        Ok(())
    }
}

/// Fire-and-forget event fan-out for UI consumers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HitlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HitlEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Lagging or absent receivers are not an error.
    pub fn emit(&self, event: HitlEvent) {
        match self.tx.send(event) {
            Ok(n) => debug!(receivers = n, "event emitted"),
            Err(_) => debug!("event emitted with no receivers"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Run a best-effort notification, logging and swallowing any failure.
pub async fn best_effort<F>(what: &'static str, fut: F)
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    if let Err(e) = fut.await {
        warn!(error = %e, what, "notification failed (ignored)");
    }
}
