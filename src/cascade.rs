//! Lock-cascade handler: Guardian LOCKED events fan out as rejections.
//!
//! Events arrive on a bounded broadcast channel and are processed strictly
//! serially. Idempotency comes for free from the store's one-transition-per-
//! record rule, so a replayed or duplicated lock event is harmless.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::gateway::HitlGateway;
use crate::guardian::GuardianEvent;

pub struct LockCascadeHandler {
    gateway: Arc<HitlGateway>,
    rx: broadcast::Receiver<GuardianEvent>,
}

impl LockCascadeHandler {
    pub fn new(gateway: Arc<HitlGateway>, rx: broadcast::Receiver<GuardianEvent>) -> Self {
        Self { gateway, rx }
    }

    /// Consume lock events until the channel closes.
    pub async fn run(mut self) {
        info!("lock-cascade handler started");
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    info!(reason = %event.reason, locked_at = %event.locked_at, "guardian lock received");
                    match self
                        .gateway
                        .cascade_reject_on_guardian_lock(&event.reason)
                        .await
                    {
                        Ok(n) => info!(rejected = n, "lock cascade complete"),
                        Err(e) => warn!(error = %e, "lock cascade failed"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // A lagged lock event still means "locked now": run the
                    // cascade against whatever is pending.
                    warn!(skipped, "guardian event stream lagged, running catch-up cascade");
                    if let Err(e) = self
                        .gateway
                        .cascade_reject_on_guardian_lock("guardian lock (catch-up)")
                        .await
                    {
                        warn!(error = %e, "catch-up cascade failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("guardian event stream closed, cascade handler exiting");
                    return;
                }
            }
        }
    }
}
