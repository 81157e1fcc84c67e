//! Expiry worker: periodic auto-rejection of overdue approvals.
//!
//! Silence must resolve to rejection. Races with operator decisions and the
//! lock cascade are settled by the store's conditional UPDATE; the losing
//! pass simply moves on.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::gateway::HitlGateway;

/// Immediate retries per tick before deferring to the next interval.
const MAX_RETRIES_PER_TICK: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct ExpiryWorker {
    gateway: Arc<HitlGateway>,
    scan_interval: Duration,
}

impl ExpiryWorker {
    pub fn new(gateway: Arc<HitlGateway>, scan_interval: Duration) -> Self {
        Self {
            gateway,
            scan_interval,
        }
    }

    /// Run until the process exits. A failing pass is retried with a short
    /// backoff and then abandoned until the next tick; one bad scan never
    /// halts the loop.
    pub async fn run(self) {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "expiry worker started"
        );
        let mut ticker = interval(self.scan_interval);

        loop {
            ticker.tick().await;

            let mut attempt = 0;
            loop {
                match self.gateway.run_expiry_pass().await {
                    Ok(0) => {
                        debug!("expiry pass: nothing overdue");
                        break;
                    }
                    Ok(n) => {
                        info!(expired = n, "expiry pass rejected overdue approvals");
                        break;
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt >= MAX_RETRIES_PER_TICK {
                            warn!(error = %e, attempt, "expiry pass failed, deferring to next tick");
                            break;
                        }
                        warn!(error = %e, attempt, "expiry pass failed, retrying");
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
    }
}
