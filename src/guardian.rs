//! Read-only port onto the external capital-protection lock.
//!
//! The real lock state lives in the Guardian service; this module is a thin
//! adapter plus a poll loop that publishes lock transitions onto a broadcast
//! channel. If the Guardian cannot be reached the port reports locked —
//! silence never approves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardianState {
    Unlocked,
    Locked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianStatus {
    pub state: GuardianState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

impl GuardianStatus {
    pub fn unlocked() -> Self {
        Self {
            state: GuardianState::Unlocked,
            reason: None,
            locked_at: None,
        }
    }

    pub fn locked(reason: impl Into<String>, locked_at: DateTime<Utc>) -> Self {
        Self {
            state: GuardianState::Locked,
            reason: Some(reason.into()),
            locked_at: Some(locked_at),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state == GuardianState::Locked
    }
}

/// Lock event delivered to subscribers when the Guardian transitions to
/// LOCKED.
#[derive(Debug, Clone, Serialize)]
pub struct GuardianEvent {
    pub reason: String,
    pub locked_at: DateTime<Utc>,
}

#[async_trait]
pub trait GuardianPort: Send + Sync {
    async fn is_locked(&self) -> bool;
    async fn status(&self) -> GuardianStatus;
}

/// HTTP adapter onto the Guardian service. Any transport or decode failure
/// is reported as locked.
pub struct HttpGuardian {
    client: reqwest::Client,
    status_url: String,
}

impl HttpGuardian {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            status_url: format!("{}/status", base_url.trim_end_matches('/')),
        })
    }

    async fn fetch(&self) -> anyhow::Result<GuardianStatus> {
        let status = self
            .client
            .get(&self.status_url)
            .send()
            .await?
            .error_for_status()?
            .json::<GuardianStatus>()
            .await?;
        Ok(status)
    }
}

#[async_trait]
impl GuardianPort for HttpGuardian {
    async fn is_locked(&self) -> bool {
        self.status().await.is_locked()
    }

    async fn status(&self) -> GuardianStatus {
        match self.fetch().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "guardian unreachable, treating as locked");
                GuardianStatus::locked("guardian unreachable", Utc::now())
            }
        }
    }
}

/// In-process Guardian with an externally settable status. Serves as the
/// fail-closed default when no `GUARDIAN_URL` is configured, and as the test
/// double.
pub struct StaticGuardian {
    status: RwLock<GuardianStatus>,
}

impl StaticGuardian {
    pub fn unlocked() -> Self {
        Self {
            status: RwLock::new(GuardianStatus::unlocked()),
        }
    }

    pub fn locked(reason: impl Into<String>) -> Self {
        Self {
            status: RwLock::new(GuardianStatus::locked(reason, Utc::now())),
        }
    }

    pub fn set(&self, status: GuardianStatus) {
        *self.status.write() = status;
    }
}

#[async_trait]
impl GuardianPort for StaticGuardian {
    async fn is_locked(&self) -> bool {
        self.status.read().is_locked()
    }

    async fn status(&self) -> GuardianStatus {
        self.status.read().clone()
    }
}

/// Polls the Guardian and publishes LOCKED transitions.
///
/// Consumers process events serially off the broadcast channel; the cascade
/// is idempotent regardless because the store permits one transition per
/// record.
pub struct GuardianMonitor {
    port: Arc<dyn GuardianPort>,
    tx: broadcast::Sender<GuardianEvent>,
    poll_interval: Duration,
}

impl GuardianMonitor {
    pub fn new(port: Arc<dyn GuardianPort>, poll_interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            port,
            tx,
            poll_interval,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardianEvent> {
        self.tx.subscribe()
    }

    /// Publish a lock event directly. Used at startup when the gateway
    /// observes a lock outside the poll loop, and by tests.
    pub fn publish(&self, event: GuardianEvent) {
        // No receivers is fine; the cascade handler may not be up yet.
        let _ = self.tx.send(event);
    }

    /// Poll until the process exits, emitting one event per
    /// UNLOCKED -> LOCKED transition.
    pub async fn run(self: Arc<Self>) {
        let mut was_locked = false;
        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(interval_secs = self.poll_interval.as_secs(), "guardian monitor started");

        loop {
            ticker.tick().await;
            let status = self.port.status().await;
            let locked = status.is_locked();

            if locked && !was_locked {
                let event = GuardianEvent {
                    reason: status
                        .reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                    locked_at: status.locked_at.unwrap_or_else(Utc::now),
                };
                warn!(reason = %event.reason, "guardian transitioned to LOCKED");
                let _ = self.tx.send(event);
            } else if !locked && was_locked {
                info!("guardian transitioned to UNLOCKED");
            } else {
                debug!(locked, "guardian poll");
            }

            was_locked = locked;
        }
    }
}
