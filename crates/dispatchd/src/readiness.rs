//! Worker gateway readiness.
//!
//! The controller calls `ensure_ready` once before the first turn and never
//! re-checks between turns. Retry and backoff live here, not in the loop.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Per-attempt connect timeout for the TCP probe.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("gateway at {addr} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        addr: String,
        attempts: u32,
        reason: String,
    },
}

/// Collaborator that guarantees the worker endpoint is reachable.
///
/// Implementations must be idempotent: calling `ensure_ready` on an already
/// ready gateway is cheap and succeeds.
#[async_trait]
pub trait Readiness: Send + Sync {
    async fn ensure_ready(&self) -> Result<(), ReadinessError>;
}

/// For deployments where the worker is managed elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait]
impl Readiness for AlwaysReady {
    async fn ensure_ready(&self) -> Result<(), ReadinessError> {
        Ok(())
    }
}

/// Probes a TCP endpoint, retrying with a fixed backoff.
#[derive(Debug, Clone)]
pub struct TcpReadiness {
    addr: String,
    retries: u32,
    backoff: Duration,
    connect_timeout: Duration,
}

impl TcpReadiness {
    pub fn new(addr: impl Into<String>, retries: u32, backoff: Duration) -> Self {
        Self {
            addr: addr.into(),
            retries,
            backoff,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn probe(&self) -> Result<(), String> {
        let connect = TcpStream::connect(self.addr.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "connect timed out after {}ms",
                self.connect_timeout.as_millis()
            )),
        }
    }
}

#[async_trait]
impl Readiness for TcpReadiness {
    async fn ensure_ready(&self) -> Result<(), ReadinessError> {
        let max_attempts = self.retries.saturating_add(1);
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            debug!(addr = %self.addr, attempt, max_attempts, "probing gateway");

            match self.probe().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(addr = %self.addr, attempt, "gateway became reachable");
                    }
                    return Ok(());
                }
                Err(reason) => {
                    warn!(addr = %self.addr, attempt, error = %reason, "gateway not reachable");
                    last_reason = reason;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(ReadinessError::Unreachable {
            addr: self.addr.clone(),
            attempts: max_attempts,
            reason: last_reason,
        })
    }
}
