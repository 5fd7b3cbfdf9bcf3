use crate::config::ConcurrencySection;
use crate::error::GatewayError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Global budget of concurrently running subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    slots: Arc<Semaphore>,
    size: usize,
    queue_timeout: Duration,
}

impl ProcessPool {
    pub fn new(size: usize, queue_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            queue_timeout,
        }
    }

    pub fn from_section(section: &ConcurrencySection) -> Self {
        Self::new(section.pool_size, section.queue_timeout)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot, at most `queue_timeout`. The slot is released
    /// when the permit is dropped.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, GatewayError> {
        let started = Instant::now();
        let backpressure = || GatewayError::Backpressure {
            pool_size: self.size,
            waited: started.elapsed(),
        };

        tokio::select! {
            acquired = tokio::time::timeout(self.queue_timeout, self.slots.clone().acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_closed)) => Err(backpressure()),
                    Err(_elapsed) => {
                        tracing::warn!("⚠️  No free execution slot after {:?}", self.queue_timeout);
                        Err(backpressure())
                    }
                }
            }
            _ = cancel.cancelled() => Err(GatewayError::Cancelled { partial: String::new() }),
        }
    }
}
