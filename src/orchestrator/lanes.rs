//! Per-user admission: a fair semaphore per user plus the cancellation token
//! of every request the user has waiting or running.

use crate::config::ConcurrencySection;
use crate::error::GatewayError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct Lane {
    slots: Arc<Semaphore>,
    requests: HashMap<Uuid, CancellationToken>,
}

#[derive(Debug)]
pub struct UserLanes {
    per_user: usize,
    queue_timeout: Duration,
    supersede: bool,
    lanes: Mutex<HashMap<String, Lane>>,
}

/// Held for the whole time a request runs. Dropping it frees the user's slot.
#[derive(Debug)]
pub struct LaneTicket {
    lanes: Arc<UserLanes>,
    user: String,
    request_id: Uuid,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

impl LaneTicket {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for LaneTicket {
    fn drop(&mut self) {
        self.lanes.forget(&self.user, self.request_id);
    }
}

impl UserLanes {
    pub fn new(per_user: usize, queue_timeout: Duration, supersede: bool) -> Self {
        Self {
            per_user: per_user.max(1),
            queue_timeout,
            supersede,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_section(section: &ConcurrencySection) -> Self {
        Self::new(
            section.per_user,
            section.queue_timeout,
            section.supersede_in_flight,
        )
    }

    /// Wait for one of the user's slots, FIFO behind their earlier requests.
    /// With supersede enabled, every earlier request of the user is cancelled
    /// first.
    pub async fn enter(self: &Arc<Self>, user: &str, request_id: Uuid) -> Result<LaneTicket, GatewayError> {
        let cancel = CancellationToken::new();
        let slots = {
            let mut lanes = self.lock();
            let lane = lanes.entry(user.to_string()).or_insert_with(|| Lane {
                slots: Arc::new(Semaphore::new(self.per_user)),
                requests: HashMap::new(),
            });
            if self.supersede && !lane.requests.is_empty() {
                info!("⏭️  Superseding {} earlier request(s) of {}", lane.requests.len(), user);
                lane.requests.values().for_each(CancellationToken::cancel);
            }
            lane.requests.insert(request_id, cancel.clone());
            lane.slots.clone()
        };

        let started = Instant::now();
        let acquired = tokio::select! {
            acquired = tokio::time::timeout(self.queue_timeout, slots.acquire_owned()) => match acquired {
                Ok(Ok(permit)) => Ok(permit),
                _ => Err(GatewayError::Backpressure {
                    pool_size: self.per_user,
                    waited: started.elapsed(),
                }),
            },
            _ = cancel.cancelled() => Err(GatewayError::Cancelled { partial: String::new() }),
        };

        match acquired {
            Ok(permit) => {
                debug!("Request {} of {} entered its lane after {:?}", request_id, user, started.elapsed());
                Ok(LaneTicket {
                    lanes: self.clone(),
                    user: user.to_string(),
                    request_id,
                    cancel,
                    _permit: permit,
                })
            }
            Err(e) => {
                self.forget(user, request_id);
                Err(e)
            }
        }
    }

    /// Cancel everything the user has waiting or running. Returns how many
    /// requests were signalled.
    pub fn cancel(&self, user: &str) -> usize {
        let lanes = self.lock();
        match lanes.get(user) {
            Some(lane) => {
                lane.requests.values().for_each(CancellationToken::cancel);
                lane.requests.len()
            }
            None => 0,
        }
    }

    /// Requests of `user` currently waiting or running.
    pub fn pending(&self, user: &str) -> usize {
        self.lock().get(user).map(|lane| lane.requests.len()).unwrap_or(0)
    }

    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }

    fn forget(&self, user: &str, request_id: Uuid) {
        let mut lanes = self.lock();
        let idle = match lanes.get_mut(user) {
            Some(lane) => {
                lane.requests.remove(&request_id);
                lane.requests.is_empty()
            }
            None => false,
        };
        if idle {
            lanes.remove(user);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
