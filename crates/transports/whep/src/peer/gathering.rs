//! Bounded wait for ICE candidate gathering

use crate::peer::resource::{ConnectionResource, GatheringState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of waiting for gathering to finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatheringOutcome {
    /// Gathering reported complete before the bound
    Completed { candidates: Vec<String> },
    /// The bound elapsed first; carries the candidates gathered so far
    TimedOut { candidates: Vec<String> },
}

impl GatheringOutcome {
    pub fn candidates(&self) -> &[String] {
        match self {
            GatheringOutcome::Completed { candidates } | GatheringOutcome::TimedOut { candidates } => {
                candidates
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, GatheringOutcome::Completed { .. })
    }
}

/// Waits until a resource finishes gathering or the bound elapses
///
/// The gathering observer is registered before the current state is read, so
/// a completion racing with the call is never missed. The observer is
/// deregistered on every return path.
pub struct IceGatheringWaiter;

impl IceGatheringWaiter {
    pub async fn wait(resource: &dyn ConnectionResource, timeout: Duration) -> GatheringOutcome {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut subscription = resource.subscribe_gathering();

        if resource.gathering_state() == GatheringState::Complete {
            debug!("Connection {} already finished gathering", resource.id());
            return GatheringOutcome::Completed {
                candidates: resource.gathered_candidates(),
            };
        }

        loop {
            match tokio::time::timeout_at(deadline, subscription.recv()).await {
                Ok(Some(GatheringState::Complete)) => {
                    let candidates = resource.gathered_candidates();
                    debug!(
                        "Connection {} gathered {} candidates in {:?}",
                        resource.id(),
                        candidates.len(),
                        started.elapsed()
                    );
                    return GatheringOutcome::Completed { candidates };
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    // Registry closed underneath us; the resource is going away
                    let candidates = resource.gathered_candidates();
                    return if resource.gathering_state() == GatheringState::Complete {
                        GatheringOutcome::Completed { candidates }
                    } else {
                        GatheringOutcome::TimedOut { candidates }
                    };
                }
                Err(_) => {
                    let candidates = resource.gathered_candidates();
                    warn!(
                        "Connection {} ICE gathering timed out after {:?} with {} candidates",
                        resource.id(),
                        timeout,
                        candidates.len()
                    );
                    return GatheringOutcome::TimedOut { candidates };
                }
            }
        }
    }
}
