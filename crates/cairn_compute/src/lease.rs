//! Per-label concurrency limits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ComputeError;

/// A set of counting semaphores, one per configured lease label.
///
/// Labels without a configured limit are not throttled.
#[derive(Debug, Default)]
pub struct Leases {
    limits: HashMap<String, Arc<Semaphore>>,
}

impl Leases {
    /// Creates leases from a label to limit map.
    pub fn new(limits: &BTreeMap<String, usize>) -> Self {
        Self {
            limits: limits
                .iter()
                .map(|(label, &n)| (label.clone(), Arc::new(Semaphore::new(n))))
                .collect(),
        }
    }

    /// No label is limited.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Permits currently available for `label`, or `None` if it is unlimited.
    pub fn available(&self, label: &str) -> Option<usize> {
        self.limits.get(label).map(|s| s.available_permits())
    }

    /// Waits for a slot under `label`.
    ///
    /// Returns `Ok(None)` immediately for `None` or an unlimited label, and
    /// [`ComputeError::Cancelled`] if `cancel` fires first. The slot is held
    /// until the returned permit is dropped.
    pub async fn acquire(
        &self,
        label: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<OwnedSemaphorePermit>, ComputeError> {
        let Some((label, semaphore)) =
            label.and_then(|l| self.limits.get(l).map(|s| (l, s.clone())))
        else {
            return Ok(None);
        };
        if semaphore.available_permits() == 0 {
            debug!(label, "waiting for lease");
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ComputeError::Cancelled),
            permit = semaphore.acquire_owned() => permit
                .map(Some)
                .map_err(|_| ComputeError::internal(format!("lease '{label}' closed"))),
        }
    }
}
