//! Execution pool for admission control
//!
//! Bounds how many programs run at once across all sessions:
//! - `Admission::Queue` waits for a slot (cancellable)
//! - `Admission::Bounded` waits at most a fixed window, then reports saturation
//! - Pool statistics for monitoring

use crate::error::AdmissionError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Admission policy for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Wait for a slot as long as needed
    Queue,
    /// Wait at most this long, then fail with [`AdmissionError::Saturated`]
    Bounded(Duration),
}

/// Slot in the pool, released on drop
#[derive(Debug)]
pub struct ExecutionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured limit
    pub limit: usize,
    /// Executions currently holding a slot
    pub in_flight: usize,
    /// Total admissions granted
    pub admitted: u64,
    /// Total requests refused for saturation
    pub saturated: u64,
}

/// Bounded pool of execution slots
#[derive(Debug)]
pub struct ExecutionPool {
    limit: usize,
    semaphore: Arc<Semaphore>,
    admitted: AtomicU64,
    saturated: AtomicU64,
}

impl ExecutionPool {
    /// Create new pool
    #[inline]
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            admitted: AtomicU64::new(0),
            saturated: AtomicU64::new(0),
        }
    }

    /// Acquire a slot
    ///
    /// # Errors
    /// - `AdmissionError::Saturated` if a bounded wait elapsed
    /// - `AdmissionError::Cancelled` if `cancel` fired while queued
    /// - `AdmissionError::Closed` if the pool was closed
    pub async fn admit(
        &self,
        admission: Admission,
        cancel: Option<&CancellationToken>,
    ) -> Result<ExecutionPermit, AdmissionError> {
        let started = Instant::now();
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let wait = async {
            match admission {
                Admission::Queue => acquire.await.map_err(|_| AdmissionError::Closed),
                Admission::Bounded(window) => match tokio::time::timeout(window, acquire).await {
                    Ok(permit) => permit.map_err(|_| AdmissionError::Closed),
                    Err(_) => {
                        self.saturated.fetch_add(1, Ordering::Relaxed);
                        Err(AdmissionError::Saturated {
                            limit: self.limit,
                            waited_ms: u64::try_from(started.elapsed().as_millis())
                                .unwrap_or(u64::MAX),
                        })
                    }
                },
            }
        };

        let permit = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(AdmissionError::Cancelled),
                permit = wait => permit?,
            },
            None => wait.await?,
        };

        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(ExecutionPermit { _permit: permit })
    }

    /// Configured limit
    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free slots right now
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse all future admissions
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Get pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            limit: self.limit,
            in_flight: self.limit.saturating_sub(self.available()),
            admitted: self.admitted.load(Ordering::Relaxed),
            saturated: self.saturated.load(Ordering::Relaxed),
        }
    }
}
