//! Tracking of long-running outline generation jobs.
//!
//! The backend keeps working on a job no matter what happens here: detaching
//! only stops observing it, and aborting only stops polling and throws away
//! whatever result was on its way.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::JobsConfig;
use crate::error::ApiError;

pub const GENERIC_JOB_FAILURE: &str = "Outline generation failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendJobState {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatus {
    pub status: BackendJobState,
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub trait JobStatusSource {
    fn fetch_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<JobStatus, ApiError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerState {
    Idle,
    Submitted,
    Polling,
    Completed(String),
    Failed(String),
    /// Still processing when the timeout hit; the job can be re-attached.
    TimedOut,
    Aborted,
}

/// The outline text the caller is editing, plus the value it had before submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedEdit {
    original: Option<String>,
    current: Option<String>,
}

impl StagedEdit {
    pub fn new(original: Option<String>) -> Self {
        Self {
            current: original.clone(),
            original,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn commit(&mut self, value: String) {
        self.original = Some(value.clone());
        self.current = Some(value);
    }

    fn revert(&mut self) {
        self.current = self.original.clone();
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<TrackerState>,
    aborted: AtomicBool,
    detached: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle used to stop a tracker from outside the polling task.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    shared: Arc<Shared>,
}

impl TrackerHandle {
    /// Stops polling. Returns `false` when there was nothing to abort, which
    /// makes a second call a no-op.
    pub fn abort(&self) -> bool {
        let mut state = self.shared.lock();
        if *state != TrackerState::Polling {
            return false;
        }
        *state = TrackerState::Aborted;
        self.shared.aborted.store(true, Ordering::SeqCst);
        drop(state);
        self.shared.wake.notify_one();
        info!("outline job aborted by caller");
        true
    }

    /// Stops observing without touching the backend job.
    pub fn detach(&self) -> bool {
        let state = self.shared.lock();
        if *state != TrackerState::Polling {
            return false;
        }
        self.shared.detached.store(true, Ordering::SeqCst);
        drop(state);
        self.shared.wake.notify_one();
        true
    }

    pub fn state(&self) -> TrackerState {
        self.shared.lock().clone()
    }
}

#[derive(Debug)]
pub struct JobTracker {
    shared: Arc<Shared>,
    job_id: Option<String>,
    edit: StagedEdit,
    poll_interval: Duration,
    timeout: Duration,
}

enum Interrupt {
    Abort,
    Detach,
}

impl JobTracker {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState::Idle),
                aborted: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            job_id: None,
            edit: StagedEdit::default(),
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.poll_interval(), config.timeout())
    }

    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.shared.lock().clone()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn edit(&self) -> &StagedEdit {
        &self.edit
    }

    fn set_state(&self, next: TrackerState) {
        *self.shared.lock() = next;
    }

    /// Records a job the backend accepted; `original` is the outline before the request.
    pub fn submitted(&mut self, job_id: impl Into<String>, original: Option<String>) {
        self.job_id = Some(job_id.into());
        self.edit = StagedEdit::new(original);
        self.set_state(TrackerState::Submitted);
    }

    /// Resumes observing a job that was detached or timed out, or one started
    /// elsewhere. `original` only applies when the job is new to this tracker.
    pub fn reattach(&mut self, job_id: impl Into<String>, original: Option<String>) {
        let job_id = job_id.into();
        if self.job_id.as_deref() != Some(job_id.as_str()) {
            self.edit = StagedEdit::new(original);
        }
        self.job_id = Some(job_id);
        self.set_state(TrackerState::Submitted);
    }

    fn interrupted(&self) -> Option<Interrupt> {
        if self.shared.aborted.load(Ordering::SeqCst) {
            Some(Interrupt::Abort)
        } else if self.shared.detached.swap(false, Ordering::SeqCst) {
            Some(Interrupt::Detach)
        } else {
            None
        }
    }

    fn finish_interrupt(&mut self, interrupt: Interrupt) -> TrackerState {
        match interrupt {
            Interrupt::Abort => {
                self.edit.revert();
                TrackerState::Aborted
            }
            Interrupt::Detach => {
                debug!(job_id = ?self.job_id, "detached from outline job");
                self.set_state(TrackerState::Submitted);
                TrackerState::Submitted
            }
        }
    }

    /// Polls until the job leaves `processing`, the timeout elapses, or the
    /// caller aborts or detaches. Never returns an error: fetch failures become
    /// [`TrackerState::Failed`].
    pub async fn poll<S: JobStatusSource>(&mut self, source: &S) -> TrackerState {
        let Some(job_id) = self.job_id.clone() else {
            warn!("poll called without a submitted job");
            return self.state();
        };

        self.shared.aborted.store(false, Ordering::SeqCst);
        self.shared.detached.store(false, Ordering::SeqCst);
        self.set_state(TrackerState::Polling);

        let deadline = Instant::now() + self.timeout;
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shared.wake.notified() => {}
                _ = time::sleep_until(deadline) => {
                    return self.timed_out(&job_id);
                }
                _ = ticker.tick() => {}
            }

            if let Some(interrupt) = self.interrupted() {
                return self.finish_interrupt(interrupt);
            }

            debug!(%job_id, "polling outline job");
            let response = tokio::select! {
                biased;
                _ = self.shared.wake.notified() => None,
                _ = time::sleep_until(deadline) => {
                    return self.timed_out(&job_id);
                }
                response = source.fetch_status(&job_id) => Some(response),
            };

            // A response that lands after abort or detach is dropped.
            if let Some(interrupt) = self.interrupted() {
                return self.finish_interrupt(interrupt);
            }
            let Some(response) = response else {
                continue;
            };

            let next = match response {
                Ok(status) => match status.status {
                    BackendJobState::Processing => continue,
                    BackendJobState::Completed => {
                        info!(%job_id, "outline job completed");
                        TrackerState::Completed(status.outline.unwrap_or_default())
                    }
                    BackendJobState::Failed => {
                        let message = status
                            .error
                            .filter(|e| !e.trim().is_empty())
                            .unwrap_or_else(|| GENERIC_JOB_FAILURE.to_string());
                        warn!(%job_id, %message, "outline job failed");
                        TrackerState::Failed(message)
                    }
                },
                Err(error) => {
                    warn!(%job_id, %error, "could not fetch outline job status");
                    TrackerState::Failed(error.to_string())
                }
            };

            // abort() may have won the race for the lock in the meantime.
            let mut state = self.shared.lock();
            if *state == TrackerState::Aborted {
                drop(state);
                self.edit.revert();
                return TrackerState::Aborted;
            }
            *state = next.clone();
            drop(state);
            if let TrackerState::Completed(outline) = &next {
                self.edit.commit(outline.clone());
            }
            return next;
        }
    }

    fn timed_out(&self, job_id: &str) -> TrackerState {
        let mut state = self.shared.lock();
        if *state == TrackerState::Aborted {
            return TrackerState::Aborted;
        }
        warn!(%job_id, timeout = ?self.timeout, "outline job is taking longer than expected");
        *state = TrackerState::TimedOut;
        TrackerState::TimedOut
    }
}
