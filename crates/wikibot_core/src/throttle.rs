use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::edit::{EditOutcome, EditRequest, submit_edit};
use crate::error::ApiError;
use crate::session::Session;
use crate::transport::ApiTransport;

pub const DEFAULT_PER_EDIT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_PER_BATCH_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub per_edit_delay_ms: u64,
    pub per_batch_delay_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            per_edit_delay_ms: DEFAULT_PER_EDIT_DELAY_MS,
            per_batch_delay_ms: DEFAULT_PER_BATCH_DELAY_MS,
        }
    }
}

pub trait Pacer {
    fn pause(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration);
        }
    }
}

/// Logged-in session for the lifetime of one task.
///
/// Opening logs in; closing or dropping logs out, whatever path the task
/// took. Every edit is preceded by the per-edit delay and every batch after
/// the first by the per-batch delay.
pub struct ThrottledSession<T: ApiTransport, P: Pacer = ThreadPacer> {
    session: Session<T>,
    throttle: ThrottleConfig,
    pacer: P,
    edits_submitted: usize,
    batches_started: usize,
}

impl<T: ApiTransport, P: Pacer> ThrottledSession<T, P> {
    pub fn open(mut session: Session<T>, throttle: ThrottleConfig, pacer: P) -> Result<Self, ApiError> {
        session.login()?;
        Ok(Self {
            session,
            throttle,
            pacer,
            edits_submitted: 0,
            batches_started: 0,
        })
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Transport for read-only queries.
    pub fn transport_mut(&mut self) -> &mut T {
        self.session.transport_mut()
    }

    pub fn endpoint(&self) -> &str {
        self.session.endpoint()
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    pub fn throttle(&self) -> ThrottleConfig {
        self.throttle
    }

    pub fn edits_submitted(&self) -> usize {
        self.edits_submitted
    }

    pub fn request_count(&self) -> usize {
        self.session.transport().request_count()
    }

    /// Mark the start of a batch, waiting first unless it is the first one.
    pub fn begin_batch(&mut self) {
        if self.batches_started > 0 {
            debug!(delay_ms = self.throttle.per_batch_delay_ms, "pausing between batches");
            self.pacer
                .pause(Duration::from_millis(self.throttle.per_batch_delay_ms));
        }
        self.batches_started += 1;
    }

    pub fn submit_edit(&mut self, request: &EditRequest) -> EditOutcome {
        self.pacer
            .pause(Duration::from_millis(self.throttle.per_edit_delay_ms));
        self.edits_submitted += 1;
        submit_edit(&mut self.session, request)
    }

    /// Log out now instead of at drop.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.session.is_authenticated() {
            return;
        }
        if let Err(error) = self.session.logout() {
            warn!(%error, endpoint = self.session.endpoint(), "logout failed");
        }
        info!(
            edits = self.edits_submitted,
            batches = self.batches_started,
            requests = self.session.transport().request_count(),
            "session closed"
        );
    }
}

impl<T: ApiTransport, P: Pacer> Drop for ThrottledSession<T, P> {
    fn drop(&mut self) {
        self.teardown();
    }
}
